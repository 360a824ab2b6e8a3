use std::cell::Cell;
use std::os::fd::{AsFd, BorrowedFd};

use crate::{Event, Handler, Interest, WithInterest, Worker};

pub struct FdWithInterest<Fd> {
    pub(crate) fd: Fd,
    pub(crate) interest: Interest,
}

impl<Fd: AsFd> FdWithInterest<Fd> {
    /// Binds a callback, producing a [`Subscriber`](crate::Subscriber) that owns `fd`.
    pub fn with_handler<F>(self, f: F) -> FnSubscriber<Fd, F>
    where
        F: FnMut(&mut Fd, Event, &Worker) -> Event,
    {
        FnSubscriber {
            fd: self.fd,
            interest: Cell::new(self.interest),
            f,
        }
    }
}

/// A subscriber made of a descriptor and a closure.
pub struct FnSubscriber<Fd, F> {
    fd: Fd,
    interest: Cell<Interest>,
    f: F,
}

impl<Fd: AsFd, F> AsFd for FnSubscriber<Fd, F> {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl<Fd, F> WithInterest for FnSubscriber<Fd, F> {
    fn interest(&self) -> &Cell<Interest> {
        &self.interest
    }
}

impl<Fd, F> Handler for FnSubscriber<Fd, F>
where
    Fd: AsFd,
    F: FnMut(&mut Fd, Event, &Worker) -> Event,
{
    fn handle(&mut self, event: Event, worker: &Worker) -> Event {
        (self.f)(&mut self.fd, event, worker)
    }
}
