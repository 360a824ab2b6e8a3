use std::cell::Cell;
use std::io;
use std::os::fd::AsFd;

use crate::{Event, Interest, Registry, Worker};

/// Anything a [`Worker`] can dispatch to: a descriptor, the interest it is
/// registered with, and the callback.
pub trait Subscriber: AsFd + WithInterest + Handler + 'static {
    fn register_into<R>(self, registry: &R) -> io::Result<()>
    where
        Self: Sized,
        R: Registry + ?Sized,
    {
        registry.register(self)
    }
}

impl<S> Subscriber for S where S: AsFd + WithInterest + Handler + 'static {}

pub trait WithInterest {
    fn interest(&self) -> &Cell<Interest>;
}

pub trait Handler {
    /// Called on the worker's thread with the readiness the kernel reported.
    ///
    /// Returns the readiness that was actually serviced, [`Event::empty`] if
    /// nothing was.
    fn handle(&mut self, event: Event, worker: &Worker) -> Event;
}
