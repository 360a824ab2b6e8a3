use std::io;
use std::os::fd::RawFd;
use std::rc::Rc;

use crate::{Interest, Subscriber};

/// The registration side of a reactor: add subscribers, modify their
/// interest, delete them.
///
/// # Primary Implementors
///
/// In this crate, [`Worker`] and [`MockEventp`] are the primary implementors.
/// Code that only registers and deregisters, such as
/// [`Channel`](crate::Channel), is generic over `EventpOps` so it can be tested
/// against the mock.
///
/// Every method takes `&self`: registration changes are allowed from inside a
/// callback that the same reactor is currently dispatching.
///
/// [`Worker`]: crate::Worker
/// [`MockEventp`]: crate::MockEventp
pub trait EventpOps {
    fn add(&self, subscriber: Box<dyn Subscriber>) -> io::Result<()>;
    fn modify(&self, fd: RawFd, interest: Interest) -> io::Result<()>;
    fn delete(&self, fd: RawFd) -> io::Result<()>;
}

impl<T: EventpOps + ?Sized> EventpOps for Rc<T> {
    fn add(&self, subscriber: Box<dyn Subscriber>) -> io::Result<()> {
        (**self).add(subscriber)
    }

    fn modify(&self, fd: RawFd, interest: Interest) -> io::Result<()> {
        (**self).modify(fd, interest)
    }

    fn delete(&self, fd: RawFd) -> io::Result<()> {
        (**self).delete(fd)
    }
}

#[cfg(any(test, feature = "mock"))]
mockall::mock! {
    pub Eventp {}

    impl EventpOps for Eventp {
        fn add(&self, subscriber: Box<dyn Subscriber>) -> io::Result<()>;
        fn modify(&self, fd: RawFd, interest: Interest) -> io::Result<()>;
        fn delete(&self, fd: RawFd) -> io::Result<()>;
    }
}
