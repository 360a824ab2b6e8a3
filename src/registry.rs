use std::io;

use crate::{EventpOps, Subscriber};

pub trait Registry {
    fn register<S>(&self, subscriber: S) -> io::Result<()>
    where
        S: Subscriber;
}

impl<Ep: EventpOps + ?Sized> Registry for Ep {
    fn register<S>(&self, subscriber: S) -> io::Result<()>
    where
        S: Subscriber,
    {
        self.add(Box::new(subscriber))
    }
}
