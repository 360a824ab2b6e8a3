//! Per-thread epoll workers and a pipe-backed channel for handing fixed-size
//! messages from any thread to one of them.
//!
//! A [`Worker`] is a single-threaded reactor. A [`Channel`] is attached to one
//! worker at a time; its [`Poster`]s may be sent anywhere, and every message
//! they post is handled on the worker's thread.

mod channel;
mod error;
mod event;
mod eventp_ops;
mod fn_subscriber;
mod interest;
mod message;
mod pipe;
mod registry;
mod subscriber;
mod utils;
mod worker;

pub mod epoll {
    pub use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
}

pub use crate::channel::{Builder, Channel, DrainPolicy, MessageHandler, Poster};
pub use crate::error::PostError;
pub use crate::event::Event;
pub use crate::eventp_ops::EventpOps;
#[cfg(any(test, feature = "mock"))]
#[cfg_attr(docsrs, doc(cfg(feature = "mock")))]
pub use crate::eventp_ops::MockEventp;
pub use crate::fn_subscriber::{FdWithInterest, FnSubscriber};
pub use crate::interest::{interest, Interest};
pub use crate::message::Message;
pub use crate::pipe::PIPE_BUF;
pub use crate::registry::Registry;
pub use crate::subscriber::{Handler, Subscriber, WithInterest};
pub use crate::worker::{Stats, WeakWorker, Worker};
