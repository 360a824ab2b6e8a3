use crate::epoll::EpollFlags;

/// Readiness reported by the kernel for a registered file descriptor.
///
/// Handlers also return an `Event` to tell the worker which readiness they
/// serviced; an empty event means nothing was processed.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct Event(pub(crate) EpollFlags);

impl From<EpollFlags> for Event {
    fn from(value: EpollFlags) -> Self {
        Self(value)
    }
}

impl From<Event> for EpollFlags {
    fn from(value: Event) -> Self {
        value.bitflags()
    }
}

impl Event {
    /// An event with no readiness bits, i.e. "nothing serviced".
    pub const fn empty() -> Self {
        Self(EpollFlags::empty())
    }

    /// Readable readiness only (`EPOLLIN`).
    pub const fn readable() -> Self {
        Self(EpollFlags::EPOLLIN)
    }

    /// Returns the underlying `EpollFlags` bitmask.
    pub const fn bitflags(&self) -> EpollFlags {
        self.0
    }

    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns `true` if the Event contains readable readiness.
    ///
    /// This corresponds to the `EPOLLIN` flag.
    pub const fn is_readable(&self) -> bool {
        self.0.contains(EpollFlags::EPOLLIN)
    }

    /// Returns `true` if the Event contains writable readiness.
    ///
    /// This corresponds to the `EPOLLOUT` flag.
    pub const fn is_writable(&self) -> bool {
        self.0.contains(EpollFlags::EPOLLOUT)
    }

    /// Returns `true` if the Event contains an error (`EPOLLERR`).
    ///
    /// The kernel always reports this flag, whether it was asked for or not.
    pub const fn is_error(&self) -> bool {
        self.0.contains(EpollFlags::EPOLLERR)
    }

    /// Returns `true` if the Event contains a "hang up" (`EPOLLHUP`).
    ///
    /// For a pipe this means the write end is closed.
    pub const fn is_hangup(&self) -> bool {
        self.0.contains(EpollFlags::EPOLLHUP)
    }

    /// The bits of this event that fall outside `allowed`.
    pub const fn unexpected(&self, allowed: EpollFlags) -> EpollFlags {
        self.0.difference(allowed)
    }
}
