use std::os::fd::AsFd;

use crate::epoll::EpollFlags;
use crate::fn_subscriber::FdWithInterest;

/// The readiness a subscriber wants its worker to watch for.
///
/// Built fluently from [`interest()`]: `interest().read().edge_triggered()`.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct Interest(EpollFlags);

impl Default for Interest {
    fn default() -> Self {
        interest()
    }
}

impl From<EpollFlags> for Interest {
    fn from(flags: EpollFlags) -> Self {
        Self(flags)
    }
}

impl From<Interest> for EpollFlags {
    fn from(interest: Interest) -> Self {
        interest.0
    }
}

impl Interest {
    pub const fn new(flags: EpollFlags) -> Self {
        Self(flags)
    }

    pub const fn bitflags(&self) -> EpollFlags {
        self.0
    }

    /// Pairs this interest with `fd`; finish with
    /// [`with_handler`](FdWithInterest::with_handler).
    pub fn with_fd<Fd: AsFd>(self, fd: Fd) -> FdWithInterest<Fd> {
        FdWithInterest { fd, interest: self }
    }

    const fn set(self, flag: EpollFlags, on: bool) -> Self {
        if on {
            Self(self.0.union(flag))
        } else {
            Self(self.0.difference(flag))
        }
    }

    /// `EPOLLIN`.
    pub const fn read(self) -> Self {
        self.set(EpollFlags::EPOLLIN, true)
    }

    /// `EPOLLOUT`.
    pub const fn write(self) -> Self {
        self.set(EpollFlags::EPOLLOUT, true)
    }

    /// `EPOLLET`. Level-triggered is what you get without it.
    pub const fn edge_triggered(self) -> Self {
        self.set(EpollFlags::EPOLLET, true)
    }

    /// `EPOLLONESHOT`: disarmed after one event until modified again.
    pub const fn oneshot(self) -> Self {
        self.set(EpollFlags::EPOLLONESHOT, true)
    }

    pub const fn remove_read(self) -> Self {
        self.set(EpollFlags::EPOLLIN, false)
    }

    pub const fn remove_write(self) -> Self {
        self.set(EpollFlags::EPOLLOUT, false)
    }
}

/// An empty interest set, the start of the fluent API.
pub const fn interest() -> Interest {
    Interest(EpollFlags::empty())
}
