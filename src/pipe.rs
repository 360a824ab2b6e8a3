//! The kernel transport under a channel: a pipe in packet mode.

use std::io;
use std::mem::{size_of, MaybeUninit};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::unistd::pipe2;

use crate::utils::cvt;

/// The largest write the kernel guarantees to be atomic on a pipe.
pub const PIPE_BUF: usize = libc::PIPE_BUF;

/// Read and write ends of a pipe opened with `O_DIRECT | O_NONBLOCK | O_CLOEXEC`.
///
/// In `O_DIRECT` ("packet") mode every `write(2)` of at most [`PIPE_BUF`]
/// bytes becomes one packet, and every `read(2)` returns at most one packet.
/// Both descriptors are closed when the `Pipe` is dropped.
#[derive(Debug)]
pub struct Pipe {
    read: OwnedFd,
    write: OwnedFd,
}

impl Pipe {
    pub fn new() -> io::Result<Self> {
        let (read, write) = pipe2(OFlag::O_DIRECT | OFlag::O_NONBLOCK | OFlag::O_CLOEXEC)?;
        Ok(Self { read, write })
    }

    pub fn read_fd(&self) -> BorrowedFd<'_> {
        self.read.as_fd()
    }

    pub fn write_fd(&self) -> BorrowedFd<'_> {
        self.write.as_fd()
    }

    /// Writes `value` as one packet.
    ///
    /// A single `write(2)` and nothing else, so it may be called from a signal
    /// handler.
    pub fn write_packet<T: Copy>(&self, value: &T) -> nix::Result<usize> {
        let ret = unsafe {
            libc::write(
                self.write.as_raw_fd(),
                (value as *const T).cast::<libc::c_void>(),
                size_of::<T>(),
            )
        };
        cvt(ret)
    }

    /// Writes raw bytes as one packet.
    pub fn write_bytes(&self, bytes: &[u8]) -> nix::Result<usize> {
        let ret = unsafe {
            libc::write(
                self.write.as_raw_fd(),
                bytes.as_ptr().cast::<libc::c_void>(),
                bytes.len(),
            )
        };
        cvt(ret)
    }

    /// Reads at most one packet into `slot`, returning the number of bytes read.
    ///
    /// `slot` is fully initialized only when the returned count equals
    /// `size_of::<T>()`.
    pub fn read_packet<T>(&self, slot: &mut MaybeUninit<T>) -> nix::Result<usize> {
        let ret = unsafe {
            libc::read(
                self.read.as_raw_fd(),
                slot.as_mut_ptr().cast::<libc::c_void>(),
                size_of::<T>(),
            )
        };
        cvt(ret)
    }
}

/// The read end; this is what a worker watches.
impl AsFd for Pipe {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.read.as_fd()
    }
}

/// Outcome of one packet read, as the drain loop sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packet {
    Full,
    Short(usize),
    Empty,
    Closed,
    Interrupted,
    Failed(Errno),
}

impl Packet {
    pub fn classify(result: nix::Result<usize>, expected: usize) -> Self {
        match result {
            Ok(0) => Packet::Closed,
            Ok(n) if n == expected => Packet::Full,
            Ok(n) => Packet::Short(n),
            Err(Errno::EAGAIN) => Packet::Empty,
            Err(Errno::EINTR) => Packet::Interrupted,
            Err(e) => Packet::Failed(e),
        }
    }
}
