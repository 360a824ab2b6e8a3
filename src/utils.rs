use std::os::fd::{AsRawFd, RawFd};
use std::{io, ptr};

use crate::epoll::{Epoll, EpollEvent};

pub fn epoll_ctl(
    epoll: &Epoll,
    op: libc::c_int,
    fd: RawFd,
    mut event: Option<EpollEvent>,
) -> io::Result<()> {
    let event = match &mut event {
        Some(ev) => ev as *mut EpollEvent as *mut libc::epoll_event,
        None => ptr::null_mut(),
    };
    let ret = unsafe { libc::epoll_ctl(epoll.0.as_raw_fd(), op, fd, event) };
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Maps the return value of a raw `read(2)`/`write(2)` to a byte count.
pub fn cvt(ret: libc::ssize_t) -> nix::Result<usize> {
    if ret == -1 {
        Err(nix::errno::Errno::last())
    } else {
        Ok(ret as usize)
    }
}
