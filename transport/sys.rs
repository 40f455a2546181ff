// Syscall-level helpers shared by the socket backends
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Outcome of a readiness poll on one descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Readiness {
    Readable,
    TimedOut,
    /// POLLERR/POLLHUP/POLLNVAL without readable data; the descriptor is
    /// no longer usable.
    Gone,
}

pub(crate) fn poll_readable(fd: RawFd, timeout: Duration) -> Readiness {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
    let rc = unsafe { libc::poll(&mut pfd, 1, millis) };
    if rc < 0 {
        // EINTR and friends; report as a timeout so the caller retries
        return Readiness::TimedOut;
    }
    if rc == 0 {
        return Readiness::TimedOut;
    }
    if pfd.revents & libc::POLLIN != 0 {
        Readiness::Readable
    } else if pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
        Readiness::Gone
    } else {
        Readiness::TimedOut
    }
}

/// send(2) with MSG_NOSIGNAL so a dead peer surfaces as EPIPE instead of
/// terminating the process.
pub(crate) fn send_nosignal(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    let rc = unsafe {
        libc::send(
            fd,
            buf.as_ptr() as *const libc::c_void,
            buf.len(),
            libc::MSG_NOSIGNAL,
        )
    };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc as usize)
    }
}

pub(crate) fn recv_into(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let rc = unsafe { libc::recv(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc as usize)
    }
}

/// Discard whatever is immediately readable on `fd`; returns the number of
/// bytes thrown away. Used to enforce the trim-to-fit receive policy.
pub(crate) fn drain_pending(fd: RawFd) -> usize {
    let mut scratch = [0u8; 4096];
    let mut discarded = 0;
    loop {
        let rc = unsafe {
            libc::recv(
                fd,
                scratch.as_mut_ptr() as *mut libc::c_void,
                scratch.len(),
                libc::MSG_DONTWAIT,
            )
        };
        if rc <= 0 {
            break;
        }
        discarded += rc as usize;
    }
    discarded
}
