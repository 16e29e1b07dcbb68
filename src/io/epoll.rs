//! Raw epoll syscalls: `epoll_create1`/`epoll_ctl`/`epoll_wait`, using a
//! plain `u64` token rather than a wrapper type, since the registry
//! keys everything by raw fd already.

use std::cmp;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use super::ready::Ready;

macro_rules! syscall {
    ($fn:ident ( $($arg:expr),* $(,)* ) ) => {{
        let res = unsafe { libc::$fn($($arg),*) };
        if res == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}

pub struct Epoll {
    epfd: RawFd,
}

impl Epoll {
    pub fn new() -> io::Result<Epoll> {
        let epfd = syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?;
        Ok(Epoll { epfd })
    }

    pub fn add(&self, fd: RawFd, token: u64, interest: Ready) -> io::Result<()> {
        let mut info = libc::epoll_event {
            events: interest.to_epoll_bits(),
            u64: token,
        };
        syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_ADD, fd, &mut info))?;
        Ok(())
    }

    pub fn modify(&self, fd: RawFd, token: u64, interest: Ready) -> io::Result<()> {
        let mut info = libc::epoll_event {
            events: interest.to_epoll_bits(),
            u64: token,
        };
        syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_MOD, fd, &mut info))?;
        Ok(())
    }

    pub fn delete(&self, fd: RawFd) -> io::Result<()> {
        let mut info = libc::epoll_event { events: 0, u64: 0 };
        syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, &mut info))?;
        Ok(())
    }

    pub fn wait(&self, events: &mut EventBuf, timeout: Option<Duration>) -> io::Result<usize> {
        let timeout_ms = timeout
            .map(|to| cmp::min(to.as_millis(), libc::c_int::MAX as u128) as libc::c_int)
            .unwrap_or(-1);

        let count = syscall!(epoll_wait(
            self.epfd,
            events.raw.as_mut_ptr(),
            events.raw.capacity() as i32,
            timeout_ms
        ))?;

        unsafe { events.raw.set_len(count as usize) };
        Ok(count as usize)
    }
}

impl AsRawFd for Epoll {
    fn as_raw_fd(&self) -> RawFd {
        self.epfd
    }
}

impl Drop for Epoll {
    fn drop(&mut self) {
        unsafe {
            let _ = libc::close(self.epfd);
        }
    }
}

/// A reusable batch buffer for `Epoll::wait`, sized once at
/// [`MAX_EVENTS`](super::MAX_EVENTS) by the poller that owns it.
pub struct EventBuf {
    raw: Vec<libc::epoll_event>,
}

impl EventBuf {
    pub fn with_capacity(cap: usize) -> EventBuf {
        EventBuf {
            raw: Vec::with_capacity(cap),
        }
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Returns the `(token, readiness)` pair for batch slot `idx`.
    pub fn get(&self, idx: usize) -> Option<(u64, Ready)> {
        self.raw.get(idx).map(|ev| (ev.u64, Ready::from_epoll_bits(ev.events)))
    }
}
