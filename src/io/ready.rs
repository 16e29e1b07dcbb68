//! Readiness bitset, the Rust stand-in for a raw `epoll_event.events` mask.
//! Grounded on `ready.rs`'s `Ready(usize)` newtype, trimmed to the four
//! bits this reactor actually dispatches on.

use std::ops;

const READABLE: u32 = 0b0001;
const WRITABLE: u32 = 0b0010;
const ERROR: u32 = 0b0100;
const HUP: u32 = 0b1000;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Ready(u32);

impl Ready {
    pub fn empty() -> Ready {
        Ready(0)
    }

    pub fn readable() -> Ready {
        Ready(READABLE)
    }

    pub fn writable() -> Ready {
        Ready(WRITABLE)
    }

    pub fn error() -> Ready {
        Ready(ERROR)
    }

    pub fn hup() -> Ready {
        Ready(HUP)
    }

    pub fn is_readable(self) -> bool {
        self.contains(Ready::readable())
    }

    pub fn is_writable(self) -> bool {
        self.contains(Ready::writable())
    }

    pub fn is_error(self) -> bool {
        self.contains(Ready::error())
    }

    pub fn is_hup(self) -> bool {
        self.contains(Ready::hup())
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: Ready) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Converts a raw epoll event mask into a `Ready` set. Every bit test
    /// here is `&` against the raw mask, never `|` — a mask with only
    /// `EPOLLOUT` set must not read back as hup just because `EPOLLHUP`'s
    /// numeric value happens to be nonzero elsewhere in the word.
    pub(crate) fn from_epoll_bits(bits: u32) -> Ready {
        let mut ready = Ready::empty();

        if bits & (libc::EPOLLIN as u32) != 0 || bits & (libc::EPOLLPRI as u32) != 0 {
            ready = ready | Ready::readable();
        }
        if bits & (libc::EPOLLOUT as u32) != 0 {
            ready = ready | Ready::writable();
        }
        if bits & (libc::EPOLLERR as u32) != 0 {
            ready = ready | Ready::error();
        }
        if bits & (libc::EPOLLHUP as u32) != 0 || bits & (libc::EPOLLRDHUP as u32) != 0 {
            ready = ready | Ready::hup();
        }

        ready
    }

    pub(crate) fn to_epoll_bits(self) -> u32 {
        let mut bits = 0;
        if self.is_readable() {
            bits |= libc::EPOLLIN as u32;
        }
        if self.is_writable() {
            bits |= libc::EPOLLOUT as u32;
        }
        if self.is_hup() {
            bits |= libc::EPOLLRDHUP as u32;
        }
        bits
    }
}

impl ops::BitOr for Ready {
    type Output = Ready;

    fn bitor(self, other: Ready) -> Ready {
        Ready(self.0 | other.0)
    }
}

impl ops::BitOrAssign for Ready {
    fn bitor_assign(&mut self, other: Ready) {
        self.0 |= other.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hup_only_set_when_hup_bit_present() {
        let write_only = Ready::from_epoll_bits(libc::EPOLLOUT as u32);
        assert!(write_only.is_writable());
        assert!(!write_only.is_hup());

        let hup_only = Ready::from_epoll_bits(libc::EPOLLHUP as u32);
        assert!(hup_only.is_hup());
        assert!(!hup_only.is_writable());
        assert!(!hup_only.is_readable());

        let rdhup = Ready::from_epoll_bits(libc::EPOLLRDHUP as u32);
        assert!(rdhup.is_hup());

        let combined = Ready::from_epoll_bits((libc::EPOLLOUT | libc::EPOLLHUP) as u32);
        assert!(combined.is_writable());
        assert!(combined.is_hup());
    }
}
