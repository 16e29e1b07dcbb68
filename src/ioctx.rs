//! I/O context tagging. Every operation that crosses into a completion
//! callback carries an [`IoType`] (what kind of descriptor it ran
//! against) and a [`DataType`] (how its buffer is shaped) so a caller
//! working generically over many in-flight operations — a connection
//! pool's scoreboard, say — can tell them apart without downcasting.
//!
//! Buffers themselves use `std::io::{IoSlice, IoSliceMut}` for the
//! vectored case rather than a hand-rolled `iovec` wrapper: they're
//! already the right shape (pointer + length, `repr(transparent)` over
//! `libc::iovec` on unix) and every vectored read/write on
//! [`Socket`](crate::net::socket::Socket) can take them directly.

/// What kind of descriptor an I/O context's operation ran against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoType {
    Sock = 22,
    BlkDev = 23,
}

/// How an I/O context's payload is shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Vec = 11,
    Ptr = 12,
}

/// Bytes transferred and the descriptor/shape the transfer happened
/// through, attached to a socket or block-device completion.
#[derive(Debug, Clone, Copy)]
pub struct IoContext {
    io_type: IoType,
    data_type: DataType,
    bytes_transferred: usize,
}

impl IoContext {
    pub fn new(io_type: IoType, data_type: DataType, bytes_transferred: usize) -> IoContext {
        IoContext {
            io_type,
            data_type,
            bytes_transferred,
        }
    }

    pub fn io_type(&self) -> IoType {
        self.io_type
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn bytes_transferred(&self) -> usize {
        self.bytes_transferred
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carries_descriptor_kind_and_shape_through_a_completion() {
        let ctx = IoContext::new(IoType::Sock, DataType::Vec, 42);
        assert_eq!(ctx.io_type(), IoType::Sock);
        assert_eq!(ctx.data_type(), DataType::Vec);
        assert_eq!(ctx.bytes_transferred(), 42);
    }
}
