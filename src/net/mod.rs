//! IPv4 TCP networking: address codec, non-blocking sockets, and
//! listening servers built on the [`crate::io`] monitor and
//! [`crate::worker`] scheduler.

pub mod addr;
pub mod server;
pub mod socket;

pub use server::{Server, ServerCallbacks, PENDCLIENTS};
pub use socket::{Callbacks, Socket};
