//! A priority-scheduled worker pool and epoll-based readiness reactor
//! for building multi-threaded network servers.
//!
//! ## Usage
//!
//! First, add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! evdisp = "0.1"
//! ```
//!
//! # Example
//!
//! ```no_run
//! use evdisp::{Priority, RuntimeConfig};
//! use evdisp::net::{addr, socket::Callbacks, Server, ServerCallbacks};
//! use std::sync::Arc;
//!
//! let runtime = RuntimeConfig::new().worker_threads(4).build().unwrap();
//! let addr = addr::parse("127.0.0.1:4000").unwrap();
//!
//! let server_callbacks = ServerCallbacks {
//!     connected: Arc::new(|_socket| {}),
//!     on_error: None,
//!     accept_callbacks: Arc::new(Callbacks::default),
//!     accept_user_data: Arc::new(|| ()),
//!     accept_priority: Priority::Norm,
//! };
//!
//! let _server = Server::listen(addr, runtime.monitor(), runtime.scheduler(), server_callbacks, ());
//! runtime.fini();
//! ```

pub mod emitter;
pub mod error;
pub mod event;
pub mod io;
pub mod ioctx;
pub mod logger;
pub mod net;
pub mod runtime;
pub mod worker;

pub use emitter::{Emitter, Handler};
pub use error::{Error, ErrorCode};
pub use event::{Event, EventType, Priority};
pub use io::{Monitor, Ready};
pub use ioctx::{DataType, IoContext, IoType};
pub use logger::RemoteLog;
pub use runtime::{Runtime, RuntimeConfig};
pub use worker::Scheduler;
