//! Listening socket. A `Server` owns a non-blocking
//! `TcpListener`, registers it with a [`Monitor`], and constructs a
//! [`Socket`] for each accepted connection, handing it to the
//! `connected` callback the way [`Socket::from_accepted`] hands a
//! freshly connected stream to its owner.

use std::net::{self, SocketAddrV4};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex};

use crate::error::Error;
use crate::event::Priority;
use crate::io::{Monitor, Ready};
use crate::net::socket::{Callbacks, Socket};
use crate::worker::Scheduler;

/// Backlog depth passed to `listen(2)`.
pub const PENDCLIENTS: i32 = 64;

pub struct ServerCallbacks<D, C> {
    pub connected: Arc<dyn Fn(Socket<C>) + Send + Sync>,
    pub on_error: Option<Arc<dyn Fn(&Server<D, C>, Error) + Send + Sync>>,
    pub accept_callbacks: Arc<dyn Fn() -> Callbacks<C> + Send + Sync>,
    pub accept_user_data: Arc<dyn Fn() -> C + Send + Sync>,
    pub accept_priority: Priority,
}

struct Inner<D, C> {
    fd: RawFd,
    listener: net::TcpListener,
    monitor: Arc<Monitor>,
    scheduler: Arc<Scheduler>,
    callbacks: ServerCallbacks<D, C>,
    user_data: Mutex<D>,
}

/// A listening socket that hands off each accepted connection as a
/// [`Socket`]. Cloning shares the same listener and callback set.
pub struct Server<D = (), C = ()> {
    inner: Arc<Inner<D, C>>,
}

impl<D, C> Clone for Server<D, C> {
    fn clone(&self) -> Server<D, C> {
        Server {
            inner: self.inner.clone(),
        }
    }
}

impl<D, C> Server<D, C>
where
    D: Send + 'static,
    C: Send + 'static,
{
    /// Binds and listens on `addr`, registering the listener for readable
    /// readiness (an incoming connection wakes an accept loop the same
    /// way data arriving on a connected socket wakes `on_readable`).
    pub fn listen(
        addr: SocketAddrV4,
        monitor: Arc<Monitor>,
        scheduler: Arc<Scheduler>,
        callbacks: ServerCallbacks<D, C>,
        user_data: D,
    ) -> Result<Server<D, C>, Error> {
        let listener = net::TcpListener::bind(addr).map_err(Error::Io)?;
        listener.set_nonblocking(true).map_err(Error::Io)?;
        unsafe {
            libc::listen(listener.as_raw_fd(), PENDCLIENTS);
        }
        let fd = listener.as_raw_fd();

        let server = Server {
            inner: Arc::new(Inner {
                fd,
                listener,
                monitor,
                scheduler,
                callbacks,
                user_data: Mutex::new(user_data),
            }),
        };

        let inner = server.inner.clone();
        server
            .inner
            .monitor
            .watch(fd, Ready::readable(), move |ready| {
                inner.on_ready(ready);
            })?;

        Ok(server)
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.inner.listener.local_addr()
    }

    pub fn set_user_data(&self, data: D) -> D {
        std::mem::replace(&mut self.inner.user_data.lock().unwrap(), data)
    }

    pub fn with_user_data<R>(&self, f: impl FnOnce(&D) -> R) -> R {
        f(&self.inner.user_data.lock().unwrap())
    }

    pub fn destroy(&self) -> Result<(), Error> {
        self.inner.monitor.unwatch(self.inner.fd)
    }
}

impl<D, C> Inner<D, C>
where
    D: Send + 'static,
    C: Send + 'static,
{
    /// Runs on the poller thread. Accepts every connection currently
    /// queued — edge-triggered readiness means a single wakeup can carry
    /// more than one pending connection — and stops at the first
    /// `EAGAIN`. Errors on the listening fd itself go to `on_error`.
    fn on_ready(self: &Arc<Self>, ready: Ready) {
        if ready.is_error() || ready.is_hup() {
            if let Some(cb) = self.callbacks.on_error.clone() {
                let server = Server { inner: self.clone() };
                cb(&server, Error::Close);
            }
            return;
        }

        loop {
            match self.listener.accept() {
                Ok((stream, _peer)) => {
                    let callbacks = (self.callbacks.accept_callbacks)();
                    match Socket::from_accepted(
                        stream,
                        self.monitor.clone(),
                        self.scheduler.clone(),
                        self.callbacks.accept_priority,
                        callbacks,
                        (self.callbacks.accept_user_data)(),
                    ) {
                        Ok(socket) => (self.callbacks.connected)(socket),
                        Err(err) => log::warn!("failed to register accepted connection: {err}"),
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    log::warn!("accept failed: {err}");
                    break;
                }
            }
        }
    }
}
