//! Readiness-based I/O monitor.
//!
//! A [`Monitor`] owns `P` poller threads, each with its own epoll
//! instance: one `epoll_wait` batch of up to [`MAX_EVENTS`] events per
//! iteration, each slot's fd looked up in the registry and handed its
//! readiness bits. `watch` assigns a poller round robin, with no
//! migration afterward — once a fd is on a poller, it stays there until
//! `unwatch`. Each poller also watches its own eventfd ([`Waker`]) so
//! `fini` can break a blocked `epoll_wait` instead of waiting out a
//! timeout.

pub mod epoll;
pub mod ready;
mod registry;

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::Error;
pub use epoll::EventBuf;
pub use ready::Ready;
use registry::{Callback, Registry};

/// Events drained per `epoll_wait` call.
pub const MAX_EVENTS: usize = 32;

/// Bound on how long a poller gets to bring its epoll instance up during
/// [`Monitor::start`] before the whole monitor gives up and unwinds.
const STARTUP_TIMEOUT: Duration = Duration::from_millis(1000);

/// Sentinel token identifying a poller's own wakeup fd among the epoll
/// batch, distinct from any real fd (fds never collide with `u64::MAX`).
const WAKE_TOKEN: u64 = u64::MAX;

/// A one-shot-per-write eventfd used to break a poller out of a blocked
/// `epoll_wait`.
struct Waker {
    fd: RawFd,
}

impl Waker {
    fn new() -> io::Result<Waker> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(Waker { fd })
    }

    fn wake(&self) -> io::Result<()> {
        let buf = 1u64.to_ne_bytes();
        let res = unsafe { libc::write(self.fd, buf.as_ptr() as *const libc::c_void, 8) };
        if res == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                Ok(())
            } else {
                Err(err)
            }
        } else {
            Ok(())
        }
    }

    fn drain(&self) {
        let mut buf = [0u8; 8];
        unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, 8) };
    }
}

impl AsRawFd for Waker {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for Waker {
    fn drop(&mut self) {
        unsafe {
            let _ = libc::close(self.fd);
        }
    }
}

struct Poller {
    epoll: Arc<epoll::Epoll>,
    waker: Arc<Waker>,
}

/// Owns the poller pool and the fd registration table shared across it.
pub struct Monitor {
    pollers: Vec<Poller>,
    registry: Arc<Registry>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    stop: Arc<AtomicBool>,
    next: AtomicUsize,
}

struct StartupBarrier {
    state: Mutex<(usize, bool)>,
    condvar: Condvar,
}

impl StartupBarrier {
    fn new() -> StartupBarrier {
        StartupBarrier {
            state: Mutex::new((0, false)),
            condvar: Condvar::new(),
        }
    }

    fn signal_ready(&self) {
        let mut state = self.state.lock().unwrap();
        state.0 += 1;
        self.condvar.notify_all();
    }

    fn signal_failed(&self) {
        let mut state = self.state.lock().unwrap();
        state.1 = true;
        self.condvar.notify_all();
    }

    /// Waits until all `n` pollers report ready, one reports failure, or
    /// `STARTUP_TIMEOUT` elapses. Returns `Ok(())` only in the first case.
    fn wait(&self, n: usize) -> Result<(), Error> {
        let state = self.state.lock().unwrap();
        let (state, timed_out) = self
            .condvar
            .wait_timeout_while(state, STARTUP_TIMEOUT, |(ready, failed)| !*failed && *ready < n)
            .unwrap();

        if state.1 {
            Err(Error::Io(io::Error::new(io::ErrorKind::Other, "poller failed to start")))
        } else if timed_out.timed_out() {
            Err(Error::Timeout)
        } else {
            Ok(())
        }
    }
}

impl Monitor {
    /// Spawns `n` poller threads. Each one must bring up its epoll
    /// instance within [`STARTUP_TIMEOUT`]; if any fails, or the barrier
    /// times out, already-spawned pollers are stopped and joined in
    /// reverse before the error is returned.
    pub fn start(n: usize) -> Result<Arc<Monitor>, Error> {
        if n == 0 {
            return Err(Error::Invalid);
        }

        let registry = Arc::new(Registry::new());
        let stop = Arc::new(AtomicBool::new(false));
        let barrier = Arc::new(StartupBarrier::new());

        let mut pollers: Vec<Poller> = Vec::with_capacity(n);
        let mut handles = Vec::with_capacity(n);

        for idx in 0..n {
            match Self::spawn_one(idx, &registry, &stop, &barrier) {
                Ok((poller, handle)) => {
                    pollers.push(poller);
                    handles.push(handle);
                }
                Err(err) => {
                    barrier.signal_failed();
                    for poller in &pollers {
                        let _ = poller.waker.wake();
                    }
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(err);
                }
            }
        }

        if let Err(e) = barrier.wait(n) {
            stop.store(true, Ordering::SeqCst);
            for poller in &pollers {
                let _ = poller.waker.wake();
            }
            for handle in handles {
                let _ = handle.join();
            }
            return Err(e);
        }

        Ok(Arc::new(Monitor {
            pollers,
            registry,
            handles: Mutex::new(handles),
            stop,
            next: AtomicUsize::new(0),
        }))
    }

    fn spawn_one(
        idx: usize,
        registry: &Arc<Registry>,
        stop: &Arc<AtomicBool>,
        barrier: &Arc<StartupBarrier>,
    ) -> Result<(Poller, JoinHandle<()>), Error> {
        let epoll = Arc::new(epoll::Epoll::new().map_err(Error::Io)?);
        let waker = Arc::new(Waker::new().map_err(Error::Io)?);
        epoll
            .add(waker.as_raw_fd(), WAKE_TOKEN, Ready::readable())
            .map_err(Error::Io)?;

        let registry = registry.clone();
        let stop = stop.clone();
        let barrier = barrier.clone();
        let epoll_for_thread = epoll.clone();
        let waker_for_thread = waker.clone();

        let handle = thread::Builder::new()
            .name(format!("evdisp-poller-{idx}"))
            .spawn(move || poller_loop(idx, epoll_for_thread, waker_for_thread, registry, stop, barrier))
            .map_err(Error::Io)?;

        Ok((Poller { epoll, waker }, handle))
    }

    pub fn poller_count(&self) -> usize {
        self.pollers.len()
    }

    /// Registers `fd` for `interest` readiness on the next poller in
    /// round-robin order, invoking `callback` with the delivered
    /// [`Ready`] set whenever `fd` becomes ready. Rejects with
    /// `AlreadyRegistered` if `fd` is already watched.
    pub fn watch<F>(&self, fd: RawFd, interest: Ready, callback: F) -> Result<(), Error>
    where
        F: Fn(Ready) + Send + Sync + 'static,
    {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.pollers.len();
        let callback: Callback = Arc::new(callback);

        self.registry.insert(fd, idx, callback)?;

        if let Err(err) = self.pollers[idx].epoll.add(fd, fd as u64, interest) {
            let _ = self.registry.remove(fd);
            return Err(Error::Io(err));
        }

        Ok(())
    }

    /// Changes the interest set for an already-watched fd, on the same
    /// poller it was originally assigned to.
    pub fn rewatch(&self, fd: RawFd, interest: Ready) -> Result<(), Error> {
        let idx = self.registry.poller_of(fd)?;
        self.pollers[idx].epoll.modify(fd, fd as u64, interest).map_err(Error::Io)
    }

    pub fn unwatch(&self, fd: RawFd) -> Result<(), Error> {
        let idx = self.registry.poller_of(fd)?;
        self.pollers[idx].epoll.delete(fd).map_err(Error::Io)?;
        self.registry.remove(fd)?;
        Ok(())
    }

    /// Stops every poller thread and joins them. Blocks until the last one
    /// returns.
    pub fn fini(&self) {
        self.stop.store(true, Ordering::SeqCst);
        for poller in &self.pollers {
            let _ = poller.waker.wake();
        }

        let mut handles = self.handles.lock().unwrap();
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn poller_loop(
    idx: usize,
    epoll: Arc<epoll::Epoll>,
    waker: Arc<Waker>,
    registry: Arc<Registry>,
    stop: Arc<AtomicBool>,
    barrier: Arc<StartupBarrier>,
) {
    barrier.signal_ready();
    log::debug!("poller {idx} initialized");

    let mut events = EventBuf::with_capacity(MAX_EVENTS);

    while !stop.load(Ordering::SeqCst) {
        let count = match epoll.wait(&mut events, None) {
            Ok(c) => c,
            Err(err) => {
                log::warn!("poller {idx} epoll_wait failed: {err}");
                break;
            }
        };

        for i in 0..count {
            if let Some((token, ready)) = events.get(i) {
                if token == WAKE_TOKEN {
                    waker.drain();
                    continue;
                }

                if let Some(callback) = registry.callback(token as RawFd) {
                    callback(ready);
                }
            }
        }
    }

    log::debug!("poller {idx} stopped");
}
