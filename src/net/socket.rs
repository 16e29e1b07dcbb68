//! Non-blocking TCP socket.
//!
//! Wraps a `std::net::TcpStream`, but readiness delivered by the
//! [`Monitor`] is turned into an [`Event`] dispatched through the
//! [`Scheduler`] rather than run inline on the poller thread — the
//! poller only demultiplexes, the worker pool runs callbacks, so no lock
//! is ever held across a user callback.
//!
//! The four readiness bits {EpollOut, EpollIn, EpollErr, EpollHup} map
//! onto the four per-socket callbacks directly, rather than through a
//! second `Emitter` handler table nested inside the socket: those four
//! handlers *are* `on_connected`/`on_readable`/`on_error`/`on_close`, so a
//! table in between would be indirection without behavior (see DESIGN.md).
//!
//! At most one write is ever in flight per socket; everything else queued
//! through [`Socket::write`] waits in a FIFO backlog until the previous
//! write's completion is observed via `EPOLLOUT`. `ReadReady` is a
//! latched bit mirroring `WriteInFlight`: the monitor sets it on
//! `EPOLLIN`, and only the first such event while it's unset dispatches
//! `on_readable` — a caller that doesn't fully drain the socket doesn't
//! cause a re-dispatch storm on a level-triggered fd, since `read()`
//! only re-arms the bit once it actually observes `EAGAIN`.

use std::collections::VecDeque;
use std::io::{self, IoSlice, IoSliceMut, Read, Write};
use std::net::{self, SocketAddrV4};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{Error, ErrorCode};
use crate::event::{Event, Priority};
use crate::io::{Monitor, Ready};
use crate::ioctx::{DataType, IoContext, IoType};
use crate::worker::Scheduler;

/// Event type tag this module dispatches its own I/O-completion work
/// under. Distinct from whatever event types an application's `Emitter`
/// uses — a socket's readiness handling doesn't go through `Emitter` at
/// all, it dispatches to the scheduler directly.
const SOCKET_EVENT_TYPE: u8 = 0;

type Completion = Box<dyn FnOnce(IoContext, ErrorCode) + Send>;

pub struct Callbacks<D> {
    pub on_connected: Option<Arc<dyn Fn(&Socket<D>) + Send + Sync>>,
    pub on_readable: Option<Arc<dyn Fn(&Socket<D>) + Send + Sync>>,
    pub on_drain: Option<Arc<dyn Fn(&Socket<D>) + Send + Sync>>,
    pub on_error: Option<Arc<dyn Fn(&Socket<D>, ErrorCode) + Send + Sync>>,
    pub on_close: Option<Arc<dyn Fn(&Socket<D>) + Send + Sync>>,
}

impl<D> Default for Callbacks<D> {
    fn default() -> Callbacks<D> {
        Callbacks {
            on_connected: None,
            on_readable: None,
            on_drain: None,
            on_error: None,
            on_close: None,
        }
    }
}

/// A write's payload, shaped the way its [`DataType`] says: one
/// contiguous buffer (`Ptr`, plain `write`) or several buffers issued as
/// a single `writev` (`Vec`), mirroring the source's `ec_type` switch
/// between `kEDNET_IOCTX_TYPE_IODATA` and `kEDNET_IOCTX_TYPE_IOVEC`.
enum Buf {
    Ptr(Vec<u8>),
    Vec(Vec<Vec<u8>>),
}

impl Buf {
    fn data_type(&self) -> DataType {
        match self {
            Buf::Ptr(_) => DataType::Ptr,
            Buf::Vec(_) => DataType::Vec,
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Buf::Ptr(data) => data.is_empty(),
            Buf::Vec(bufs) => bufs.iter().all(|b| b.is_empty()),
        }
    }

    /// Drops the first `n` bytes already accepted by the kernel, so a
    /// partial write resumes from where it left off on the next syscall
    /// instead of re-sending, or silently losing, bytes already queued.
    fn consume(&mut self, mut n: usize) {
        match self {
            Buf::Ptr(data) => {
                let n = n.min(data.len());
                data.drain(..n);
            }
            Buf::Vec(bufs) => {
                while n > 0 {
                    match bufs.first_mut() {
                        Some(first) if n >= first.len() => {
                            n -= first.len();
                            bufs.remove(0);
                        }
                        Some(first) => {
                            first.drain(..n);
                            n = 0;
                        }
                        None => break,
                    }
                }
            }
        }
    }
}

/// One queued write: the payload and the completion it owes exactly
/// once, plus the running count of bytes already accepted across however
/// many partial writes it took.
struct WriteRequest {
    buf: Buf,
    written: usize,
    completion: Completion,
}

struct WriteState {
    /// `None` iff `WriteInFlight` is clear. `Some` is the single in-flight
    /// write this socket will ever have at once.
    current: Option<WriteRequest>,
    backlog: VecDeque<WriteRequest>,
}

/// Outcome of attempting a single non-blocking write syscall for one
/// request. A short write that doesn't empty the buffer is `Pending`
/// too — the remainder stays as the in-flight request and is resumed on
/// the next `EPOLLOUT`, it is never discarded.
enum Issued {
    Pending(WriteRequest),
    Done(WriteRequest, ErrorCode),
}

fn issue(stream: &net::TcpStream, mut req: WriteRequest) -> Issued {
    // `Write` is implemented for `&TcpStream`, not `TcpStream`, so a write
    // through a shared reference needs a mutable binding of the reference
    // itself — the fd write doesn't need exclusive access to the stream.
    let mut stream = stream;
    let result = match &req.buf {
        Buf::Ptr(data) => stream.write(data),
        Buf::Vec(bufs) => {
            let slices: Vec<IoSlice> = bufs.iter().map(|b| IoSlice::new(b)).collect();
            stream.write_vectored(&slices)
        }
    };

    match result {
        Ok(0) => Issued::Done(req, Error::Close.into()),
        Ok(n) => {
            req.written += n;
            req.buf.consume(n);
            if req.buf.is_empty() {
                Issued::Done(req, 0)
            } else {
                // Short write: the kernel took part of the buffer and
                // would block on the rest. Stay the in-flight request.
                Issued::Pending(req)
            }
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Issued::Pending(req),
        Err(e) => Issued::Done(req, Error::Io(e).into()),
    }
}

fn complete_request(req: WriteRequest, code: ErrorCode) {
    let ctx = IoContext::new(IoType::Sock, req.buf.data_type(), req.written);
    (req.completion)(ctx, code);
}

struct Inner<D> {
    fd: RawFd,
    stream: net::TcpStream,
    monitor: Arc<Monitor>,
    scheduler: Arc<Scheduler>,
    priority: Priority,
    connected: AtomicBool,
    /// Latched by the monitor on `EPOLLIN`, cleared by `read`/`read_vectored`
    /// on `EAGAIN` or a hard error.
    read_ready: AtomicBool,
    affinity: Mutex<Option<usize>>,
    write_state: Mutex<WriteState>,
    callbacks: Callbacks<D>,
    user_data: Mutex<D>,
}

/// A non-blocking TCP socket registered with a [`Monitor`]. Cheap to
/// clone — clones share the same underlying connection and state.
pub struct Socket<D = ()> {
    inner: Arc<Inner<D>>,
}

impl<D> Clone for Socket<D> {
    fn clone(&self) -> Socket<D> {
        Socket {
            inner: self.inner.clone(),
        }
    }
}

impl<D> Socket<D>
where
    D: Send + 'static,
{
    /// Begins a non-blocking connect to `addr`. Returns once the
    /// connect is in flight and the socket is registered for writable
    /// readiness; `callbacks.on_connected` fires once the connect
    /// actually completes (or `on_error` if it fails).
    pub fn connect(
        addr: SocketAddrV4,
        monitor: Arc<Monitor>,
        scheduler: Arc<Scheduler>,
        priority: Priority,
        callbacks: Callbacks<D>,
        user_data: D,
    ) -> Result<Socket<D>, Error> {
        let fd = nonblocking_connect(addr).map_err(Error::Io)?;
        let stream = unsafe { net::TcpStream::from_raw_fd(fd) };

        let socket = Socket {
            inner: Arc::new(Inner {
                fd,
                stream,
                monitor,
                scheduler,
                priority,
                connected: AtomicBool::new(false),
                read_ready: AtomicBool::new(false),
                affinity: Mutex::new(None),
                write_state: Mutex::new(WriteState {
                    current: None,
                    backlog: VecDeque::new(),
                }),
                callbacks,
                user_data: Mutex::new(user_data),
            }),
        };

        socket.watch(Ready::writable())?;
        Ok(socket)
    }

    /// Wraps an already-connected stream — how [`Server`](super::server::Server)
    /// hands off an accepted connection.
    pub(crate) fn from_accepted(
        stream: net::TcpStream,
        monitor: Arc<Monitor>,
        scheduler: Arc<Scheduler>,
        priority: Priority,
        callbacks: Callbacks<D>,
        user_data: D,
    ) -> Result<Socket<D>, Error> {
        stream.set_nonblocking(true).map_err(Error::Io)?;
        let fd = stream.as_raw_fd();

        let socket = Socket {
            inner: Arc::new(Inner {
                fd,
                stream,
                monitor,
                scheduler,
                priority,
                connected: AtomicBool::new(true),
                read_ready: AtomicBool::new(false),
                affinity: Mutex::new(None),
                write_state: Mutex::new(WriteState {
                    current: None,
                    backlog: VecDeque::new(),
                }),
                callbacks,
                user_data: Mutex::new(user_data),
            }),
        };

        socket.watch(Ready::readable())?;
        Ok(socket)
    }

    fn watch(&self, interest: Ready) -> Result<(), Error> {
        let inner = self.inner.clone();
        self.inner.monitor.watch(self.inner.fd, interest, move |ready| {
            inner.on_ready(ready);
        })
    }

    pub fn peer_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.inner.stream.peer_addr()
    }

    pub fn set_user_data(&self, data: D) -> D {
        std::mem::replace(&mut self.inner.user_data.lock().unwrap(), data)
    }

    pub fn with_user_data<R>(&self, f: impl FnOnce(&D) -> R) -> R {
        f(&self.inner.user_data.lock().unwrap())
    }

    /// Reads directly from the socket into one contiguous buffer.
    /// Returns without issuing a syscall if the socket isn't currently
    /// `ReadReady` (nothing's arrived since the last `EAGAIN`) — callers
    /// should wait for the next `on_readable`. `bytes_transferred() ==
    /// 0` means the peer closed the connection; `Errno(EAGAIN)` means
    /// there's nothing to read right now.
    pub fn read(&self, buf: &mut [u8]) -> Result<IoContext, Error> {
        if !self.inner.read_ready.load(Ordering::SeqCst) {
            return Err(Error::Errno(libc::EAGAIN));
        }
        let result = (&self.inner.stream).read(buf);
        self.classify_read(result, DataType::Ptr)
    }

    /// Reads into several buffers with a single `readv`. Same `ReadReady`
    /// gating as [`Socket::read`].
    pub fn read_vectored(&self, bufs: &mut [Vec<u8>]) -> Result<IoContext, Error> {
        if !self.inner.read_ready.load(Ordering::SeqCst) {
            return Err(Error::Errno(libc::EAGAIN));
        }
        let mut slices: Vec<IoSliceMut> = bufs.iter_mut().map(|b| IoSliceMut::new(b)).collect();
        let result = (&self.inner.stream).read_vectored(&mut slices);
        self.classify_read(result, DataType::Vec)
    }

    fn classify_read(&self, result: io::Result<usize>, data_type: DataType) -> Result<IoContext, Error> {
        match result {
            Ok(n) => Ok(IoContext::new(IoType::Sock, data_type, n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.inner.read_ready.store(false, Ordering::SeqCst);
                Err(Error::Errno(libc::EAGAIN))
            }
            Err(e) => {
                self.inner.read_ready.store(false, Ordering::SeqCst);
                Err(Error::Io(e))
            }
        }
    }

    /// Queues `data` for write, invoking `completion` exactly once with
    /// the result. If nothing else is in flight, attempts one non-blocking
    /// write syscall immediately; otherwise appends to the FIFO backlog
    /// behind whatever is already in flight or already waiting.
    pub fn write<F>(&self, data: Vec<u8>, completion: F) -> Result<(), Error>
    where
        F: FnOnce(IoContext, ErrorCode) + Send + 'static,
    {
        self.queue_write(Buf::Ptr(data), Box::new(completion))
    }

    /// Queues several buffers for a single `writev`, same completion and
    /// backlog semantics as [`Socket::write`].
    pub fn write_vectored<F>(&self, bufs: Vec<Vec<u8>>, completion: F) -> Result<(), Error>
    where
        F: FnOnce(IoContext, ErrorCode) + Send + 'static,
    {
        self.queue_write(Buf::Vec(bufs), Box::new(completion))
    }

    fn queue_write(&self, buf: Buf, completion: Completion) -> Result<(), Error> {
        let req = WriteRequest {
            buf,
            written: 0,
            completion,
        };

        let mut ws = self.inner.write_state.lock().unwrap();
        if ws.current.is_some() {
            ws.backlog.push_back(req);
            return Ok(());
        }

        match issue(&self.inner.stream, req) {
            Issued::Pending(req) => {
                ws.current = Some(req);
                drop(ws);
                self.inner
                    .monitor
                    .rewatch(self.inner.fd, Ready::readable() | Ready::writable())?;
            }
            Issued::Done(req, code) => {
                drop(ws);
                complete_request(req, code);
                self.advance_writes(true)?;
            }
        }

        Ok(())
    }

    /// Drains the write backlog: pops the head, installs it as the
    /// in-flight request, issues one non-blocking write. Stops on the
    /// first `EAGAIN` (or short write) — the next `EPOLLOUT` continues.
    /// When the backlog empties with nothing in flight, clears
    /// `WriteInFlight` and, if `drain_if_empty`, calls `on_drain` and
    /// drops back to readable-only interest.
    pub fn advance_writes(&self, drain_if_empty: bool) -> Result<(), Error> {
        loop {
            let mut ws = self.inner.write_state.lock().unwrap();
            if ws.current.is_some() {
                return Ok(());
            }

            let Some(req) = ws.backlog.pop_front() else {
                drop(ws);
                if drain_if_empty {
                    self.inner.monitor.rewatch(self.inner.fd, Ready::readable())?;
                    self.invoke_on_drain();
                }
                return Ok(());
            };
            drop(ws);

            match issue(&self.inner.stream, req) {
                Issued::Pending(req) => {
                    self.inner.write_state.lock().unwrap().current = Some(req);
                    self.inner
                        .monitor
                        .rewatch(self.inner.fd, Ready::readable() | Ready::writable())?;
                    return Ok(());
                }
                Issued::Done(req, code) => {
                    complete_request(req, code);
                    continue;
                }
            }
        }
    }

    fn invoke_on_drain(&self) {
        if let Some(cb) = self.inner.callbacks.on_drain.clone() {
            let socket = self.clone();
            self.dispatch(move || {
                cb(&socket);
                0
            });
        }
    }

    /// Unregisters the socket from its monitor. Dropping the last
    /// `Socket`/closure reference afterward closes the underlying fd.
    pub fn destroy(&self) -> Result<(), Error> {
        debug_assert!(
            self.inner.write_state.lock().unwrap().backlog.is_empty(),
            "destroy called with a non-empty write backlog"
        );
        self.inner.monitor.unwatch(self.inner.fd)
    }

    fn dispatch(&self, handler: impl FnOnce() -> ErrorCode + Send + 'static) {
        let affinity = *self.inner.affinity.lock().unwrap();
        let mut event = Event::new(SOCKET_EVENT_TYPE, self.inner.priority);
        if let Some(idx) = affinity {
            event = event.with_affinity(idx);
        }
        event.bind(Box::new(handler), Box::new(|_code| {}));

        if let Ok(idx) = self.inner.scheduler.dispatch(event) {
            *self.inner.affinity.lock().unwrap() = Some(idx);
        }
    }
}

impl<D> Inner<D>
where
    D: Send + 'static,
{
    fn socket_error(&self) -> i32 {
        let mut err: libc::c_int = 0;
        let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
        unsafe {
            libc::getsockopt(
                self.fd,
                libc::SOL_SOCKET,
                libc::SO_ERROR,
                &mut err as *mut libc::c_int as *mut libc::c_void,
                &mut len,
            );
        }
        err
    }

    /// Runs on the poller thread; only classifies the readiness bits and
    /// hands off to the scheduler. Every test below is `&` against the
    /// bit, never `|` — `is_hup()` on an all-clear `Ready` must read false.
    fn on_ready(self: &Arc<Self>, ready: Ready) {
        if ready.is_error() {
            let code = -self.socket_error().abs().max(1);
            self.invoke_error(code);
            return;
        }

        if ready.is_hup() {
            self.invoke_close();
            return;
        }

        if ready.is_writable() {
            if !self.connected.swap(true, Ordering::SeqCst) {
                // The initial watch only asked for writable readiness to
                // observe the connect completing; nothing queued a write
                // in the meantime, so drop back to readable-only interest
                // now that the handshake is done.
                let _ = self.monitor.rewatch(self.fd, Ready::readable());
                match self.socket_error() {
                    0 => self.invoke_connected(),
                    errno => self.invoke_error(-errno),
                }
            } else {
                self.complete_in_flight_and_advance();
            }
        }

        if ready.is_readable() {
            // Latched: only the edge from unset to set dispatches
            // `on_readable`. A level-triggered fd the consumer hasn't
            // fully drained keeps reporting `EPOLLIN` on every
            // `epoll_wait`, but `swap` only returns `false` (and we only
            // redispatch) the first time — every repeat until `read`
            // hits `EAGAIN` is a no-op here.
            if !self.read_ready.swap(true, Ordering::SeqCst) {
                self.invoke_readable();
            }
        }
    }

    /// EpollOut while `WriteInFlight`: take the in-flight request and
    /// retry its write syscall. A request only ever sits here because an
    /// earlier attempt returned `EAGAIN` or a short write, so it may
    /// still have unsent bytes — resuming it (rather than declaring it
    /// complete outright) is what makes a short write resumable instead
    /// of silently dropped. Once it fully drains, `advance_writes` works
    /// through whatever is left in the backlog. If nothing was actually
    /// in flight, this was a spurious or leftover wakeup, so just call
    /// `on_drain` directly.
    fn complete_in_flight_and_advance(self: &Arc<Self>) {
        let taken = self.write_state.lock().unwrap().current.take();

        let socket = Socket { inner: self.clone() };
        match taken {
            Some(req) => socket.dispatch(move || {
                match issue(&socket.inner.stream, req) {
                    Issued::Pending(req) => {
                        socket.inner.write_state.lock().unwrap().current = Some(req);
                    }
                    Issued::Done(req, code) => {
                        complete_request(req, code);
                        let _ = socket.advance_writes(true);
                    }
                }
                0
            }),
            None => socket.dispatch(move || {
                socket.invoke_on_drain();
                0
            }),
        }
    }

    fn invoke_connected(self: &Arc<Self>) {
        if let Some(cb) = self.callbacks.on_connected.clone() {
            let socket = Socket { inner: self.clone() };
            socket.dispatch(move || {
                cb(&socket);
                0
            });
        }
    }

    fn invoke_readable(self: &Arc<Self>) {
        if let Some(cb) = self.callbacks.on_readable.clone() {
            let socket = Socket { inner: self.clone() };
            socket.dispatch(move || {
                cb(&socket);
                0
            });
        }
    }

    fn invoke_error(self: &Arc<Self>, code: ErrorCode) {
        if let Some(cb) = self.callbacks.on_error.clone() {
            let socket = Socket { inner: self.clone() };
            socket.dispatch(move || {
                cb(&socket, code);
                code
            });
        }
    }

    fn invoke_close(self: &Arc<Self>) {
        if let Some(cb) = self.callbacks.on_close.clone() {
            let socket = Socket { inner: self.clone() };
            socket.dispatch(move || {
                cb(&socket);
                crate::error::CLOSE
            });
        }
    }
}

/// Creates a non-blocking socket and starts connecting it to `addr`,
/// tolerating `EINPROGRESS` the way a non-blocking `connect(2)` always
/// does — completion is observed later via `EPOLLOUT` + `SO_ERROR`.
fn nonblocking_connect(addr: SocketAddrV4) -> io::Result<RawFd> {
    unsafe {
        let fd = libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0);
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }

        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags == -1 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) == -1 {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err);
        }

        let mut sockaddr: libc::sockaddr_in = std::mem::zeroed();
        sockaddr.sin_family = libc::AF_INET as libc::sa_family_t;
        sockaddr.sin_port = addr.port().to_be();
        sockaddr.sin_addr.s_addr = u32::from_ne_bytes(addr.ip().octets());

        let ret = libc::connect(
            fd,
            &sockaddr as *const libc::sockaddr_in as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        );

        if ret == -1 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINPROGRESS) {
                libc::close(fd);
                return Err(err);
            }
        }

        Ok(fd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ready::Ready as R;

    #[test]
    fn hup_bit_alone_does_not_imply_writable_or_readable() {
        // A Ready carrying only `hup()` must not read back as readable or
        // writable too.
        let hup_only = R::hup();
        assert!(hup_only.is_hup());
        assert!(!hup_only.is_readable());
        assert!(!hup_only.is_writable());
    }

    #[test]
    fn buf_consume_trims_a_ptr_buffer_from_the_front() {
        let mut buf = Buf::Ptr(vec![1, 2, 3, 4, 5]);
        buf.consume(2);
        match &buf {
            Buf::Ptr(data) => assert_eq!(data, &[3, 4, 5]),
            Buf::Vec(_) => unreachable!(),
        }
        assert!(!buf.is_empty());
        buf.consume(3);
        assert!(buf.is_empty());
    }

    #[test]
    fn buf_consume_crosses_vector_boundaries() {
        let mut buf = Buf::Vec(vec![vec![1, 2], vec![3, 4, 5], vec![6]]);
        // Consume the whole first vector plus part of the second.
        buf.consume(3);
        match &buf {
            Buf::Vec(bufs) => assert_eq!(bufs, &[vec![4, 5], vec![6]]),
            Buf::Ptr(_) => unreachable!(),
        }
        assert_eq!(buf.data_type(), DataType::Vec);

        buf.consume(3);
        assert!(buf.is_empty());
    }

    #[test]
    fn buf_consume_never_overruns_on_a_count_past_the_end() {
        let mut buf = Buf::Ptr(vec![1, 2, 3]);
        buf.consume(100);
        assert!(buf.is_empty());
    }
}
