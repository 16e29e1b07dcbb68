//! Per-object event demultiplexer.
//!
//! An `Emitter<D>` indexes `MAX_TYPES` handler slots by event type, posts
//! events to a [`Scheduler`](crate::worker::Scheduler), and completes with
//! `NoHandler` when a slot is empty or was cleared between post and run.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{Error, ErrorCode};
use crate::event::{Event, EventType};
use crate::worker::Scheduler;

/// Event types are small integers in `[0, MAX_TYPES)`.
pub const MAX_TYPES: usize = 8;

/// A per-type handler, invoked with the owning emitter and the event type
/// that triggered it. Returns the result code passed to the event's
/// completion.
pub type Handler<D> = Arc<dyn Fn(&Emitter<D>, EventType) -> ErrorCode + Send + Sync>;

struct Inner<D> {
    handlers: Mutex<[Option<Handler<D>>; MAX_TYPES]>,
    pending: AtomicUsize,
    user_data: Mutex<D>,
    scheduler: Arc<Scheduler>,
}

/// Routes events of up to [`MAX_TYPES`] distinct types to per-type
/// handlers on behalf of an owner (a [`Socket`](crate::net::socket::Socket),
/// a [`Server`](crate::net::server::Server), or application code directly).
pub struct Emitter<D = ()> {
    inner: Arc<Inner<D>>,
}

impl<D> Clone for Emitter<D> {
    fn clone(&self) -> Self {
        Emitter {
            inner: self.inner.clone(),
        }
    }
}

impl<D> Emitter<D>
where
    D: Send + 'static,
{
    /// Creates an emitter whose handler slots all default to the reject
    /// handler (`NoHandler`), bound to `scheduler` for dispatch.
    pub fn create(scheduler: Arc<Scheduler>, user_data: D) -> Emitter<D> {
        const NONE: Option<Handler<D>> = None;
        Emitter {
            inner: Arc::new(Inner {
                handlers: Mutex::new([NONE; MAX_TYPES]),
                pending: AtomicUsize::new(0),
                user_data: Mutex::new(user_data),
                scheduler,
            }),
        }
    }

    /// Number of events posted via this emitter and not yet completed.
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    pub fn set_handler<F>(&self, ty: EventType, f: F) -> Result<(), Error>
    where
        F: Fn(&Emitter<D>, EventType) -> ErrorCode + Send + Sync + 'static,
    {
        let idx = check_type(ty)?;
        self.inner.handlers.lock().unwrap()[idx] = Some(Arc::new(f));
        Ok(())
    }

    pub fn clear_handler(&self, ty: EventType) -> Result<(), Error> {
        let idx = check_type(ty)?;
        self.inner.handlers.lock().unwrap()[idx] = None;
        Ok(())
    }

    pub fn set_user_data(&self, data: D) -> D {
        let mut guard = self.inner.user_data.lock().unwrap();
        std::mem::replace(&mut *guard, data)
    }

    pub fn with_user_data<R>(&self, f: impl FnOnce(&D) -> R) -> R {
        f(&self.inner.user_data.lock().unwrap())
    }

    /// Binds `completion` and a framework-provided type handler to `event`,
    /// increments `pending`, and dispatches it to the scheduler.
    ///
    /// Rejects synchronously, before any dispatch, with `OutOfRange` if
    /// the event's type is out of range, or `NoHandler` if no handler is
    /// currently installed for that type — the type handler itself
    /// re-reads the slot when it actually runs, so a handler cleared after
    /// this check still completes with `NoHandler` rather than running a
    /// stale closure.
    pub fn post<F>(&self, mut event: Event, completion: F) -> Result<(), Error>
    where
        F: FnOnce(ErrorCode) + Send + 'static,
    {
        let idx = check_type(event.event_type())?;

        {
            let handlers = self.inner.handlers.lock().unwrap();
            if handlers[idx].is_none() {
                return Err(Error::NoHandler);
            }
        }

        self.inner.pending.fetch_add(1, Ordering::AcqRel);

        let inner = self.inner.clone();
        let emitter = self.clone();
        let type_handler = Box::new(move || {
            let handler = { inner.handlers.lock().unwrap()[idx].clone() };
            let code = match handler {
                Some(h) => h(&emitter, idx as EventType),
                None => Error::NoHandler.to_code(),
            };
            inner.pending.fetch_sub(1, Ordering::AcqRel);
            code
        });

        event.bind(type_handler, Box::new(completion));

        if let Err(e) = self.inner.scheduler.dispatch(event) {
            self.inner.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(e);
        }

        Ok(())
    }

    /// Rejects with `Invalid` while events posted via this emitter are
    /// still in flight. With no pending events, dropping the returned
    /// `Emitter` (or letting `self` go out of scope) releases it; Rust's
    /// ownership model means there is no separate free step to perform
    /// here.
    pub fn destroy(self) -> Result<(), Error> {
        if self.pending() != 0 {
            return Err(Error::Invalid);
        }
        Ok(())
    }
}

fn check_type(ty: EventType) -> Result<usize, Error> {
    let idx = ty as usize;
    if idx >= MAX_TYPES {
        Err(Error::OutOfRange)
    } else {
        Ok(idx)
    }
}
