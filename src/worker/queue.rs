//! Per-worker band storage: five `VecDeque<Event>`s behind one `Mutex`,
//! woken through a `Condvar` — push locks, pushes, notifies; wait locks
//! and predicate-waits on the same mutex, so no wakeup delivered between
//! a push and the waiter's lock acquisition can be lost.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::event::{Event, Priority};

struct Bands {
    queues: [VecDeque<Event>; Priority::COUNT],
    stopping: bool,
}

pub(crate) struct BandQueue {
    bands: Mutex<Bands>,
    condvar: Condvar,
}

impl BandQueue {
    pub(crate) fn new() -> BandQueue {
        BandQueue {
            bands: Mutex::new(Bands {
                queues: Default::default(),
                stopping: false,
            }),
            condvar: Condvar::new(),
        }
    }

    pub(crate) fn push(&self, event: Event) {
        let mut bands = self.bands.lock().unwrap();
        bands.queues[event.priority().index()].push_back(event);
        self.condvar.notify_one();
    }

    /// Marks this worker's queue as stopping and wakes it so a blocked
    /// `wait()` returns instead of sleeping forever.
    pub(crate) fn stop(&self) {
        let mut bands = self.bands.lock().unwrap();
        bands.stopping = true;
        self.condvar.notify_one();
    }

    /// Blocks until some band holds an event or `stop()` has been called.
    /// Returns whether this worker is stopping.
    pub(crate) fn wait(&self) -> bool {
        let bands = self.bands.lock().unwrap();
        let bands = self
            .condvar
            .wait_while(bands, |b| !b.stopping && b.queues.iter().all(VecDeque::is_empty))
            .unwrap();
        bands.stopping
    }

    /// Takes the entire current contents of one band, leaving it empty for
    /// events dispatched while the snapshot is being drained.
    pub(crate) fn take(&self, priority: Priority) -> VecDeque<Event> {
        std::mem::take(&mut self.bands.lock().unwrap().queues[priority.index()])
    }

    /// Puts `remaining` back at the front of `priority`'s live queue, ahead
    /// of anything dispatched while it was out being drained, so FIFO
    /// order survives an interruption mid-band.
    pub(crate) fn requeue_front(&self, priority: Priority, mut remaining: VecDeque<Event>) {
        let mut bands = self.bands.lock().unwrap();
        let live = &mut bands.queues[priority.index()];
        remaining.append(live);
        *live = remaining;
    }

    pub(crate) fn pending(&self, priority: Priority) -> bool {
        !self.bands.lock().unwrap().queues[priority.index()].is_empty()
    }

    pub(crate) fn any_pending(&self) -> bool {
        self.bands.lock().unwrap().queues.iter().any(|q| !q.is_empty())
    }
}
