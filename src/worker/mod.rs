//! Priority-scheduled worker pool.
//!
//! Each worker thread owns one [`queue::BandQueue`] with five bands —
//! Crit, Emrg, High, Norm, Idle — and drains them under a strict
//! preemption rule: Crit always finishes uninterrupted; Emrg yields to
//! Crit; High yields to Crit/Emrg and records how many events it
//! drained as `ratio`; Norm yields to Crit/Emrg unconditionally and back
//! to High once every [`HIGH_NORM_RATIO`] Norm events, unless High had
//! nothing to do last time through (`high == false`), in which case Norm
//! yields back to High on its very first event; Idle yields to
//! anything. Each band is its own queue, so a drained event's priority
//! matching the band being drained is an invariant `debug_assert!`
//! confirms rather than a runtime check.

mod queue;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::error::Error;
use crate::event::{Event, Priority};
use queue::BandQueue;

/// For every `HIGH_NORM_RATIO` Norm events drained, Norm yields back to
/// check High once.
const HIGH_NORM_RATIO: i64 = 5;

/// Owns `n` worker threads, each with its own five-band queue. Events are
/// assigned a worker by round robin on first dispatch unless the event
/// carries an explicit affinity; callers that want to keep related events
/// on one worker should cache the index this returns and pass it back via
/// [`Event::with_affinity`].
pub struct Scheduler {
    queues: Vec<Arc<BandQueue>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    next: AtomicUsize,
}

impl Scheduler {
    /// Spawns `n` worker threads. If a thread fails to spawn partway
    /// through, every already-spawned worker is stopped and joined before
    /// returning the error — no half-started pool is left running.
    pub fn start(n: usize) -> Result<Arc<Scheduler>, Error> {
        if n == 0 {
            return Err(Error::Invalid);
        }

        let queues: Vec<Arc<BandQueue>> = (0..n).map(|_| Arc::new(BandQueue::new())).collect();
        let mut handles = Vec::with_capacity(n);

        for (idx, q) in queues.iter().cloned().enumerate() {
            let built = thread::Builder::new()
                .name(format!("evdisp-worker-{idx}"))
                .spawn(move || worker_loop(idx, q));

            match built {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    log::warn!("worker {idx} failed to spawn: {err}");
                    for q in &queues[..idx] {
                        q.stop();
                    }
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(Error::Io(err));
                }
            }
        }

        Ok(Arc::new(Scheduler {
            queues,
            handles: Mutex::new(handles),
            next: AtomicUsize::new(0),
        }))
    }

    pub fn worker_count(&self) -> usize {
        self.queues.len()
    }

    /// Dispatches `event` to the worker its affinity names, or to the next
    /// worker in round-robin order if it has none (or an out-of-range
    /// one). Returns the worker index used, so the caller can pin later
    /// events from the same source to it with [`Event::with_affinity`].
    pub fn dispatch(&self, mut event: Event) -> Result<usize, Error> {
        let idx = match event.affinity() {
            Some(i) if i < self.queues.len() => i,
            _ => {
                let i = self.next.fetch_add(1, Ordering::Relaxed) % self.queues.len();
                event.set_affinity(i);
                i
            }
        };

        self.queues[idx].push(event);
        Ok(idx)
    }

    /// Signals every worker to drain what's queued and exit, then joins
    /// all of them. Blocks until the last worker thread returns.
    pub fn stop(&self) {
        for q in &self.queues {
            q.stop();
        }

        let mut handles = self.handles.lock().unwrap();
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn run_event(mut event: Event) {
    let code = event.run();
    event.done(code);
}

#[derive(Clone, Copy)]
enum Stage {
    Crit,
    Emrg,
    High,
    Norm,
    Idle,
}

fn worker_loop(idx: usize, q: Arc<BandQueue>) {
    log::debug!("worker {idx} initialized");

    loop {
        let stopping = q.wait();
        drain_cycle(&q);
        if stopping && !q.any_pending() {
            break;
        }
    }

    log::debug!("worker {idx} stopped");
}

/// Runs every band from Crit down to Idle once, honoring preemption
/// between bands, and returns once Idle has drained with nothing higher
/// pending. A single call handles one wakeup's worth of work; the caller
/// loops it until there's nothing left, which is also how a stopping
/// worker flushes its backlog before exiting.
fn drain_cycle(q: &BandQueue) {
    let mut stage = Stage::Crit;
    let mut ratio: i64 = 0;
    let mut high = false;

    'dispatch: loop {
        match stage {
            Stage::Crit => {
                let mut events = q.take(Priority::Crit);
                while let Some(event) = events.pop_front() {
                    debug_assert_eq!(event.priority(), Priority::Crit);
                    run_event(event);
                }
                stage = Stage::Emrg;
            }

            Stage::Emrg => {
                let mut events = q.take(Priority::Emrg);
                while let Some(event) = events.pop_front() {
                    debug_assert_eq!(event.priority(), Priority::Emrg);
                    run_event(event);

                    if q.pending(Priority::Crit) {
                        q.requeue_front(Priority::Emrg, events);
                        stage = Stage::Crit;
                        continue 'dispatch;
                    }
                }
                stage = Stage::High;
            }

            Stage::High => {
                let mut events = q.take(Priority::High);
                ratio = events.len() as i64;
                high = ratio != 0;

                while let Some(event) = events.pop_front() {
                    debug_assert_eq!(event.priority(), Priority::High);
                    run_event(event);

                    if q.pending(Priority::Crit) {
                        q.requeue_front(Priority::High, events);
                        stage = Stage::Crit;
                        continue 'dispatch;
                    }
                    if q.pending(Priority::Emrg) {
                        q.requeue_front(Priority::High, events);
                        stage = Stage::Emrg;
                        continue 'dispatch;
                    }
                }
                stage = Stage::Norm;
            }

            Stage::Norm => {
                let mut events = q.take(Priority::Norm);
                ratio /= HIGH_NORM_RATIO;

                while let Some(event) = events.pop_front() {
                    run_event(event);

                    if q.pending(Priority::Crit) {
                        q.requeue_front(Priority::Norm, events);
                        stage = Stage::Crit;
                        continue 'dispatch;
                    }
                    if q.pending(Priority::Emrg) {
                        q.requeue_front(Priority::Norm, events);
                        stage = Stage::Emrg;
                        continue 'dispatch;
                    }
                    if q.pending(Priority::High) && (!high || ratio == 0) {
                        q.requeue_front(Priority::Norm, events);
                        stage = Stage::High;
                        continue 'dispatch;
                    }

                    ratio -= 1;
                }
                stage = Stage::Idle;
            }

            Stage::Idle => {
                let mut events = q.take(Priority::Idle);

                while let Some(event) = events.pop_front() {
                    run_event(event);

                    if q.pending(Priority::Crit) {
                        q.requeue_front(Priority::Idle, events);
                        stage = Stage::Crit;
                        continue 'dispatch;
                    }
                    if q.pending(Priority::Emrg) {
                        q.requeue_front(Priority::Idle, events);
                        stage = Stage::Emrg;
                        continue 'dispatch;
                    }
                    if q.pending(Priority::High) {
                        q.requeue_front(Priority::Idle, events);
                        stage = Stage::High;
                        continue 'dispatch;
                    }
                    if q.pending(Priority::Norm) {
                        q.requeue_front(Priority::Idle, events);
                        stage = Stage::Norm;
                        continue 'dispatch;
                    }
                }
                break 'dispatch;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use std::sync::mpsc;
    use std::time::Duration;

    fn tagged_event(priority: Priority, tag: &'static str, tx: mpsc::Sender<&'static str>) -> Event {
        let mut event = Event::new(0, priority);
        event.bind(
            Box::new(move || {
                let _ = tx.send(tag);
                0
            }),
            Box::new(|_| {}),
        );
        event
    }

    #[test]
    fn drains_in_strict_priority_order_within_one_cycle() {
        let q = BandQueue::new();
        let (tx, rx) = mpsc::channel();

        q.push(tagged_event(Priority::Idle, "idle", tx.clone()));
        q.push(tagged_event(Priority::Norm, "norm", tx.clone()));
        q.push(tagged_event(Priority::Crit, "crit", tx.clone()));
        q.push(tagged_event(Priority::High, "high", tx.clone()));
        q.push(tagged_event(Priority::Emrg, "emrg", tx));

        drain_cycle(&q);

        let order: Vec<_> = rx.try_iter().collect();
        assert_eq!(order, vec!["crit", "emrg", "high", "norm", "idle"]);
    }

    #[test]
    fn crit_queued_mid_norm_is_requeued_and_preempts_the_next_cycle() {
        let q = Arc::new(BandQueue::new());
        let (tx, rx) = mpsc::channel();

        let q_in_handler = q.clone();
        let tx_crit = tx.clone();
        let mut norm_1 = Event::new(0, Priority::Norm);
        norm_1.bind(
            Box::new(move || {
                let _ = tx_crit.send("norm-1");
                // Simulates Crit work arriving while this Norm event runs.
                q_in_handler.push(tagged_event(Priority::Crit, "crit", tx_crit.clone()));
                0
            }),
            Box::new(|_| {}),
        );
        let norm_2 = tagged_event(Priority::Norm, "norm-2", tx.clone());

        q.push(norm_1);
        q.push(norm_2);

        // norm-1 runs, queues crit, sees Crit pending, requeues norm-2 to
        // the front of Norm, and jumps back to Crit without returning —
        // crit and the deferred norm-2 both finish within this one call.
        drain_cycle(&q);
        // Nothing left to drain; confirms the cascade really did settle.
        drain_cycle(&q);

        let seen: Vec<_> = rx.try_iter().collect();
        assert_eq!(seen, vec!["norm-1", "crit", "norm-2"]);
    }

    #[test]
    fn scheduler_round_robins_without_affinity() {
        let scheduler = Scheduler::start(2).unwrap();
        let (tx, rx) = mpsc::channel();

        for _ in 0..4 {
            let mut event = Event::new(0, Priority::Norm);
            let tx = tx.clone();
            event.bind(Box::new(move || { let _ = tx.send(()); 0 }), Box::new(|_| {}));
            scheduler.dispatch(event).unwrap();
        }

        for _ in 0..4 {
            rx.recv_timeout(Duration::from_secs(1)).expect("event should run");
        }

        scheduler.stop();
    }

    #[test]
    fn scheduler_honors_affinity_returned_from_first_dispatch() {
        let scheduler = Scheduler::start(4).unwrap();
        let mut event = Event::new(0, Priority::Norm);
        event.bind(Box::new(|| 0), Box::new(|_| {}));
        let idx = scheduler.dispatch(event).unwrap();
        assert!(idx < 4);

        let mut pinned = Event::new(0, Priority::Norm).with_affinity(idx);
        assert_eq!(pinned.affinity(), Some(idx));
        pinned.bind(Box::new(|| 0), Box::new(|_| {}));
        let idx2 = scheduler.dispatch(pinned).unwrap();
        assert_eq!(idx, idx2);

        scheduler.stop();
    }

    /// Scenario 3 from the testable-properties list: a flood of Norm
    /// events with one Crit event posted while they're draining must see
    /// the Crit handler run strictly before all but a small bounded
    /// number of the Norm events — not queued behind the whole flood.
    #[test]
    fn crit_event_preempts_a_flood_of_norm_events() {
        let scheduler = Scheduler::start(1).unwrap();
        let (tx, rx) = mpsc::channel::<&'static str>();

        for i in 0..1000 {
            let mut event = Event::new(0, Priority::Norm).with_affinity(0);
            if i == 0 {
                let scheduler_in_handler = scheduler.clone();
                let tx_crit = tx.clone();
                event.bind(
                    Box::new(move || {
                        let _ = tx_crit.send("norm");
                        let crit = tagged_event(Priority::Crit, "crit", tx_crit.clone()).with_affinity(0);
                        scheduler_in_handler.dispatch(crit).unwrap();
                        0
                    }),
                    Box::new(|_| {}),
                );
            } else {
                event = tagged_event(Priority::Norm, "norm", tx.clone()).with_affinity(0);
            }
            scheduler.dispatch(event).unwrap();
        }

        let mut seen = Vec::new();
        while seen.len() < 1001 {
            seen.push(rx.recv_timeout(Duration::from_secs(5)).expect("event should run"));
        }

        let crit_pos = seen.iter().position(|tag| *tag == "crit").expect("crit should run");
        // Bounded preemption: Crit runs after at most a handful of Norm
        // events, nowhere near the back of the 1000-event flood.
        assert!(crit_pos <= 5, "crit ran at position {crit_pos}, expected <= 5");

        scheduler.stop();
    }
}
