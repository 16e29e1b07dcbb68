use std::sync::mpsc;
use std::time::Duration;

use evdisp::{Emitter, Error, Event, Priority, Scheduler};

#[test]
fn destroy_is_rejected_while_an_event_is_pending() {
    let scheduler = Scheduler::start(2).unwrap();
    let emitter: Emitter<()> = Emitter::create(scheduler.clone(), ());

    let (release_tx, release_rx) = mpsc::channel::<()>();
    emitter
        .set_handler(0, move |_emitter, _ty| {
            release_rx.recv_timeout(Duration::from_secs(5)).ok();
            0
        })
        .unwrap();

    let (done_tx, done_rx) = mpsc::channel();
    emitter
        .post(Event::new(0, Priority::Norm), move |code| {
            done_tx.send(code).unwrap();
        })
        .unwrap();

    // Give the worker a moment to pick the event up and block inside the
    // handler before asserting on `pending`.
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(emitter.pending(), 1);
    assert!(matches!(emitter.clone().destroy(), Err(Error::Invalid)));

    release_tx.send(()).unwrap();
    done_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    assert_eq!(emitter.pending(), 0);
    emitter.destroy().unwrap();

    scheduler.stop();
}

#[test]
fn ping_pong_between_two_emitters() {
    let scheduler = Scheduler::start(2).unwrap();
    let emitter_a: Emitter<()> = Emitter::create(scheduler.clone(), ());
    let emitter_b: Emitter<()> = Emitter::create(scheduler.clone(), ());

    let (tx, rx) = mpsc::channel();

    let b_for_a = emitter_b.clone();
    emitter_a
        .set_handler(0, move |_emitter, _ty| {
            b_for_a.post(Event::new(0, Priority::Norm), |_| {}).unwrap();
            0
        })
        .unwrap();

    emitter_b
        .set_handler(0, move |_emitter, _ty| {
            tx.send("pong").unwrap();
            0
        })
        .unwrap();

    emitter_a.post(Event::new(0, Priority::Norm), |_| {}).unwrap();

    assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "pong");

    scheduler.stop();
}
