use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::mpsc;
use std::time::Duration;

use evdisp::{Error, Monitor, Ready};

#[test]
fn watching_an_already_watched_fd_is_rejected_and_unwatch_allows_rewatch() {
    let monitor = Monitor::start(1).unwrap();
    let (a, _b) = UnixStream::pair().unwrap();
    let fd = a.as_raw_fd();

    monitor.watch(fd, Ready::readable(), |_ready| {}).unwrap();

    let second = monitor.watch(fd, Ready::readable(), |_ready| {});
    assert!(matches!(second, Err(Error::AlreadyRegistered)));

    monitor.unwatch(fd).unwrap();
    assert!(matches!(monitor.unwatch(fd), Err(Error::NotFound)));

    // Having been unwatched, the fd can be registered again.
    monitor.watch(fd, Ready::readable(), |_ready| {}).unwrap();
    monitor.unwatch(fd).unwrap();

    monitor.fini();
}

/// Scenario 6: `watch(fd, cb1)` then `watch(fd, cb2)` — the second call
/// is rejected and the registration keeps calling `cb1`, never `cb2`.
#[test]
fn rejected_second_watch_leaves_the_first_callback_installed() {
    let monitor = Monitor::start(1).unwrap();
    let (a, b) = UnixStream::pair().unwrap();
    let fd = a.as_raw_fd();

    let (tx1, rx1) = mpsc::channel::<()>();
    let (tx2, rx2) = mpsc::channel::<()>();

    monitor
        .watch(fd, Ready::readable(), move |_ready| {
            let _ = tx1.send(());
        })
        .unwrap();

    let second = monitor.watch(fd, Ready::readable(), move |_ready| {
        let _ = tx2.send(());
    });
    assert!(matches!(second, Err(Error::AlreadyRegistered)));

    b.set_nonblocking(true).unwrap();
    let mut peer = b;
    std::io::Write::write_all(&mut peer, b"x").unwrap();

    rx1.recv_timeout(Duration::from_secs(2)).expect("cb1 should fire");
    assert!(rx2.try_recv().is_err(), "cb2 must never be installed or fire");

    monitor.unwatch(fd).unwrap();
    monitor.fini();
}
