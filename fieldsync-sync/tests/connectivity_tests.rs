use fieldsync_sync::{ConnectivityMonitor, EventBus, SyncEvent};
use std::sync::{Arc, Mutex};

fn monitor(initially_online: bool) -> (ConnectivityMonitor, Arc<Mutex<Vec<&'static str>>>) {
    let bus = EventBus::default();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    bus.add_listener(move |event| sink.lock().unwrap().push(event.name()));
    (ConnectivityMonitor::new(initially_online, bus), seen)
}

#[test]
fn reports_initial_state() {
    let (online, _) = monitor(true);
    let (offline, _) = monitor(false);
    assert!(online.is_online());
    assert!(!offline.is_online());
}

#[test]
fn transition_emits_event() {
    let (monitor, seen) = monitor(true);

    assert!(monitor.set_online(false));
    assert!(!monitor.is_online());
    assert!(monitor.set_online(true));

    assert_eq!(*seen.lock().unwrap(), vec!["offline", "online"]);
}

#[test]
fn repeated_report_is_ignored() {
    let (monitor, seen) = monitor(false);

    assert!(!monitor.set_online(false));
    assert!(monitor.set_online(true));
    assert!(!monitor.set_online(true));

    assert_eq!(*seen.lock().unwrap(), vec!["online"]);
}

#[test]
fn clones_share_state() {
    let (monitor, _) = monitor(false);
    let other = monitor.clone();
    other.set_online(true);
    assert!(monitor.is_online());
}

#[tokio::test]
async fn watch_observes_transition() {
    let (monitor, _) = monitor(false);
    let mut rx = monitor.watch();

    monitor.set_online(true);

    rx.changed().await.unwrap();
    assert!(*rx.borrow());
}

#[tokio::test]
async fn watch_ignores_repeated_report() {
    let (monitor, _) = monitor(true);
    let rx = monitor.watch();

    monitor.set_online(true);

    assert!(!rx.has_changed().unwrap());
}

#[tokio::test]
async fn subscriber_sees_offline_event() {
    let bus = EventBus::default();
    let mut rx = bus.subscribe();
    let monitor = ConnectivityMonitor::new(true, bus);

    monitor.set_online(false);

    assert!(matches!(rx.recv().await.unwrap(), SyncEvent::Offline { .. }));
}
