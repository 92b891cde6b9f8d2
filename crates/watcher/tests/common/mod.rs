//! Common utilities for integration tests

#![allow(dead_code)]

use fsnotify_watcher::{Event, MemoryBackend, MemoryController, WatchError, Watcher, WatcherConfig};
use crossbeam_channel::Receiver;
use std::time::Duration;

/// Upper bound for anything the delivery loop should do promptly
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Window used to check that nothing arrives
pub const QUIET: Duration = Duration::from_millis(100);

/// Install a test-friendly tracing subscriber (once per binary)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Watcher over the in-memory backend, plus the controller driving it
pub fn memory_watcher(config: WatcherConfig) -> (Watcher<MemoryBackend>, MemoryController) {
    init_tracing();
    let controller = MemoryController::new();
    let backend_controller = controller.clone();
    let watcher = Watcher::with_backend(config, move |feed| Ok(backend_controller.connect(feed)))
        .expect("memory backend always connects");
    (watcher, controller)
}

pub fn next_event(events: &Receiver<Event>) -> Event {
    events
        .recv_timeout(TIMEOUT)
        .expect("timed out waiting for an event")
}

pub fn next_error(errors: &Receiver<WatchError>) -> WatchError {
    errors
        .recv_timeout(TIMEOUT)
        .expect("timed out waiting for an error")
}

pub fn assert_quiet<T: std::fmt::Debug>(rx: &Receiver<T>) {
    if let Ok(value) = rx.recv_timeout(QUIET) {
        panic!("expected nothing, got {:?}", value);
    }
}
