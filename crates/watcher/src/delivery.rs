//! Background delivery loop
//!
//! Reads the backend feed, drops notifications for paths that are no longer
//! watched, maps raw codes through the backend's table and pushes the
//! resulting events in feed order. One thread per watcher.

use crate::error::WatchError;
use crate::platform::{Backend, BackendMessage, Translation};
use crate::registry::normalize_path;
use crate::watcher::Shared;
use anyhow::anyhow;
use crossbeam_channel::{select, Receiver, Sender, TrySendError};
use fsnotify_core::{Event, Op};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, trace, warn};

enum Flow {
    Continue,
    /// Close was requested while the loop was busy
    Shutdown,
    Stop,
}

pub(crate) struct DeliveryLoop<B: Backend> {
    pub(crate) shared: Arc<Shared<B>>,
    pub(crate) feed: Receiver<BackendMessage<B::Code>>,
    pub(crate) events: Sender<Event>,
    pub(crate) errors: Sender<WatchError>,
    /// Loop-side receiver used to evict the oldest error when full
    pub(crate) stale_errors: Receiver<WatchError>,
    /// Never sent on; disconnects when the watcher closes
    pub(crate) shutdown: Receiver<()>,
}

impl<B: Backend> DeliveryLoop<B> {
    /// Run until the watcher closes or the backend fails
    ///
    /// Returning drops the outbound senders, which ends both streams.
    pub(crate) fn run(self) {
        debug!("Delivery loop started");

        loop {
            select! {
                recv(self.feed) -> message => match message {
                    Ok(message) => match self.handle(message) {
                        Flow::Continue => {}
                        Flow::Shutdown => {
                            self.drain();
                            break;
                        }
                        Flow::Stop => break,
                    },
                    Err(_) => {
                        if !self.shared.is_closing() {
                            self.fail(anyhow!("backend feed disconnected"));
                        }
                        break;
                    }
                },
                recv(self.shutdown) -> _ => {
                    self.drain();
                    break;
                }
            }
        }

        debug!("Delivery loop stopped");
    }

    fn handle(&self, message: BackendMessage<B::Code>) -> Flow {
        match message {
            BackendMessage::Notification { path, code } => match self.normalize(path, code) {
                Some(Ok(event)) => self.push_event(event),
                Some(Err(err)) => self.push_error(err),
                None => Flow::Continue,
            },
            BackendMessage::Malformed { path, reason } => {
                debug!("Malformed notification: {}", reason);
                self.push_error(WatchError::MalformedNotification { path, reason })
            }
            BackendMessage::Error(err) => {
                warn!("Backend error: {:#}", err);
                self.push_error(WatchError::Backend(err))
            }
            BackendMessage::Failed(err) => {
                self.fail(err);
                Flow::Stop
            }
        }
    }

    /// Filter a raw notification against the registry and translate it
    ///
    /// `None` means the notification is dropped without a trace on either
    /// stream.
    fn normalize(&self, path: PathBuf, code: B::Code) -> Option<Result<Event, WatchError>> {
        if !self.shared.registry.covers(&normalize_path(&path)) {
            trace!("Dropping {:?} for unwatched {}", code, path.display());
            return None;
        }

        match B::translate(&code) {
            Translation::Op(op) if !op.is_empty() && Op::from_bits(op.bits()).is_some() => {
                trace!("{:?} on {} -> {}", code, path.display(), op);
                Some(Ok(Event::new(op, path)))
            }
            Translation::Op(op) => Some(Err(WatchError::MalformedNotification {
                reason: format!("{:?} maps to invalid operation bits {:#x}", code, op.bits()),
                path: Some(path),
            })),
            Translation::Ignored => {
                trace!("Ignoring {:?} on {}", code, path.display());
                None
            }
            Translation::Unrecognized => Some(Err(WatchError::MalformedNotification {
                reason: format!("unrecognized raw code {:?}", code),
                path: Some(path),
            })),
        }
    }

    /// Blocks while the event buffer is full, unless the watcher closes
    ///
    /// On close the event in hand is dropped; the buffer had no room for it.
    fn push_event(&self, event: Event) -> Flow {
        let event = match self.events.try_send(event) {
            Ok(()) => return Flow::Continue,
            Err(TrySendError::Disconnected(_)) => return Flow::Stop,
            Err(TrySendError::Full(event)) => event,
        };
        select! {
            send(self.events, event) -> res => match res {
                Ok(()) => Flow::Continue,
                Err(_) => Flow::Stop,
            },
            recv(self.shutdown) -> _ => Flow::Shutdown,
        }
    }

    /// Never blocks: when the error buffer is full the oldest error is
    /// dropped, so an undrained error stream cannot stall event delivery
    fn push_error(&self, mut err: WatchError) -> Flow {
        loop {
            match self.errors.try_send(err) {
                Ok(()) => return Flow::Continue,
                Err(TrySendError::Full(rejected)) => {
                    if let Ok(stale) = self.stale_errors.try_recv() {
                        warn!("Error buffer full, dropping: {}", stale);
                    }
                    err = rejected;
                }
                Err(TrySendError::Disconnected(_)) => return Flow::Stop,
            }
        }
    }

    /// Forward what the backend had already queued when close began,
    /// without blocking. Events that do not fit are discarded.
    ///
    /// Returns the number of discarded events.
    fn drain(&self) -> usize {
        let pending = self.feed.len();
        let mut discarded = 0usize;

        for message in self.feed.try_iter().take(pending) {
            let delivered = match message {
                BackendMessage::Notification { path, code } => match self.normalize(path, code) {
                    Some(Ok(event)) => self.events.try_send(event).is_ok(),
                    Some(Err(err)) => {
                        self.push_error(err);
                        true
                    }
                    None => true,
                },
                BackendMessage::Malformed { path, reason } => {
                    self.push_error(WatchError::MalformedNotification { path, reason });
                    true
                }
                BackendMessage::Error(err) => {
                    self.push_error(WatchError::Backend(err));
                    true
                }
                // Closing anyway
                BackendMessage::Failed(_) => break,
            };
            if !delivered {
                discarded += 1;
            }
        }

        if discarded > 0 {
            debug!("Discarded {} notifications while closing", discarded);
        }
        discarded
    }

    /// Report a broken backend once, then close the watcher
    fn fail(&self, err: anyhow::Error) {
        warn!("Backend connection failed: {:#}", err);

        if !self.shared.begin_failure() {
            // A close is already tearing everything down
            return;
        }

        // Connection is gone; no point unsubscribing
        drop(self.shared.release_backend());

        let _ = self.push_error(WatchError::BackendFailure(err));
        self.shared.finish_close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Feed, MemoryBackend, MemoryCode, MemoryController};
    use crossbeam_channel::bounded;
    use std::path::Path;

    struct Harness {
        delivery: DeliveryLoop<MemoryBackend>,
        feed: Feed<MemoryCode>,
        events: Receiver<Event>,
        errors: Receiver<WatchError>,
        shutdown: Option<Sender<()>>,
    }

    /// Loop over a memory backend watching `/w`, not yet running
    fn harness(event_capacity: usize) -> Harness {
        let (feed, feed_rx) = Feed::channel();
        let backend = MemoryController::new().connect(feed.clone());
        let shared = Arc::new(Shared::new(backend));
        shared.registry.insert(PathBuf::from("/w"), 0).unwrap();

        let (events_tx, events_rx) = bounded(event_capacity);
        let (errors_tx, errors_rx) = bounded(4);
        let (shutdown_tx, shutdown_rx) = bounded(0);

        Harness {
            delivery: DeliveryLoop {
                shared,
                feed: feed_rx,
                events: events_tx,
                errors: errors_tx,
                stale_errors: errors_rx.clone(),
                shutdown: shutdown_rx,
            },
            feed,
            events: events_rx,
            errors: errors_rx,
            shutdown: Some(shutdown_tx),
        }
    }

    fn queue(feed: &Feed<MemoryCode>, count: usize) {
        for i in 0..count {
            assert!(feed.notify(format!("/w/{i}"), MemoryCode::Modified));
        }
    }

    #[test]
    fn test_drain_forwards_queued_when_room() {
        let h = harness(16);
        queue(&h.feed, 5);

        assert_eq!(h.delivery.drain(), 0);

        let names: Vec<_> = h.events.try_iter().map(Event::into_name).collect();
        let expected: Vec<_> = (0..5).map(|i| PathBuf::from(format!("/w/{i}"))).collect();
        assert_eq!(names, expected);
    }

    #[test]
    fn test_drain_discards_overflow() {
        let h = harness(2);
        queue(&h.feed, 5);

        assert_eq!(h.delivery.drain(), 3);

        // The oldest notifications are the ones kept
        let names: Vec<_> = h.events.try_iter().map(Event::into_name).collect();
        assert_eq!(names, vec![PathBuf::from("/w/0"), PathBuf::from("/w/1")]);
    }

    #[test]
    fn test_drain_only_takes_snapshot() {
        let h = harness(16);
        queue(&h.feed, 2);

        h.delivery.drain();
        assert!(h.feed.notify("/w/late", MemoryCode::Created));

        assert_eq!(h.events.try_iter().count(), 2);
    }

    #[test]
    fn test_drain_reports_errors_and_skips_unwatched() {
        let h = harness(16);
        h.feed.notify("/elsewhere", MemoryCode::Created);
        h.feed.notify("/w/a", MemoryCode::Unknown(7));
        h.feed.error(anyhow!("overflow"));
        h.feed.notify("/w/b", MemoryCode::Deleted);

        assert_eq!(h.delivery.drain(), 0);

        let events: Vec<_> = h.events.try_iter().collect();
        assert_eq!(events, vec![Event::new(Op::REMOVE, "/w/b")]);

        let errors: Vec<_> = h.errors.try_iter().collect();
        assert_eq!(errors.len(), 2);
        assert!(matches!(&errors[0], WatchError::MalformedNotification { path: Some(p), .. } if p == Path::new("/w/a")));
        assert!(matches!(&errors[1], WatchError::Backend(_)));
    }

    #[test]
    fn test_run_delivers_everything_queued_before_close() {
        let mut h = harness(16);
        queue(&h.feed, 10);
        drop(h.shutdown.take());

        // Whichever arm wins first, nothing queued before close is lost
        h.delivery.run();

        assert_eq!(h.events.try_iter().count(), 10);
        assert!(h.events.recv().is_err());
    }
}
