//! In-process backend
//!
//! Nothing is read from the file system. A [`MemoryController`] injects
//! notifications, errors and failures, and can make the next subscribe or
//! unsubscribe fail. Used by tests and benchmarks, and by embedders that
//! produce change notifications themselves.

use super::{Backend, Feed, Translation};
use anyhow::anyhow;
use fsnotify_core::Op;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Raw codes understood by the memory backend
///
/// Loosely modeled on inotify masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryCode {
    Created,
    Modified,
    Deleted,
    MovedFrom,
    MovedTo,
    Attrib,
    Accessed,
    Unknown(u32),
}

#[derive(Default)]
struct MemoryState {
    feed: Option<Feed<MemoryCode>>,
    connected: bool,
    next_handle: u64,
    subscriptions: HashMap<u64, PathBuf>,
    reject_subscribe: Option<String>,
    reject_unsubscribe: Option<String>,
}

/// Test-side handle driving a [`MemoryBackend`]
#[derive(Clone, Default)]
pub struct MemoryController {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the backend, taking ownership of the feed
    ///
    /// Meant to be called from the connector passed to
    /// `Watcher::with_backend`.
    pub fn connect(&self, feed: Feed<MemoryCode>) -> MemoryBackend {
        let mut state = self.state.lock();
        state.feed = Some(feed);
        state.connected = true;
        MemoryBackend {
            state: Arc::clone(&self.state),
        }
    }

    /// Inject a raw notification. Returns false if nothing is listening.
    pub fn notify(&self, path: impl Into<PathBuf>, code: MemoryCode) -> bool {
        self.with_feed(|feed| feed.notify(path, code))
    }

    pub fn malformed(&self, path: Option<PathBuf>, reason: &str) -> bool {
        self.with_feed(|feed| feed.malformed(path, reason))
    }

    pub fn error(&self, message: &str) -> bool {
        let err = anyhow!("{message}");
        self.with_feed(|feed| feed.error(err))
    }

    /// Report a fatal backend failure
    pub fn fail(&self, message: &str) -> bool {
        let err = anyhow!("{message}");
        self.with_feed(|feed| feed.fail(err))
    }

    /// Drop the feed without a failure message, as a crashed backend would
    pub fn disconnect(&self) {
        self.state.lock().feed = None;
    }

    /// Make the next subscribe fail with `reason`
    pub fn reject_next_subscribe(&self, reason: &str) {
        self.state.lock().reject_subscribe = Some(reason.to_string());
    }

    /// Make the next unsubscribe fail with `reason`
    pub fn reject_next_unsubscribe(&self, reason: &str) {
        self.state.lock().reject_unsubscribe = Some(reason.to_string());
    }

    /// Paths the backend currently holds subscriptions for, sorted
    pub fn subscribed(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.state.lock().subscriptions.values().cloned().collect();
        paths.sort();
        paths
    }

    /// False once the backend has been dropped
    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn with_feed(&self, send: impl FnOnce(&Feed<MemoryCode>) -> bool) -> bool {
        // Clone out so a blocked watcher never holds up the controller lock
        let feed = self.state.lock().feed.clone();
        match feed {
            Some(feed) => send(&feed),
            None => false,
        }
    }
}

/// Backend with no OS mechanism behind it
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl Backend for MemoryBackend {
    type Handle = u64;
    type Code = MemoryCode;

    fn subscribe(&mut self, path: &Path) -> anyhow::Result<u64> {
        let mut state = self.state.lock();
        if let Some(reason) = state.reject_subscribe.take() {
            anyhow::bail!(reason);
        }
        let handle = state.next_handle;
        state.next_handle += 1;
        state.subscriptions.insert(handle, path.to_path_buf());
        Ok(handle)
    }

    fn unsubscribe(&mut self, handle: u64) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        // The subscription is gone either way, like an inotify watch whose
        // file was deleted
        let removed = state.subscriptions.remove(&handle);
        if let Some(reason) = state.reject_unsubscribe.take() {
            anyhow::bail!(reason);
        }
        match removed {
            Some(_) => Ok(()),
            None => Err(anyhow!("unknown watch handle {handle}")),
        }
    }

    fn translate(code: &MemoryCode) -> Translation {
        match code {
            MemoryCode::Created | MemoryCode::MovedTo => Translation::Op(Op::CREATE),
            MemoryCode::Modified => Translation::Op(Op::WRITE),
            MemoryCode::Deleted => Translation::Op(Op::REMOVE),
            MemoryCode::MovedFrom => Translation::Op(Op::RENAME),
            MemoryCode::Attrib => Translation::Op(Op::CHMOD),
            MemoryCode::Accessed => Translation::Ignored,
            MemoryCode::Unknown(_) => Translation::Unrecognized,
        }
    }
}

impl Drop for MemoryBackend {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.connected = false;
        state.subscriptions.clear();
        state.feed = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translation_table() {
        use MemoryCode::*;

        assert_eq!(MemoryBackend::translate(&Created), Translation::Op(Op::CREATE));
        assert_eq!(MemoryBackend::translate(&MovedTo), Translation::Op(Op::CREATE));
        assert_eq!(MemoryBackend::translate(&Modified), Translation::Op(Op::WRITE));
        assert_eq!(MemoryBackend::translate(&Deleted), Translation::Op(Op::REMOVE));
        assert_eq!(MemoryBackend::translate(&MovedFrom), Translation::Op(Op::RENAME));
        assert_eq!(MemoryBackend::translate(&Attrib), Translation::Op(Op::CHMOD));
        assert_eq!(MemoryBackend::translate(&Accessed), Translation::Ignored);
        assert_eq!(MemoryBackend::translate(&Unknown(0x4000)), Translation::Unrecognized);
    }

    #[test]
    fn test_subscribe_and_reject() {
        let controller = MemoryController::new();
        let (feed, _rx) = Feed::channel();
        let mut backend = controller.connect(feed);

        let handle = backend.subscribe(Path::new("/tmp/a")).unwrap();
        assert_eq!(controller.subscribed(), vec![PathBuf::from("/tmp/a")]);

        controller.reject_next_subscribe("too many watches");
        let err = backend.subscribe(Path::new("/tmp/b")).unwrap_err();
        assert_eq!(err.to_string(), "too many watches");
        assert_eq!(controller.subscribed().len(), 1);

        backend.unsubscribe(handle).unwrap();
        assert!(controller.subscribed().is_empty());
        assert!(backend.unsubscribe(handle).is_err());
    }

    #[test]
    fn test_controller_feeds_channel() {
        let controller = MemoryController::new();
        assert!(!controller.notify("/tmp/a", MemoryCode::Created));

        let (feed, rx) = Feed::channel();
        let backend = controller.connect(feed);
        assert!(controller.notify("/tmp/a", MemoryCode::Created));
        assert!(rx.try_recv().is_ok());

        drop(backend);
        assert!(!controller.is_connected());
        assert!(!controller.notify("/tmp/a", MemoryCode::Created));
    }
}
