//! Platform backend contract
//!
//! A backend subscribes paths with the OS (or a simulation of it) and pushes
//! raw notifications into a [`Feed`]. Raw codes stay backend-specific; each
//! backend provides its own table mapping them onto [`Op`].
//!
//! Implementations:
//! - [`NotifyBackend`]: the `notify` crate, OS-native or polling
//! - [`MemoryBackend`]: in-process, driven by a [`MemoryController`]

pub mod memory;
pub mod native;

pub use self::memory::{MemoryBackend, MemoryCode, MemoryController};
pub use self::native::NotifyBackend;

use crossbeam_channel::{Receiver, Sender};
use fsnotify_core::Op;
use std::fmt::Debug;
use std::path::{Path, PathBuf};

/// OS-specific notification mechanism
pub trait Backend: Send + 'static {
    /// Whatever is needed to cancel a subscription later
    type Handle: Send + Sync + 'static;

    /// Backend-specific raw event code
    type Code: Debug + Send + 'static;

    /// Start watching `path`
    fn subscribe(&mut self, path: &Path) -> anyhow::Result<Self::Handle>;

    /// Stop watching the path behind `handle`
    fn unsubscribe(&mut self, handle: Self::Handle) -> anyhow::Result<()>;

    /// Map a raw code onto the generalized vocabulary
    fn translate(code: &Self::Code) -> Translation;
}

/// Outcome of mapping a raw code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Translation {
    /// Deliver an event with these operations
    Op(Op),
    /// Known code that is not a change (e.g. a read); dropped silently
    Ignored,
    /// Unknown code; dropped and reported as malformed
    Unrecognized,
}

/// Message sent from a backend to the delivery loop
#[derive(Debug)]
pub enum BackendMessage<C> {
    Notification { path: PathBuf, code: C },
    Malformed { path: Option<PathBuf>, reason: String },
    Error(anyhow::Error),
    /// The backend connection broke; no further messages will follow
    Failed(anyhow::Error),
}

/// Sending half of the raw notification feed, handed to a backend
///
/// The feed is unbounded: when the delivery loop is blocked on a slow
/// consumer, raw notifications queue here.
pub struct Feed<C> {
    tx: Sender<BackendMessage<C>>,
}

impl<C> Clone for Feed<C> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<C> Feed<C> {
    /// Create a feed and the receiver the delivery loop reads from
    pub fn channel() -> (Self, Receiver<BackendMessage<C>>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx }, rx)
    }

    /// Push a raw notification. Returns false once the watcher is gone.
    pub fn notify(&self, path: impl Into<PathBuf>, code: C) -> bool {
        self.send(BackendMessage::Notification {
            path: path.into(),
            code,
        })
    }

    /// Report a notification that could not be decoded
    pub fn malformed(&self, path: Option<PathBuf>, reason: impl Into<String>) -> bool {
        self.send(BackendMessage::Malformed {
            path,
            reason: reason.into(),
        })
    }

    /// Report a recoverable backend error
    pub fn error(&self, err: anyhow::Error) -> bool {
        self.send(BackendMessage::Error(err))
    }

    /// Report that the backend connection broke
    pub fn fail(&self, err: anyhow::Error) -> bool {
        self.send(BackendMessage::Failed(err))
    }

    fn send(&self, message: BackendMessage<C>) -> bool {
        self.tx.send(message).is_ok()
    }
}
