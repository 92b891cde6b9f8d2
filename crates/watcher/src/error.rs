//! Error types for the watcher

use crate::config::ConfigError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by watcher operations or delivered on the error stream
///
/// Usage errors (`AlreadyWatching`, `NotWatching`, `WatcherClosed`,
/// `AlreadyClosed`) and rejected backend commands are returned from the call
/// that caused them. Errors discovered by the delivery loop (`Backend`,
/// `BackendFailure`, `MalformedNotification`) only ever appear on the error
/// stream.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("already watching {}", .0.display())]
    AlreadyWatching(PathBuf),

    #[error("not watching {}", .0.display())]
    NotWatching(PathBuf),

    #[error("watcher is closed")]
    WatcherClosed,

    #[error("watcher was already closed")]
    AlreadyClosed,

    #[error("invalid watcher configuration")]
    Config(#[from] ConfigError),

    #[error("notification backend unavailable")]
    BackendUnavailable(#[source] anyhow::Error),

    #[error("backend rejected watch on {}", path.display())]
    Subscribe {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("backend failed to remove watch on {}", path.display())]
    Unsubscribe {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// Non-fatal error reported by the backend; delivery continues
    #[error("backend error")]
    Backend(#[source] anyhow::Error),

    /// The backend connection broke; the watcher is closed afterwards
    #[error("backend connection failed")]
    BackendFailure(#[source] anyhow::Error),

    #[error("malformed notification{}: {reason}", path_suffix(.path))]
    MalformedNotification {
        path: Option<PathBuf>,
        reason: String,
    },
}

fn path_suffix(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => format!(" for {}", path.display()),
        None => String::new(),
    }
}

impl WatchError {
    /// True for errors that were pushed by the delivery loop rather than
    /// returned from a call
    pub fn is_async(&self) -> bool {
        matches!(
            self,
            WatchError::Backend(_)
                | WatchError::BackendFailure(_)
                | WatchError::MalformedNotification { .. }
        )
    }
}
