//! File system watching for fsnotify
//!
//! This crate provides the watch registry and event-normalization layer:
//! - Registering and removing watched paths against a platform backend
//! - Translating backend-specific raw codes into [`Op`] bits
//! - Ordered delivery of [`Event`]s on a bounded, cancelable stream
//! - Asynchronous backend errors on a separate stream
//!
//! The OS mechanisms themselves come from the `notify` crate
//! ([`NotifyBackend`]); [`MemoryBackend`] drives a watcher without touching
//! the file system.

pub mod config;
pub mod error;
pub mod platform;
pub mod registry;
pub mod watcher;

mod delivery;

// Re-exports
pub use config::{BackendKind, ConfigError, WatcherConfig};
pub use error::WatchError;
pub use fsnotify_core::{Event, Op};
pub use platform::{Backend, Feed, MemoryBackend, MemoryCode, MemoryController, NotifyBackend, Translation};
pub use watcher::{Watcher, WatcherState};

/// Result type for watcher operations
pub type Result<T> = std::result::Result<T, WatchError>;
