//! Event model for fsnotify
//!
//! This crate provides the platform-independent vocabulary shared by every
//! watcher backend:
//! - `Op`: bitmask of generalized file operations
//! - `Event`: a path paired with the operations that touched it

pub mod event;
pub mod op;

// Re-exports
pub use event::Event;
pub use op::Op;
