//! Normalized file system event

use crate::op::Op;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// A single file system notification
///
/// The name is kept exactly as the backend reported it: absolute or relative
/// depending on how the watch was registered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Event {
    name: PathBuf,
    op: Op,
}

impl Event {
    /// Create an event from an operation set and a path
    ///
    /// No validation is performed; any bit combination is accepted.
    pub fn new(op: Op, name: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            op,
        }
    }

    /// Path the event refers to
    pub fn name(&self) -> &Path {
        &self.name
    }

    /// Operations that triggered the event
    pub fn op(&self) -> Op {
        self.op
    }

    /// Raw operation bitmask
    pub fn op_var(&self) -> u32 {
        self.op.bits()
    }

    pub fn is_create(&self) -> bool {
        self.op.contains(Op::CREATE)
    }

    pub fn is_write(&self) -> bool {
        self.op.contains(Op::WRITE)
    }

    pub fn is_remove(&self) -> bool {
        self.op.contains(Op::REMOVE)
    }

    /// Same as [`Event::is_remove`]
    pub fn is_delete(&self) -> bool {
        self.is_remove()
    }

    pub fn is_rename(&self) -> bool {
        self.op.contains(Op::RENAME)
    }

    pub fn is_chmod(&self) -> bool {
        self.op.contains(Op::CHMOD)
    }

    /// True if the event created, wrote or renamed the path
    pub fn is_modify(&self) -> bool {
        self.op.intersects(Op::MODIFY)
    }

    /// Consume the event, returning its path
    pub fn into_name(self) -> PathBuf {
        self.name
    }
}

impl fmt::Display for Event {
    /// Renders as `"path": CREATE|WRITE`
    ///
    /// The name is quoted with Rust's `Debug` escaping: `\"`, `\\`, `\n`,
    /// `\t` and `\u{..}` for other control characters. Bytes that are not
    /// valid UTF-8 render as `\x..` escapes on Unix.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.name, self.op)
    }
}
