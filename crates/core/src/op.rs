//! Generalized file operations
//!
//! Every platform backend maps its own raw notification codes onto this
//! small vocabulary. The bit layout is part of the public contract
//! (`Event::op_var` exposes it), so the values must not be reordered.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

bitflags! {
    /// A set of file operations that triggered a notification.
    ///
    /// Several bits may be set at once, e.g. a backend that cannot tell a
    /// rename apart from a remove followed by a create.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Op: u32 {
        /// A file or directory was created.
        const CREATE = 1 << 0;
        /// File contents were written.
        const WRITE = 1 << 1;
        /// A file or directory was removed.
        const REMOVE = 1 << 2;
        /// A file or directory was renamed away from this name.
        const RENAME = 1 << 3;
        /// Permissions or other metadata changed.
        const CHMOD = 1 << 4;
    }
}

/// Rendering order; REMOVE comes before WRITE, unlike the bit order.
const DISPLAY_ORDER: [(Op, &str); 5] = [
    (Op::CREATE, "CREATE"),
    (Op::REMOVE, "REMOVE"),
    (Op::WRITE, "WRITE"),
    (Op::RENAME, "RENAME"),
    (Op::CHMOD, "CHMOD"),
];

impl Op {
    /// Operations that count as a modification of the path
    pub const MODIFY: Op = Op::CREATE.union(Op::WRITE).union(Op::RENAME);
}

impl fmt::Display for Op {
    /// Renders set bits as `CREATE|WRITE`, nothing when empty
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (flag, name) in DISPLAY_ORDER {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}
