//! Watch registry
//!
//! Source of truth for which paths are being watched. Each entry keeps the
//! backend handle needed to cancel the subscription later.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

/// Thread-safe map of watched path -> backend handle
///
/// Readers (count, membership, the delivery loop's filter) share the lock;
/// every mutation takes it exclusively, so a reader never sees a half-applied
/// add or remove.
pub struct Registry<H> {
    watches: RwLock<HashMap<PathBuf, H>>,
}

impl<H> Registry<H> {
    pub fn new() -> Self {
        Self {
            watches: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a watch. Returns the handle back if the path is already present.
    pub fn insert(&self, path: PathBuf, handle: H) -> Result<(), H> {
        let mut watches = self.watches.write();
        if watches.contains_key(&path) {
            return Err(handle);
        }
        watches.insert(path, handle);
        Ok(())
    }

    pub fn remove(&self, path: &Path) -> Option<H> {
        self.watches.write().remove(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.watches.read().contains_key(path)
    }

    /// True if `path` or one of its ancestors is watched
    ///
    /// Backends report events for the children of a watched directory, so
    /// those are accepted as well. `path` must already be normalized. A
    /// relative path below the current directory is also covered by a `.`
    /// key; one that climbs out of it with `..` is not.
    pub fn covers(&self, path: &Path) -> bool {
        let watches = self.watches.read();
        if watches.is_empty() {
            return false;
        }
        let below_cwd = path.is_relative()
            && !matches!(path.components().next(), Some(Component::ParentDir));
        path.ancestors().any(|ancestor| {
            if ancestor.as_os_str().is_empty() {
                below_cwd && watches.contains_key(Path::new("."))
            } else {
                watches.contains_key(ancestor)
            }
        })
    }

    pub fn len(&self) -> usize {
        self.watches.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.watches.read().is_empty()
    }

    /// Snapshot of watched paths, sorted
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.watches.read().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Remove every entry, returning them
    pub fn drain(&self) -> Vec<(PathBuf, H)> {
        self.watches.write().drain().collect()
    }
}

impl<H> Default for Registry<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// Lexically normalize a path for use as a registry key
///
/// - Removes `.` components and trailing separators
/// - Collapses `dir/..` pairs
/// - Leaves leading `..` in relative paths untouched
///
/// The file system is never consulted, so symlinks are not resolved.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let last = normalized.components().next_back();
                match last {
                    Some(Component::Normal(_)) => {
                        normalized.pop();
                    }
                    // `/..` is `/`
                    Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                    _ => normalized.push(".."),
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    if normalized.as_os_str().is_empty() {
        normalized.push(".");
    }
    normalized
}
