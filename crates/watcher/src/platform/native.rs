//! Backend over the `notify` crate
//!
//! `notify` picks the OS mechanism at compile time (inotify on Linux,
//! FSEvents on macOS, ReadDirectoryChangesW on Windows, kqueue on the BSDs).
//! The poll watcher is available everywhere as a fallback.
//!
//! Rename handling: a rename reported as one event carrying both paths is
//! split into two notifications, old name first. The old name maps to
//! RENAME and the new name to CREATE; no combined event is synthesized.

use super::{Backend, Feed, Translation};
use crate::config::{BackendKind, WatcherConfig};
use anyhow::{Context, Result};
use fsnotify_core::Op;
use notify::event::{ModifyKind, RenameMode};
use notify::{ErrorKind, EventKind, PollWatcher, RecursiveMode, Watcher as _};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};

/// A watched root and the other spellings the OS may report it under
struct Root {
    registered: PathBuf,
    aliases: Vec<PathBuf>,
}

/// Maps paths reported by the OS back under the prefix the caller registered
#[derive(Default)]
struct RootMap {
    roots: RwLock<Vec<Root>>,
}

impl RootMap {
    fn insert(&self, registered: &Path) {
        let mut aliases = Vec::new();
        if let Ok(absolute) = std::path::absolute(registered) {
            if absolute != registered {
                aliases.push(absolute);
            }
        }
        if let Ok(canonical) = registered.canonicalize() {
            if canonical != registered && !aliases.contains(&canonical) {
                aliases.push(canonical);
            }
        }
        self.roots.write().push(Root {
            registered: registered.to_path_buf(),
            aliases,
        });
    }

    fn remove(&self, registered: &Path) {
        self.roots.write().retain(|root| root.registered != registered);
    }

    fn rewrite(&self, reported: PathBuf) -> PathBuf {
        let roots = self.roots.read();
        for root in roots.iter() {
            if reported.starts_with(&root.registered) {
                return reported;
            }
            for alias in &root.aliases {
                if let Ok(rest) = reported.strip_prefix(alias) {
                    return if rest.as_os_str().is_empty() {
                        root.registered.clone()
                    } else {
                        root.registered.join(rest)
                    };
                }
            }
        }
        reported
    }
}

/// OS notification backend built on `notify`
pub struct NotifyBackend {
    watcher: Box<dyn notify::Watcher + Send>,
    roots: Arc<RootMap>,
    mode: RecursiveMode,
}

impl NotifyBackend {
    /// Start the `notify` watcher selected by `config`, forwarding into `feed`
    pub fn connect(config: &WatcherConfig, feed: Feed<EventKind>) -> Result<Self> {
        let roots = Arc::new(RootMap::default());
        let handler_roots = Arc::clone(&roots);
        let handler = move |res: notify::Result<notify::Event>| match res {
            Ok(event) => forward(&feed, &handler_roots, event),
            Err(err) => report(&feed, err),
        };

        let watcher: Box<dyn notify::Watcher + Send> = match config.backend {
            BackendKind::Recommended => Box::new(
                notify::recommended_watcher(handler)
                    .context("Failed to initialize OS file watcher")?,
            ),
            BackendKind::Poll => {
                let poll_config = notify::Config::default().with_poll_interval(config.poll_interval());
                Box::new(
                    PollWatcher::new(handler, poll_config)
                        .context("Failed to initialize poll watcher")?,
                )
            }
        };
        debug!("notify backend ready ({:?})", config.backend);

        let mode = if config.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };

        Ok(Self {
            watcher,
            roots,
            mode,
        })
    }
}

impl Backend for NotifyBackend {
    type Handle = PathBuf;
    type Code = EventKind;

    fn subscribe(&mut self, path: &Path) -> Result<PathBuf> {
        self.watcher
            .watch(path, self.mode)
            .with_context(|| format!("Failed to watch {}", path.display()))?;
        self.roots.insert(path);
        Ok(path.to_path_buf())
    }

    fn unsubscribe(&mut self, handle: PathBuf) -> Result<()> {
        self.roots.remove(&handle);
        self.watcher
            .unwatch(&handle)
            .with_context(|| format!("Failed to unwatch {}", handle.display()))
    }

    fn translate(kind: &EventKind) -> Translation {
        match kind {
            EventKind::Create(_) => Translation::Op(Op::CREATE),
            EventKind::Remove(_) => Translation::Op(Op::REMOVE),
            EventKind::Modify(ModifyKind::Metadata(_)) => Translation::Op(Op::CHMOD),
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Translation::Op(Op::CREATE),
            EventKind::Modify(ModifyKind::Name(_)) => Translation::Op(Op::RENAME),
            EventKind::Modify(_) => Translation::Op(Op::WRITE),
            EventKind::Access(_) => Translation::Ignored,
            EventKind::Any | EventKind::Other => Translation::Unrecognized,
        }
    }
}

/// Split a `notify` event into one raw notification per path
fn forward(feed: &Feed<EventKind>, roots: &RootMap, event: notify::Event) {
    if event.paths.is_empty() {
        feed.malformed(None, format!("{:?} event without paths", event.kind));
        return;
    }

    match event.kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
            let mut paths = event.paths.into_iter();
            if let (Some(from), Some(to)) = (paths.next(), paths.next()) {
                feed.notify(roots.rewrite(from), EventKind::Modify(ModifyKind::Name(RenameMode::From)));
                feed.notify(roots.rewrite(to), EventKind::Modify(ModifyKind::Name(RenameMode::To)));
            }
        }
        kind => {
            for path in event.paths {
                trace!("raw {:?} on {}", kind, path.display());
                feed.notify(roots.rewrite(path), kind);
            }
        }
    }
}

fn report(feed: &Feed<EventKind>, err: notify::Error) {
    // The OS watch table is exhausted; nothing can be watched reliably
    // anymore
    if matches!(err.kind, ErrorKind::MaxFilesWatch) {
        feed.fail(anyhow::Error::new(err));
    } else {
        feed.error(anyhow::Error::new(err));
    }
}
