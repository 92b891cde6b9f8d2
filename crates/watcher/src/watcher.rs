//! Public watcher: registry, backend and delivery loop wired together

use crate::config::WatcherConfig;
use crate::delivery::DeliveryLoop;
use crate::error::WatchError;
use crate::platform::{Backend, Feed, NotifyBackend};
use crate::registry::{normalize_path, Registry};
use crate::Result;
use crossbeam_channel::{Receiver, Sender};
use fsnotify_core::Event;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Lifecycle of a watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    /// Backend connected and loop started, nothing added yet
    Created,
    /// At least one path was added
    Running,
    /// Close in progress (or a backend failure being torn down)
    Closing,
    /// Terminal
    Closed,
}

struct Lifecycle {
    state: WatcherState,
    close_called: bool,
}

/// State shared between the watcher handle and its delivery loop
pub(crate) struct Shared<B: Backend> {
    /// `None` once the backend has been released
    backend: Mutex<Option<B>>,
    pub(crate) registry: Registry<B::Handle>,
    lifecycle: Mutex<Lifecycle>,
}

impl<B: Backend> Shared<B> {
    pub(crate) fn new(backend: B) -> Self {
        Self {
            backend: Mutex::new(Some(backend)),
            registry: Registry::new(),
            lifecycle: Mutex::new(Lifecycle {
                state: WatcherState::Created,
                close_called: false,
            }),
        }
    }

    fn state(&self) -> WatcherState {
        self.lifecycle.lock().state
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state() {
            WatcherState::Closing | WatcherState::Closed => Err(WatchError::WatcherClosed),
            _ => Ok(()),
        }
    }

    pub(crate) fn is_closing(&self) -> bool {
        matches!(self.state(), WatcherState::Closing | WatcherState::Closed)
    }

    /// Enter `Closing` because the backend broke. False if a close already
    /// owns the teardown.
    pub(crate) fn begin_failure(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        match lifecycle.state {
            WatcherState::Closing | WatcherState::Closed => false,
            _ => {
                lifecycle.state = WatcherState::Closing;
                true
            }
        }
    }

    /// Empty the registry and take the backend out
    ///
    /// Both happen under the backend lock so no add can slip in between.
    pub(crate) fn release_backend(&self) -> Option<(B, Vec<(PathBuf, B::Handle)>)> {
        let mut backend = self.backend.lock();
        let watches = self.registry.drain();
        backend.take().map(|backend| (backend, watches))
    }

    pub(crate) fn finish_close(&self) {
        self.lifecycle.lock().state = WatcherState::Closed;
    }
}

/// File system watcher
///
/// Paths are registered with [`Watcher::add`]; normalized events arrive on
/// [`Watcher::events`] and asynchronous failures on [`Watcher::errors`].
/// All methods take `&self` and may be called from any thread.
///
/// ```no_run
/// use fsnotify_watcher::{Watcher, WatcherConfig};
///
/// let watcher = Watcher::new(WatcherConfig::default())?;
/// watcher.add("/tmp")?;
/// for event in watcher.events() {
///     println!("{event}");
/// }
/// # Ok::<(), fsnotify_watcher::WatchError>(())
/// ```
pub struct Watcher<B: Backend = NotifyBackend> {
    shared: Arc<Shared<B>>,
    events: Receiver<Event>,
    errors: Receiver<WatchError>,
    shutdown: Mutex<Option<Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Watcher<NotifyBackend> {
    /// Create a watcher backed by the OS notification mechanism (or the poll
    /// watcher, depending on `config.backend`)
    pub fn new(config: WatcherConfig) -> Result<Self> {
        let backend_config = config.clone();
        Self::with_backend(config, move |feed| NotifyBackend::connect(&backend_config, feed))
    }
}

impl<B: Backend> Watcher<B> {
    /// Create a watcher over a custom backend
    ///
    /// `connect` receives the feed the backend must push raw notifications
    /// into. An error from it is reported as `BackendUnavailable`.
    pub fn with_backend<F>(config: WatcherConfig, connect: F) -> Result<Self>
    where
        F: FnOnce(Feed<B::Code>) -> anyhow::Result<B>,
    {
        config.validate()?;

        let (feed, feed_rx) = Feed::channel();
        let backend = connect(feed).map_err(WatchError::BackendUnavailable)?;

        let (events_tx, events_rx) = crossbeam_channel::bounded(config.event_capacity);
        let (errors_tx, errors_rx) = crossbeam_channel::bounded(config.error_capacity);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(0);

        let shared = Arc::new(Shared::new(backend));
        let delivery = DeliveryLoop {
            shared: Arc::clone(&shared),
            feed: feed_rx,
            events: events_tx,
            errors: errors_tx,
            stale_errors: errors_rx.clone(),
            shutdown: shutdown_rx,
        };

        let worker = thread::Builder::new()
            .name("fsnotify-delivery".to_string())
            .spawn(move || delivery.run())
            .map_err(|e| {
                WatchError::BackendUnavailable(
                    anyhow::Error::new(e).context("Failed to spawn delivery thread"),
                )
            })?;

        info!(
            "Watcher started (event buffer: {}, error buffer: {})",
            config.event_capacity, config.error_capacity
        );

        Ok(Self {
            shared,
            events: events_rx,
            errors: errors_rx,
            shutdown: Mutex::new(Some(shutdown_tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Start watching `path`
    ///
    /// Fails with `AlreadyWatching` if the path is registered already; adding
    /// is not idempotent. The path is only registered once the backend has
    /// accepted the subscription.
    pub fn add(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = normalize_path(path.as_ref());

        let mut backend = self.shared.backend.lock();
        self.shared.ensure_open()?;
        let backend = backend.as_mut().ok_or(WatchError::WatcherClosed)?;

        if self.shared.registry.contains(&path) {
            return Err(WatchError::AlreadyWatching(path));
        }

        let handle = match backend.subscribe(&path) {
            Ok(handle) => handle,
            Err(source) => {
                warn!("Backend rejected watch on {}: {:#}", path.display(), source);
                return Err(WatchError::Subscribe { path, source });
            }
        };

        // Cannot collide while the backend lock is held, but never leave a
        // subscription behind without an entry
        if let Err(handle) = self.shared.registry.insert(path.clone(), handle) {
            let _ = backend.unsubscribe(handle);
            return Err(WatchError::AlreadyWatching(path));
        }

        {
            let mut lifecycle = self.shared.lifecycle.lock();
            if lifecycle.state == WatcherState::Created {
                lifecycle.state = WatcherState::Running;
            }
        }

        debug!("Watching {}", path.display());
        Ok(())
    }

    /// Alias for [`Watcher::add`]
    #[deprecated(note = "use `add`")]
    pub fn watch(&self, path: impl AsRef<Path>) -> Result<()> {
        self.add(path)
    }

    /// Stop watching `path`
    ///
    /// Raw notifications for the path are rejected from this point on.
    /// Events that already passed the filter are still delivered.
    pub fn remove(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = normalize_path(path.as_ref());

        let mut backend = self.shared.backend.lock();
        self.shared.ensure_open()?;
        let backend = backend.as_mut().ok_or(WatchError::WatcherClosed)?;

        let handle = self
            .shared
            .registry
            .remove(&path)
            .ok_or_else(|| WatchError::NotWatching(path.clone()))?;

        backend
            .unsubscribe(handle)
            .map_err(|source| WatchError::Unsubscribe {
                path: path.clone(),
                source,
            })?;

        debug!("Stopped watching {}", path.display());
        Ok(())
    }

    /// Alias for [`Watcher::remove`]
    #[deprecated(note = "use `remove`")]
    pub fn remove_watch(&self, path: impl AsRef<Path>) -> Result<()> {
        self.remove(path)
    }

    /// Number of watched paths
    pub fn count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Watched paths, sorted
    pub fn watch_list(&self) -> Vec<PathBuf> {
        self.shared.registry.paths()
    }

    pub fn state(&self) -> WatcherState {
        self.shared.state()
    }

    /// Normalized events, in the order the backend reported them
    ///
    /// The stream ends (receivers report disconnection) once the watcher is
    /// closed and the buffer has been drained.
    pub fn events(&self) -> Receiver<Event> {
        self.events.clone()
    }

    /// Errors found by the delivery loop
    ///
    /// Independent of the event stream. Reading it is optional: when the
    /// buffer is full the oldest error is dropped to make room.
    pub fn errors(&self) -> Receiver<WatchError> {
        self.errors.clone()
    }

    /// Stop the watcher
    ///
    /// Notifications already buffered by the backend are forwarded while
    /// there is room in the event buffer; the rest are discarded. When
    /// this returns nothing more will ever be pushed to either stream.
    /// Calling it again fails with `AlreadyClosed` (or `WatcherClosed` while
    /// another close is still running).
    pub fn close(&self) -> Result<()> {
        {
            let mut lifecycle = self.shared.lifecycle.lock();
            if lifecycle.close_called {
                return Err(match lifecycle.state {
                    WatcherState::Closed => WatchError::AlreadyClosed,
                    _ => WatchError::WatcherClosed,
                });
            }
            lifecycle.close_called = true;
            if lifecycle.state != WatcherState::Closed {
                lifecycle.state = WatcherState::Closing;
            }
        }

        // Dropping the sender wakes the loop wherever it is blocked
        drop(self.shutdown.lock().take());
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                warn!("Delivery thread panicked");
            }
        }

        if let Some((mut backend, watches)) = self.shared.release_backend() {
            for (path, handle) in watches {
                if let Err(e) = backend.unsubscribe(handle) {
                    warn!("Failed to unwatch {} on close: {:#}", path.display(), e);
                }
            }
        }

        self.shared.finish_close();
        info!("Watcher closed");
        Ok(())
    }
}

impl<B: Backend> Drop for Watcher<B> {
    fn drop(&mut self) {
        match self.close() {
            Ok(()) | Err(WatchError::AlreadyClosed) => {}
            Err(e) => warn!("Failed to close watcher on drop: {}", e),
        }
    }
}
