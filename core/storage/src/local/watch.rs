//! Change notification for a local directory tree.

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

use unistore_common::{Error, Result};

type Callback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct TokenState {
    changed: AtomicBool,
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(u64, Callback)>>,
}

impl TokenState {
    fn on_change(&self) {
        // The first event only flips the token.
        if !self.changed.swap(true, Ordering::SeqCst) {
            return;
        }

        // Dispatch outside the lock; callbacks may register or unregister.
        let callbacks: Vec<(u64, Callback)> = self.callbacks.lock().clone();
        for (id, callback) in callbacks {
            if panic::catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
                warn!(callback = id, "Change callback panicked");
            }
        }
    }
}

/// Flips once anything below the watched directory is created, deleted or
/// modified. Registered callbacks run on every event after that first one.
///
/// Dropping the token stops watching.
pub struct ChangeToken {
    state: Arc<TokenState>,
    _watcher: Option<RecommendedWatcher>,
}

impl ChangeToken {
    /// Start watching `root` recursively.
    pub fn watch(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let state = Arc::new(TokenState::default());

        let events = Arc::downgrade(&state);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let Some(state) = events.upgrade() else {
                return;
            };
            match res {
                Ok(event) => {
                    if matches!(
                        event.kind,
                        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(_)
                    ) {
                        debug!(kind = ?event.kind, paths = ?event.paths, "Change detected");
                        state.on_change();
                    }
                }
                Err(e) => warn!(error = %e, "Watch error"),
            }
        })
        .map_err(watch_error)?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(watch_error)?;
        debug!(root = %root.display(), "Watching for changes");

        Ok(Self {
            state,
            _watcher: Some(watcher),
        })
    }

    /// A token that is never triggered by the filesystem.
    #[cfg(test)]
    fn detached() -> Self {
        Self {
            state: Arc::new(TokenState::default()),
            _watcher: None,
        }
    }

    pub fn has_changed(&self) -> bool {
        self.state.changed.load(Ordering::SeqCst)
    }

    /// Register `callback`; it stays registered until the returned handle is
    /// dropped.
    pub fn register_callback(
        &self,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> CallbackRegistration {
        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed);
        self.state.callbacks.lock().push((id, Arc::new(callback)));
        CallbackRegistration {
            state: Arc::downgrade(&self.state),
            id,
        }
    }
}

impl fmt::Debug for ChangeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeToken")
            .field("has_changed", &self.has_changed())
            .finish()
    }
}

/// Keeps a change callback registered.
#[must_use = "the callback is unregistered when this is dropped"]
pub struct CallbackRegistration {
    state: Weak<TokenState>,
    id: u64,
}

impl Drop for CallbackRegistration {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            state.callbacks.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

fn watch_error(e: notify::Error) -> Error {
    Error::Io(io::Error::other(e))
}
