//! Hot-reload watcher: filesystem events → mass worker recycle.
//!
//! Watches the configured directories (non-recursive) and fires a single
//! action — mark every worker dead — on any write/create/remove/rename
//! under them.  The watcher is a pure observer: it holds only the action
//! closure, never a supervisor handle.  Directories that are missing or not
//! directories are logged and skipped; a failed watch on one directory
//! never takes the others down, and watching zero directories is not an
//! error.

use notify::event::ModifyKind;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("failed to initialize the filesystem watcher: {0}")]
    Init(#[from] notify::Error),
}

/// Handle to a running watcher.  Dropping it stops the event source; the
/// consumer task then drains and exits cleanly.
pub struct ReloadWatcher {
    _watcher: RecommendedWatcher,
    watched: usize,
}

impl ReloadWatcher {
    /// Subscribe to events under `dirs` and run `action` on each qualifying
    /// event.
    pub fn start(
        dirs: &[PathBuf],
        action: impl Fn() + Send + Sync + 'static,
    ) -> Result<Self, ReloadError> {
        let (tx, mut rx) = mpsc::channel::<notify::Event>(64);

        let mut watcher =
            notify::recommended_watcher(move |result: Result<notify::Event, notify::Error>| {
                match result {
                    // Best-effort: a full queue just coalesces into whatever
                    // event is already waiting.
                    Ok(event) => {
                        let _ = tx.try_send(event);
                    }
                    Err(error) => warn!(%error, "filesystem watcher error"),
                }
            })?;

        let mut watched = 0;
        for dir in dirs {
            if !dir.is_dir() {
                warn!(path = %dir.display(), "watch root missing or not a directory, skipping");
                continue;
            }
            match watcher.watch(dir, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    info!(path = %dir.display(), "watching for code changes");
                    watched += 1;
                }
                Err(error) => {
                    warn!(path = %dir.display(), %error, "failed to watch directory, skipping");
                }
            }
        }

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if is_code_change(&event.kind) {
                    debug!(kind = ?event.kind, paths = ?event.paths, "code change detected");
                    action();
                }
            }
            debug!("reload watcher event source closed");
        });

        Ok(ReloadWatcher {
            _watcher: watcher,
            watched,
        })
    }

    /// Number of directories actually under watch.
    pub fn watched(&self) -> usize {
        self.watched
    }
}

/// Write, create, remove, and rename count; metadata-only touches and pure
/// access events do not.
fn is_code_change(kind: &EventKind) -> bool {
    match kind {
        EventKind::Create(_) | EventKind::Remove(_) => true,
        EventKind::Modify(modify) => !matches!(modify, ModifyKind::Metadata(_)),
        _ => false,
    }
}
