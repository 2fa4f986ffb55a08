//! Credential hot-reload — a filesystem watcher debounces writes to the
//! credentials file and atomically swaps the pool snapshot. In-flight
//! requests keep the snapshot they already loaded.

use arc_swap::ArcSwap;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use ccrelay_core::credential::CredentialPool;

/// Settle time after the first event before reloading, so partial writes
/// coalesce into one reload.
const DEBOUNCE: Duration = Duration::from_millis(200);

/// Shared pointer to the current pool. Readers `load_full()` once per
/// request and never observe a torn reload.
pub type PoolHandle = Arc<ArcSwap<CredentialPool>>;

pub fn new_handle(pool: Arc<CredentialPool>) -> PoolHandle {
    Arc::new(ArcSwap::from(pool))
}

/// Watch the credentials file and swap the pool on change. The returned
/// watcher must be kept alive for the lifetime of the process. Reload
/// errors keep the previous pool in place.
pub fn watch_credentials(
    path: PathBuf,
    handle: PoolHandle,
) -> notify::Result<RecommendedWatcher> {
    let (tx, rx) = mpsc::channel::<()>(16);

    // Watch the parent directory: editors and atomic writers replace the
    // file, which would silently orphan a watch on the file itself.
    let target = path.clone();
    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                if touches_target(&event, &target) {
                    let _ = tx.blocking_send(());
                }
            }
            Err(e) => warn!(err = %e, "credential watcher error"),
        },
        notify::Config::default(),
    )?;

    let watch_root = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| path.clone());
    watcher.watch(&watch_root, RecursiveMode::NonRecursive)?;

    tokio::spawn(reload_loop(path, handle, rx));
    Ok(watcher)
}

fn touches_target(event: &Event, target: &Path) -> bool {
    matches!(
        event.kind,
        EventKind::Modify(_) | EventKind::Create(_)
    ) && event.paths.iter().any(|p| p.ends_with(
        target.file_name().unwrap_or(target.as_os_str()),
    ))
}

async fn reload_loop(path: PathBuf, handle: PoolHandle, mut rx: mpsc::Receiver<()>) {
    while rx.recv().await.is_some() {
        tokio::time::sleep(DEBOUNCE).await;
        // collapse any events that arrived while settling
        while rx.try_recv().is_ok() {}

        match CredentialPool::load(&path) {
            Ok(pool) => {
                info!(count = pool.len(), "credentials reloaded");
                handle.store(pool);
            }
            Err(e) => {
                warn!(err = %e, "credential reload failed, keeping previous pool");
            }
        }
    }
}
