//! Best-effort change notification for the state file.
//!
//! Backed by the `notify` crate where available, with a 2s poll-fallback
//! timer — some platforms lack reliable inotify, and `wait-all` observers
//! are required to coalesce notifications and poll as a safety net anyway
//! (§5), so the fallback is not a degraded mode, it's the documented path.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

const POLL_FALLBACK_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub path: PathBuf,
}

/// Subscribe to changes on `path`. Returns a receiver that yields an event
/// on every filesystem notification *and* at least once per poll interval,
/// so a subscriber never stalls waiting on a missed inotify event.
pub fn watch(path: &Path) -> mpsc::Receiver<ChangeEvent> {
    let (tx, rx) = mpsc::channel(16);
    let watched_path = path.to_path_buf();

    let notify_tx = tx.clone();
    let notify_path = watched_path.clone();
    std::thread::spawn(move || {
        let (std_tx, std_rx) = std::sync::mpsc::channel();
        let mut watcher = match RecommendedWatcher::new(std_tx, notify::Config::default()) {
            Ok(w) => w,
            Err(_) => return,
        };
        if let Some(parent) = notify_path.parent() {
            let _ = watcher.watch(parent, RecursiveMode::NonRecursive);
        }
        for res in std_rx {
            if res.is_ok() && notify_tx
                .blocking_send(ChangeEvent {
                    path: notify_path.clone(),
                })
                .is_err()
            {
                break;
            }
        }
    });

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(POLL_FALLBACK_INTERVAL).await;
            if tx
                .send(ChangeEvent {
                    path: watched_path.clone(),
                })
                .await
                .is_err()
            {
                break;
            }
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn poll_fallback_fires_even_without_fs_events() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state.json");
        std::fs::write(&path, "{}").unwrap();

        let mut rx = watch(&path);
        let event = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("should receive an event before timeout")
            .expect("channel should not close");
        assert_eq!(event.path, path);
    }
}
