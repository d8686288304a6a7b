//! Activity collectors.
//!
//! Each collector turns one outside source into [`ActivityEvent`]s on the
//! event bus:
//!
//! 1. **git**: watches `.git/logs/HEAD` of each repo, emits one event per new commit
//! 2. **assistant_log**: watches assistant session JSONL files, emits one event per exchange
//! 3. **screenpipe**: polls the capture API for OCR and audio transcripts
//!
//! # Architecture
//!
//! ```text
//! .git/logs/HEAD ─┐
//! projects/*.jsonl ┼→ collectors → EventBus → ContextAccumulator
//! capture API ────┘
//! ```
//!
//! Collectors run as tokio tasks and stop when the shared shutdown signal
//! turns true. Source errors are logged and never stop a collector.
//!
//! [`ActivityEvent`]: crate::domain::ActivityEvent

pub mod assistant_log;
pub mod git;
pub mod screenpipe;

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::warn;

pub use assistant_log::{parse_exchanges, AssistantLogCollector, ExchangeBatch};
pub use git::{parse_git_log, GitCollector};
pub use screenpipe::{ScreenpipeCollector, SeenHashes};

/// Errors that can occur while setting up a file watch
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("Watch path does not exist: {0}")]
    PathNotFound(PathBuf),

    #[error("Notify error: {0}")]
    Notify(#[from] notify::Error),
}

/// A debounced file watch feeding an async channel.
///
/// The watch stays active for as long as this value lives.
pub struct FileWatch {
    _debouncer: Debouncer<RecommendedWatcher>,
    rx: mpsc::UnboundedReceiver<Vec<PathBuf>>,
}

impl FileWatch {
    /// Start watching `path`, batching changes that arrive within `debounce`
    pub fn start(path: &Path, mode: RecursiveMode, debounce: Duration) -> Result<Self, WatcherError> {
        if !path.exists() {
            return Err(WatcherError::PathNotFound(path.to_path_buf()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut debouncer = new_debouncer(debounce, move |result: DebounceEventResult| match result {
            Ok(events) => {
                let paths: Vec<PathBuf> = events.into_iter().map(|e| e.path).collect();
                if !paths.is_empty() {
                    let _ = tx.send(paths);
                }
            }
            Err(e) => warn!(error = ?e, "File watch error"),
        })?;

        debouncer.watcher().watch(path, mode)?;

        Ok(Self {
            _debouncer: debouncer,
            rx,
        })
    }

    /// Next batch of changed paths, or `None` once shutdown is signalled
    pub async fn next(&mut self, shutdown: &mut watch::Receiver<bool>) -> Option<Vec<PathBuf>> {
        if *shutdown.borrow() {
            return None;
        }
        tokio::select! {
            batch = self.rx.recv() => batch,
            _ = wait_for_shutdown(shutdown) => None,
        }
    }
}

/// Resolve once the shutdown flag is true or its sender is gone
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_path_rejected() {
        let temp = TempDir::new().unwrap();
        let result = FileWatch::start(
            &temp.path().join("nope"),
            RecursiveMode::NonRecursive,
            Duration::from_millis(50),
        );
        assert!(matches!(result, Err(WatcherError::PathNotFound(_))));
    }

    #[tokio::test]
    async fn test_shutdown_ends_watch() {
        let temp = TempDir::new().unwrap();
        let mut file_watch = FileWatch::start(
            temp.path(),
            RecursiveMode::NonRecursive,
            Duration::from_millis(50),
        )
        .unwrap();

        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();
        assert!(file_watch.next(&mut rx).await.is_none());
    }
}
