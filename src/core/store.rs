//! Persisted agent state and post history.
//!
//! Two JSON files live in the data directory:
//! - `state.json`: rate limiter counters and collector cursors
//! - `tweet-history.json`: append-only array of published posts
//!
//! Every save rewrites the whole file through a temp file and a rename, so a
//! crash leaves either the old or the new file, never a partial one.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::TweetRecord;

/// Errors from the state store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Another livebuild instance holds the lock at {0}")]
    Locked(PathBuf),
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Everything the agent remembers across restarts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppState {
    /// When the last post went out
    #[serde(alias = "lastTweetTimestamp")]
    pub last_publish_at: Option<DateTime<Utc>>,

    /// Posts since `hour_reset_at` was last advanced
    #[serde(alias = "tweetsPostedThisHour")]
    pub published_this_hour: u32,

    /// Next hourly boundary
    pub hour_reset_at: DateTime<Utc>,

    /// Posts since `day_reset_at` was last advanced
    #[serde(alias = "tweetsPostedToday")]
    pub published_today: u32,

    /// Next daily boundary (local midnight)
    pub day_reset_at: DateTime<Utc>,

    /// Start time for the next capture API query
    #[serde(alias = "lastScreenpipePoll")]
    pub last_screen_poll_at: Option<DateTime<Utc>>,

    /// Assistant session log path -> non-empty lines already consumed
    #[serde(alias = "lastClaudeEventOffset")]
    pub assistant_log_offsets: BTreeMap<String, usize>,

    /// Repository path -> newest commit hash already emitted
    #[serde(alias = "lastGitCommit")]
    pub last_seen_commits: BTreeMap<String, String>,

    /// Post id new posts reply to
    pub current_thread_id: Option<String>,
}

impl Default for AppState {
    fn default() -> Self {
        // Epoch reset timestamps force a reset on first use
        Self {
            last_publish_at: None,
            published_this_hour: 0,
            hour_reset_at: DateTime::<Utc>::default(),
            published_today: 0,
            day_reset_at: DateTime::<Utc>::default(),
            last_screen_poll_at: None,
            assistant_log_offsets: BTreeMap::new(),
            last_seen_commits: BTreeMap::new(),
            current_thread_id: None,
        }
    }
}

/// Load/save interface over the agent's persisted state.
///
/// `update_state` is an atomic read-modify-write: no other update through the
/// same store interleaves with it.
pub trait StateStore: Send + Sync {
    /// Read the current state
    fn load_state(&self) -> Result<AppState, StoreError>;

    /// Apply `apply` to the current state, persist, and return the new state
    fn update_state(&self, apply: &mut dyn FnMut(&mut AppState)) -> Result<AppState, StoreError>;

    /// Read the whole post history, oldest first
    fn load_history(&self) -> Result<Vec<TweetRecord>, StoreError>;

    /// Append one record to the post history
    fn append_history(&self, record: TweetRecord) -> Result<(), StoreError>;

    /// The last `count` records, oldest first
    fn recent_history(&self, count: usize) -> Result<Vec<TweetRecord>, StoreError> {
        let history = self.load_history()?;
        let skip = history.len().saturating_sub(count);
        Ok(history.into_iter().skip(skip).collect())
    }
}

/// File-backed store in the agent's data directory
pub struct JsonFileStore {
    state_path: PathBuf,
    history_path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open a store in `data_dir`, creating the directory if needed
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(data_dir).map_err(|e| StoreError::io(data_dir, e))?;
        Ok(Self::with_paths(
            data_dir.join(crate::config::paths::STATE_FILE),
            data_dir.join(crate::config::paths::HISTORY_FILE),
        ))
    }

    /// Use explicit file locations
    pub fn with_paths(state_path: PathBuf, history_path: PathBuf) -> Self {
        Self {
            state_path,
            history_path,
            lock: Mutex::new(()),
        }
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    pub fn history_path(&self) -> &Path {
        &self.history_path
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_state(&self) -> Result<AppState, StoreError> {
        if !self.state_path.exists() {
            return Ok(AppState::default());
        }

        let raw = fs::read_to_string(&self.state_path)
            .map_err(|e| StoreError::io(&self.state_path, e))?;

        match serde_json::from_str(&raw) {
            Ok(state) => Ok(state),
            Err(e) => {
                warn!(
                    path = %self.state_path.display(),
                    error = %e,
                    "Failed to parse state, using defaults"
                );
                Ok(AppState::default())
            }
        }
    }

    fn read_history(&self) -> Result<Vec<TweetRecord>, StoreError> {
        if !self.history_path.exists() {
            return Ok(Vec::new());
        }

        let raw = fs::read_to_string(&self.history_path)
            .map_err(|e| StoreError::io(&self.history_path, e))?;

        match serde_json::from_str(&raw) {
            Ok(history) => Ok(history),
            Err(e) => {
                warn!(
                    path = %self.history_path.display(),
                    error = %e,
                    "Failed to parse post history, treating as empty"
                );
                Ok(Vec::new())
            }
        }
    }
}

impl StateStore for JsonFileStore {
    fn load_state(&self) -> Result<AppState, StoreError> {
        let _guard = self.guard();
        self.read_state()
    }

    fn update_state(&self, apply: &mut dyn FnMut(&mut AppState)) -> Result<AppState, StoreError> {
        let _guard = self.guard();
        let mut state = self.read_state()?;
        apply(&mut state);
        write_json_atomic(&self.state_path, &state)?;
        Ok(state)
    }

    fn load_history(&self) -> Result<Vec<TweetRecord>, StoreError> {
        let _guard = self.guard();
        self.read_history()
    }

    fn append_history(&self, record: TweetRecord) -> Result<(), StoreError> {
        let _guard = self.guard();
        let mut history = self.read_history()?;
        debug!(id = %record.id, total = history.len() + 1, "Appending post to history");
        history.push(record);
        write_json_atomic(&self.history_path, &history)
    }
}

/// In-memory store for tests and one-off runs
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<AppState>,
    history: Mutex<Vec<TweetRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: AppState) -> Self {
        Self {
            state: Mutex::new(state),
            history: Mutex::new(Vec::new()),
        }
    }
}

impl StateStore for MemoryStore {
    fn load_state(&self) -> Result<AppState, StoreError> {
        Ok(self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }

    fn update_state(&self, apply: &mut dyn FnMut(&mut AppState)) -> Result<AppState, StoreError> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        apply(&mut *state);
        Ok(state.clone())
    }

    fn load_history(&self) -> Result<Vec<TweetRecord>, StoreError> {
        Ok(self
            .history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }

    fn append_history(&self, record: TweetRecord) -> Result<(), StoreError> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record);
        Ok(())
    }
}

/// Write pretty JSON to `path` via a sibling temp file and a rename
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

    let json = serde_json::to_vec_pretty(value)?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
    tmp.write_all(&json).map_err(|e| StoreError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| StoreError::io(path, e))?;
    tmp.persist(path).map_err(|e| StoreError::io(path, e.error))?;

    Ok(())
}

/// Exclusive lock on the data directory, held for the life of the agent.
///
/// Two agents writing the same state files would corrupt each other's
/// counters; the second one fails to start instead.
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    /// Take the lock or fail with [`StoreError::Locked`]
    pub fn acquire(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| StoreError::io(path, e))?;

        file.try_lock_exclusive()
            .map_err(|_| StoreError::Locked(path.to_path_buf()))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(id: &str) -> TweetRecord {
        TweetRecord {
            id: id.to_string(),
            text: format!("post {}", id),
            timestamp: Utc::now(),
            topic: "testing".to_string(),
            thread_id: None,
            media_url: None,
        }
    }

    #[test]
    fn test_missing_files_give_defaults() {
        let temp = TempDir::new().unwrap();
        let store = JsonFileStore::open(temp.path()).unwrap();

        assert_eq!(store.load_state().unwrap(), AppState::default());
        assert!(store.load_history().unwrap().is_empty());
    }

    #[test]
    fn test_update_state_persists() {
        let temp = TempDir::new().unwrap();
        let store = JsonFileStore::open(temp.path()).unwrap();

        store
            .update_state(&mut |s| {
                s.published_today = 4;
                s.last_seen_commits
                    .insert("/repos/x".to_string(), "abc123".to_string());
            })
            .unwrap();

        let reopened = JsonFileStore::open(temp.path()).unwrap();
        let state = reopened.load_state().unwrap();
        assert_eq!(state.published_today, 4);
        assert_eq!(state.last_seen_commits.get("/repos/x").unwrap(), "abc123");
    }

    #[test]
    fn test_corrupt_state_falls_back_to_defaults() {
        let temp = TempDir::new().unwrap();
        let store = JsonFileStore::open(temp.path()).unwrap();
        std::fs::write(store.state_path(), "{ not json").unwrap();

        assert_eq!(store.load_state().unwrap(), AppState::default());
    }

    #[test]
    fn test_partial_state_merges_with_defaults() {
        let temp = TempDir::new().unwrap();
        let store = JsonFileStore::open(temp.path()).unwrap();
        std::fs::write(
            store.state_path(),
            r#"{"tweetsPostedToday": 2, "currentThreadId": "99"}"#,
        )
        .unwrap();

        let state = store.load_state().unwrap();
        assert_eq!(state.published_today, 2);
        assert_eq!(state.current_thread_id.as_deref(), Some("99"));
        assert!(state.assistant_log_offsets.is_empty());
    }

    #[test]
    fn test_history_append_and_recent() {
        let temp = TempDir::new().unwrap();
        let store = JsonFileStore::open(temp.path()).unwrap();

        for i in 0..5 {
            store.append_history(record(&i.to_string())).unwrap();
        }

        let recent = store.recent_history(2).unwrap();
        let ids: Vec<&str> = recent.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["3", "4"]);
        assert_eq!(store.recent_history(10).unwrap().len(), 5);

        let raw = std::fs::read_to_string(store.history_path()).unwrap();
        let parsed: Vec<TweetRecord> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.len(), 5);
    }

    #[test]
    fn test_instance_lock_is_exclusive() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("livebuild.lock");

        let first = InstanceLock::acquire(&path).unwrap();
        assert!(matches!(
            InstanceLock::acquire(&path),
            Err(StoreError::Locked(_))
        ));

        drop(first);
        assert!(InstanceLock::acquire(&path).is_ok());
    }
}
