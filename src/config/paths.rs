//! Canonical file names inside the livebuild data directory.
//!
//! Single source of truth - import this instead of hardcoding paths.
//!
//! ## Layout
//!
//! | File | Owner | Purpose |
//! |------|-------|---------|
//! | `state.json` | Rate limiter, collectors | Counters and cursors |
//! | `tweet-history.json` | Orchestrator | Append-only post history |
//! | `livebuild.lock` | Agent | Single-instance lock |

use std::path::{Path, PathBuf};

/// Persisted agent state
pub const STATE_FILE: &str = "state.json";

/// Append-only history of published posts
pub const HISTORY_FILE: &str = "tweet-history.json";

/// Held exclusively while an agent runs
pub const LOCK_FILE: &str = "livebuild.lock";

/// Directory under the assistant history root that holds session logs
pub const ASSISTANT_PROJECTS_DIR: &str = "projects";

pub fn state_file(home: &Path) -> PathBuf {
    home.join(STATE_FILE)
}

pub fn history_file(home: &Path) -> PathBuf {
    home.join(HISTORY_FILE)
}

pub fn lock_file(home: &Path) -> PathBuf {
    home.join(LOCK_FILE)
}

/// `<history root>/projects`
pub fn assistant_projects(history_root: &Path) -> PathBuf {
    history_root.join(ASSISTANT_PROJECTS_DIR)
}

/// The reflog file git appends to on every HEAD move
pub fn git_head_log(repo: &Path) -> PathBuf {
    repo.join(".git").join("logs").join("HEAD")
}
