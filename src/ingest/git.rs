//! Git commit collector.
//!
//! Watches each repository's HEAD reflog. When it changes, lists the commits
//! since the last one seen and emits a [`RepositoryActivity`] per commit,
//! oldest first.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use notify::RecursiveMode;
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::paths;
use crate::core::event_bus::EventBus;
use crate::core::store::StateStore;
use crate::domain::{ActivityEvent, RepositoryActivity};

use super::FileWatch;

/// Commits listed when a repository has no last-seen commit
const INITIAL_COMMITS: &str = "-5";

/// Debounce for reflog writes
const DEBOUNCE: Duration = Duration::from_millis(500);

pub struct GitCollector {
    repos: Vec<PathBuf>,
    bus: Arc<EventBus>,
    store: Arc<dyn StateStore>,
}

impl GitCollector {
    pub fn new(repos: Vec<PathBuf>, bus: Arc<EventBus>, store: Arc<dyn StateStore>) -> Self {
        Self { repos, bus, store }
    }

    /// Start one watch task per repository
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        if self.repos.is_empty() {
            info!("No repositories configured to watch");
            return Vec::new();
        }

        let this = Arc::new(self);
        this.repos
            .iter()
            .cloned()
            .map(|repo| {
                let collector = Arc::clone(&this);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { collector.watch_repo(repo, shutdown).await })
            })
            .collect()
    }

    async fn watch_repo(&self, repo: PathBuf, mut shutdown: watch::Receiver<bool>) {
        let head_log = paths::git_head_log(&repo);
        let Some(logs_dir) = head_log.parent() else {
            return;
        };

        let mut file_watch = match FileWatch::start(logs_dir, RecursiveMode::NonRecursive, DEBOUNCE) {
            Ok(w) => w,
            Err(e) => {
                warn!(repo = %repo.display(), error = %e, "Cannot watch repository, skipping");
                return;
            }
        };
        info!(repo = %repo.display(), "Watching git repository");

        while let Some(changed) = file_watch.next(&mut shutdown).await {
            if !changed.iter().any(|p| p.file_name() == head_log.file_name()) {
                continue;
            }
            match self.check_repo(&repo).await {
                Ok(0) => debug!(repo = %repo.display(), "HEAD moved, no new commits"),
                Ok(n) => debug!(repo = %repo.display(), commits = n, "Emitted new commits"),
                Err(e) => warn!(repo = %repo.display(), error = %format!("{:#}", e), "Failed to read new commits"),
            }
        }

        info!(repo = %repo.display(), "Git watcher stopped");
    }

    /// Emit every commit since the last one seen and advance the cursor.
    ///
    /// Returns the number of commits emitted.
    pub async fn check_repo(&self, repo: &Path) -> Result<usize> {
        let key = repo.to_string_lossy().to_string();
        let last_seen = self.store.load_state()?.last_seen_commits.get(&key).cloned();

        let branch = current_branch(repo).await;
        let output = match last_seen {
            Some(ref since) => match git_log(repo, &format!("{}..HEAD", since)).await {
                Ok(out) => out,
                Err(e) => {
                    // History rewritten under us; start over from recent commits
                    warn!(repo = %repo.display(), %since, error = %format!("{:#}", e), "Last seen commit unusable");
                    git_log(repo, INITIAL_COMMITS).await?
                }
            },
            None => git_log(repo, INITIAL_COMMITS).await?,
        };

        let commits = parse_git_log(&output, &repo_name(repo), &branch, Utc::now());
        let Some(newest) = commits.last().map(|c| c.commit_hash.clone()) else {
            return Ok(0);
        };

        for commit in &commits {
            info!(
                repo = %commit.repo,
                commit = %&commit.commit_hash[..7.min(commit.commit_hash.len())],
                message = %commit.commit_message,
                "Git activity detected"
            );
            self.bus.publish(&ActivityEvent::Repository(commit.clone()));
        }

        self.store
            .update_state(&mut |s| {
                s.last_seen_commits.insert(key.clone(), newest.clone());
            })?;

        Ok(commits.len())
    }
}

fn repo_name(repo: &Path) -> String {
    repo.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| repo.display().to_string())
}

async fn current_branch(repo: &Path) -> String {
    match run_git(repo, &["rev-parse", "--abbrev-ref", "HEAD"]).await {
        Ok(out) => out.trim().to_string(),
        Err(_) => "unknown".to_string(),
    }
}

async fn git_log(repo: &Path, range: &str) -> Result<String> {
    run_git(repo, &["log", range, "--reverse", "--stat", "--format=%H %s"]).await
}

async fn run_git(repo: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .with_context(|| format!("Failed to run git in {}", repo.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);
        anyhow::bail!(
            "git {} failed with exit code {}: {}",
            args.join(" "),
            exit_code,
            stderr.trim()
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse `git log --stat --format="%H %s"` output into commits, in output order
pub fn parse_git_log(output: &str, repo: &str, branch: &str, now: DateTime<Utc>) -> Vec<RepositoryActivity> {
    let mut commits: Vec<RepositoryActivity> = Vec::new();

    for line in output.lines() {
        if let Some((hash, subject)) = parse_header(line) {
            commits.push(RepositoryActivity {
                timestamp: now,
                repo: repo.to_string(),
                commit_hash: hash.to_string(),
                commit_message: subject.to_string(),
                files_changed: Vec::new(),
                additions: 0,
                deletions: 0,
                branch: branch.to_string(),
            });
            continue;
        }

        let Some(current) = commits.last_mut() else {
            continue;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some((additions, deletions)) = parse_shortstat(line) {
            current.additions = additions;
            current.deletions = deletions;
        } else if let Some(file) = parse_stat_file(line) {
            current.files_changed.push(file.to_string());
        }
    }

    commits
}

/// `<40 hex> <subject>`. The subject may be empty.
fn parse_header(line: &str) -> Option<(&str, &str)> {
    let (hash, subject) = line.split_once(' ').unwrap_or((line, ""));
    let is_hash = hash.len() == 40 && hash.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    is_hash.then_some((hash, subject.trim()))
}

/// `N file(s) changed[, X insertion(s)(+)][, Y deletion(s)(-)]`
fn parse_shortstat(line: &str) -> Option<(u64, u64)> {
    let mut parts = line.split(", ");
    let first = parts.next()?;
    let (count, rest) = first.split_once(' ')?;
    count.parse::<u64>().ok()?;
    if rest != "file changed" && rest != "files changed" {
        return None;
    }

    let mut additions = 0;
    let mut deletions = 0;
    for part in parts {
        let (n, what) = part.split_once(' ')?;
        let n: u64 = n.parse().ok()?;
        if what.starts_with("insertion") {
            additions = n;
        } else if what.starts_with("deletion") {
            deletions = n;
        }
    }
    Some((additions, deletions))
}

/// ` path/to/file | 12 +++--` or ` image.png | Bin 0 -> 12 bytes`
fn parse_stat_file(line: &str) -> Option<&str> {
    let (path, stat) = line.rsplit_once(" | ")?;
    let stat = stat.trim_start();
    let counted = stat.split_whitespace().next()?.parse::<u64>().is_ok();
    if !counted && !stat.starts_with("Bin") {
        return None;
    }
    let path = path.trim();
    (!path.is_empty()).then_some(path)
}
