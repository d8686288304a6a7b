//! AI-assistant session log collector.
//!
//! The assistant appends one JSON record per line to
//! `<history root>/projects/<project>/<session>.jsonl`. This collector follows
//! those files, rebuilds user/assistant exchanges from the new lines and
//! emits one [`AssistantActivity`] per exchange.
//!
//! Read positions are kept per file in the persisted state, counted in
//! complete non-empty lines. Files that already exist at startup are skipped to their
//! end; files created while running are read from the start.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use notify::RecursiveMode;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::paths;
use crate::core::event_bus::EventBus;
use crate::core::store::StateStore;
use crate::domain::{ActivityEvent, AssistantActivity};

use super::FileWatch;

const DEBOUNCE: Duration = Duration::from_millis(300);

pub struct AssistantLogCollector {
    projects_dir: PathBuf,
    bus: Arc<EventBus>,
    store: Arc<dyn StateStore>,
}

impl AssistantLogCollector {
    pub fn new(history_root: &Path, bus: Arc<EventBus>, store: Arc<dyn StateStore>) -> Self {
        Self {
            projects_dir: paths::assistant_projects(history_root),
            bus,
            store,
        }
    }

    pub fn projects_dir(&self) -> &Path {
        &self.projects_dir
    }

    /// Record the current length of every existing session file that has no offset yet.
    ///
    /// Returns the number of files primed.
    pub fn prime(&self) -> Result<usize> {
        let pattern = self.projects_dir.join("**").join("*.jsonl");
        let pattern = pattern.to_string_lossy();

        let mut lengths = Vec::new();
        for entry in glob::glob(&pattern).context("Invalid session log pattern")? {
            let path = match entry {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "Unreadable session log entry");
                    continue;
                }
            };
            match std::fs::read_to_string(&path) {
                Ok(content) => lengths.push((path_key(&path), count_lines(&content))),
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to read session log"),
            }
        }

        let mut primed = 0;
        self.store.update_state(&mut |s| {
            primed = 0;
            for (key, len) in &lengths {
                if !s.assistant_log_offsets.contains_key(key) {
                    s.assistant_log_offsets.insert(key.clone(), *len);
                    primed += 1;
                }
            }
        })?;

        debug!(files = lengths.len(), primed, "Primed session log offsets");
        Ok(primed)
    }

    /// Read lines appended since the stored offset and emit the exchanges in them.
    ///
    /// Returns the number of exchanges emitted.
    pub async fn process_file(&self, path: &Path) -> Result<usize> {
        let key = path_key(path);
        let offset = self
            .store
            .load_state()?
            .assistant_log_offsets
            .get(&key)
            .copied()
            .unwrap_or(0);

        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read session log: {}", path.display()))?;
        let lines = complete_lines(&content);

        if offset >= lines.len() {
            if offset > lines.len() {
                debug!(path = %path.display(), offset, len = lines.len(), "Session log shrank, resetting offset");
                let len = lines.len();
                self.store.update_state(&mut |s| {
                    s.assistant_log_offsets.insert(key.clone(), len);
                })?;
            }
            return Ok(0);
        }

        let session_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let batch = parse_exchanges(&lines[offset..], &session_id, Utc::now());

        for exchange in &batch.exchanges {
            info!(
                session = %exchange.session_id,
                user_message = %preview(exchange.user_message.as_deref()),
                tools = ?exchange.tools_used,
                "Assistant activity detected"
            );
            self.bus.publish(&ActivityEvent::Assistant(exchange.clone()));
        }

        // An exchange still waiting for its reply is re-read next time
        let next = offset + batch.consumed;
        if next != offset {
            self.store.update_state(&mut |s| {
                s.assistant_log_offsets.insert(key.clone(), next);
            })?;
        }

        Ok(batch.exchanges.len())
    }

    /// Prime offsets, then follow the projects directory until shutdown
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            if !self.projects_dir.exists() {
                info!(path = %self.projects_dir.display(), "Assistant projects path not found, skipping");
                return;
            }

            if let Err(e) = self.prime() {
                warn!(error = %format!("{:#}", e), "Failed to prime session log offsets");
            }

            let mut file_watch = match FileWatch::start(&self.projects_dir, RecursiveMode::Recursive, DEBOUNCE) {
                Ok(w) => w,
                Err(e) => {
                    warn!(error = %e, "Cannot watch assistant projects, skipping");
                    return;
                }
            };
            info!(path = %self.projects_dir.display(), "Watching assistant session logs");

            while let Some(changed) = file_watch.next(&mut shutdown).await {
                let files: BTreeSet<PathBuf> = changed
                    .into_iter()
                    .filter(|p| p.extension().is_some_and(|e| e == "jsonl") && p.is_file())
                    .collect();

                for file in files {
                    if let Err(e) = self.process_file(&file).await {
                        warn!(path = %file.display(), error = %format!("{:#}", e), "Failed to process session log");
                    }
                }
            }

            info!("Assistant log collector stopped");
        })
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn count_lines(content: &str) -> usize {
    complete_lines(content).len()
}

/// Non-empty lines terminated by `\n`. A trailing partial line is left for
/// the next read.
fn complete_lines(content: &str) -> Vec<&str> {
    let complete = match content.rfind('\n') {
        Some(end) => &content[..=end],
        None => "",
    };
    complete.lines().filter(|l| !l.trim().is_empty()).collect()
}

fn preview(message: Option<&str>) -> String {
    message.unwrap_or("").chars().take(100).collect()
}

/// An exchange under construction
#[derive(Default)]
struct Pending {
    user_message: Option<String>,
    tools: Vec<String>,
    files: Vec<String>,
}

impl Pending {
    fn collect(&mut self, record: &Value) {
        let (tools, files) = tools_and_files(record);
        for tool in tools {
            push_distinct(&mut self.tools, tool);
        }
        for file in files {
            push_distinct(&mut self.files, file);
        }
    }

    fn finish(
        &mut self,
        session_id: &str,
        now: DateTime<Utc>,
        reply: Option<String>,
    ) -> Option<AssistantActivity> {
        let taken = std::mem::take(self);
        AssistantActivity::new(now, session_id, taken.user_message, reply, taken.tools, taken.files)
    }
}

/// Exchanges rebuilt from a run of session log lines
#[derive(Debug, Default)]
pub struct ExchangeBatch {
    pub exchanges: Vec<AssistantActivity>,
    /// Lines before the exchange still waiting for a reply, or all of them
    pub consumed: usize,
}

/// Rebuild exchanges from session log lines.
///
/// A user record with text opens an exchange, emitting any exchange still
/// open without a reply. The next assistant record with text closes it. All
/// other records contribute tool names and file paths to the open exchange.
/// Assistant text with no open exchange and unparseable lines are skipped.
///
/// An exchange left open at the end is not emitted; `consumed` stops at the
/// line that opened it.
pub fn parse_exchanges(lines: &[&str], session_id: &str, now: DateTime<Utc>) -> ExchangeBatch {
    let mut exchanges = Vec::new();
    let mut pending = Pending::default();
    let mut opened_at: Option<usize> = None;

    for (index, line) in lines.iter().enumerate() {
        let record: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(_) => continue,
        };

        let kind = record.get("type").and_then(Value::as_str).unwrap_or("");
        let role = record
            .pointer("/message/role")
            .and_then(Value::as_str)
            .unwrap_or("");
        let text = message_text(&record);

        if matches!(kind, "human" | "user") && role == "user" && !text.is_empty() {
            if pending.user_message.is_some() {
                exchanges.extend(pending.finish(session_id, now, None));
            }
            pending = Pending {
                user_message: Some(text),
                ..Pending::default()
            };
            opened_at = Some(index);
        } else if kind == "assistant" {
            pending.collect(&record);
            if !text.is_empty() && pending.user_message.is_some() {
                exchanges.extend(pending.finish(session_id, now, Some(text)));
                opened_at = None;
            }
        } else {
            pending.collect(&record);
        }
    }

    let consumed = match (pending.user_message.is_some(), opened_at) {
        (true, Some(index)) => index,
        _ => lines.len(),
    };

    ExchangeBatch { exchanges, consumed }
}

/// Text of `message.content`, whether a plain string or a list of blocks
fn message_text(record: &Value) -> String {
    match record.pointer("/message/content") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn tools_and_files(record: &Value) -> (Vec<String>, Vec<String>) {
    let mut tools = Vec::new();
    let mut files = Vec::new();

    let top_level_tool = record
        .get("toolName")
        .or_else(|| record.get("tool_name"))
        .and_then(Value::as_str);
    if let Some(tool) = top_level_tool {
        tools.push(tool.to_string());
    }
    if let Some(file) = record.get("filePath").and_then(Value::as_str) {
        files.push(file.to_string());
    }

    if let Some(Value::Array(blocks)) = record.pointer("/message/content") {
        for block in blocks {
            if block.get("type").and_then(Value::as_str) != Some("tool_use") {
                continue;
            }
            if let Some(name) = block.get("name").and_then(Value::as_str) {
                tools.push(name.to_string());
            }
            if let Some(file) = block.pointer("/input/file_path").and_then(Value::as_str) {
                files.push(file.to_string());
            }
        }
    }

    (tools, files)
}

fn push_distinct(list: &mut Vec<String>, item: String) {
    if !item.is_empty() && !list.contains(&item) {
        list.push(item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event_bus::Channel;
    use crate::core::store::MemoryStore;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn user(text: &str) -> String {
        serde_json::json!({"type": "user", "message": {"role": "user", "content": text}}).to_string()
    }

    fn assistant(text: &str) -> String {
        serde_json::json!({
            "type": "assistant",
            "message": {"role": "assistant", "content": [{"type": "text", "text": text}]}
        })
        .to_string()
    }

    fn tool_call(name: &str, file: &str) -> String {
        serde_json::json!({
            "type": "assistant",
            "message": {"role": "assistant", "content": [
                {"type": "tool_use", "name": name, "input": {"file_path": file}}
            ]}
        })
        .to_string()
    }

    fn parse(lines: &[String]) -> Vec<AssistantActivity> {
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        parse_exchanges(&refs, "session-1", Utc::now()).exchanges
    }

    #[test]
    fn test_exchange_with_tools() {
        let lines = vec![
            user("add a parser"),
            tool_call("Edit", "src/parser.rs"),
            tool_call("Edit", "src/parser.rs"),
            serde_json::json!({"type": "progress", "toolName": "Bash"}).to_string(),
            assistant("Parser added."),
        ];
        let exchanges = parse(&lines);
        assert_eq!(exchanges.len(), 1);

        let ex = &exchanges[0];
        assert_eq!(ex.session_id, "session-1");
        assert_eq!(ex.user_message.as_deref(), Some("add a parser"));
        assert_eq!(ex.assistant_message.as_deref(), Some("Parser added."));
        assert_eq!(ex.tools_used.as_deref(), Some(&["Edit".to_string(), "Bash".to_string()][..]));
        assert_eq!(ex.files_modified.as_deref(), Some(&["src/parser.rs".to_string()][..]));
    }

    #[test]
    fn test_unanswered_user_message_is_flushed() {
        let lines = vec![user("first"), user("second"), assistant("answer")];
        let exchanges = parse(&lines);
        assert_eq!(exchanges.len(), 2);
        assert_eq!(exchanges[0].user_message.as_deref(), Some("first"));
        assert_eq!(exchanges[0].assistant_message, None);
        assert_eq!(exchanges[1].assistant_message.as_deref(), Some("answer"));
    }

    #[test]
    fn test_open_exchange_is_held_back() {
        let lines = vec![
            "{ not json".to_string(),
            assistant("orphan reply"),
            user("still thinking"),
            tool_call("Read", "README.md"),
        ];
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let batch = parse_exchanges(&refs, "session-1", Utc::now());
        assert!(batch.exchanges.is_empty());
        assert_eq!(batch.consumed, 2);

        let mut answered = lines.clone();
        answered.push(assistant("read it"));
        let refs: Vec<&str> = answered[batch.consumed..].iter().map(String::as_str).collect();
        let batch = parse_exchanges(&refs, "session-1", Utc::now());
        assert_eq!(batch.consumed, 3);
        assert_eq!(batch.exchanges.len(), 1);
        let ex = &batch.exchanges[0];
        assert_eq!(ex.user_message.as_deref(), Some("still thinking"));
        assert_eq!(ex.assistant_message.as_deref(), Some("read it"));
        assert_eq!(ex.tools_used.as_deref(), Some(&["Read".to_string()][..]));
    }

    #[test]
    fn test_legacy_human_type_and_long_reply() {
        let human = serde_json::json!({"type": "human", "message": {"role": "user", "content": "hi"}}).to_string();
        let long = "z".repeat(800);
        let exchanges = parse(&[human, assistant(&long)]);
        assert_eq!(exchanges.len(), 1);
        let reply = exchanges[0].assistant_message.as_deref().unwrap();
        assert_eq!(reply.chars().count(), 503);
        assert!(reply.ends_with("..."));
    }

    #[tokio::test]
    async fn test_process_file_tracks_offsets() {
        let temp = TempDir::new().unwrap();
        let project = temp.path().join("projects").join("demo");
        std::fs::create_dir_all(&project).unwrap();
        let old = project.join("old.jsonl");
        std::fs::write(&old, format!("{}\n{}\n", user("before start"), assistant("ok"))).unwrap();

        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        bus.subscribe(Channel::All, move |event| {
            if let ActivityEvent::Assistant(a) = event {
                s.lock().unwrap().push(a.user_message.clone().unwrap_or_default());
            }
            Ok(())
        });

        let store = Arc::new(MemoryStore::new());
        let collector = AssistantLogCollector::new(temp.path(), bus, store.clone());
        assert_eq!(collector.prime().unwrap(), 1);

        // Existing content is skipped
        assert_eq!(collector.process_file(&old).await.unwrap(), 0);

        let mut content = std::fs::read_to_string(&old).unwrap();
        content.push('\n');
        content.push_str(&format!("{}\n{}\n", user("after start"), assistant("done")));
        std::fs::write(&old, content).unwrap();
        assert_eq!(collector.process_file(&old).await.unwrap(), 1);

        // A file created later is read from the start
        let new = project.join("new.jsonl");
        std::fs::write(&new, format!("{}\n{}\n", user("fresh session"), assistant("hello"))).unwrap();
        assert_eq!(collector.process_file(&new).await.unwrap(), 1);

        assert_eq!(*seen.lock().unwrap(), vec!["after start", "fresh session"]);
        let offsets = store.load_state().unwrap().assistant_log_offsets;
        assert_eq!(offsets.get(&path_key(&old)), Some(&4));
        assert_eq!(offsets.get(&path_key(&new)), Some(&2));
    }

    #[tokio::test]
    async fn test_partial_line_is_read_once_complete() {
        let temp = TempDir::new().unwrap();
        let project = temp.path().join("projects").join("demo");
        std::fs::create_dir_all(&project).unwrap();
        let log = project.join("live.jsonl");

        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        bus.subscribe(Channel::All, move |event| {
            if let ActivityEvent::Assistant(a) = event {
                s.lock().unwrap().push(a.assistant_message.clone());
            }
            Ok(())
        });

        let store = Arc::new(MemoryStore::new());
        let collector = AssistantLogCollector::new(temp.path(), bus, store.clone());

        let reply = assistant("written in two chunks");
        let (head, _) = reply.split_at(reply.len() / 2);
        std::fs::write(&log, format!("{}\n{}", user("ship it"), head)).unwrap();
        assert_eq!(collector.process_file(&log).await.unwrap(), 0);

        std::fs::write(&log, format!("{}\n{}\n", user("ship it"), reply)).unwrap();
        assert_eq!(collector.process_file(&log).await.unwrap(), 1);

        let replies = seen.lock().unwrap();
        assert_eq!(*replies, vec![Some("written in two chunks".to_string())]);
        assert_eq!(
            store.load_state().unwrap().assistant_log_offsets.get(&path_key(&log)),
            Some(&2)
        );
    }

    #[test]
    fn test_count_lines_ignores_unterminated_tail() {
        assert_eq!(count_lines("a\n\nb\n{\"half"), 2);
        assert_eq!(count_lines("no newline yet"), 0);
    }
}
