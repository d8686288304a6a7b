//! Activity events produced by the collectors.
//!
//! Every collector normalizes its raw signal into one of four event kinds.
//! Events are immutable value records once constructed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum length of an assistant reply kept on an event
pub const MAX_ASSISTANT_REPLY_CHARS: usize = 500;

/// Text captured from the screen via OCR
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenActivity {
    pub timestamp: DateTime<Utc>,
    pub ocr_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_title: Option<String>,
}

/// A transcribed stretch of microphone audio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceActivity {
    pub timestamp: DateTime<Utc>,
    pub transcript: String,
}

/// One completed user/assistant exchange from an AI-assistant session log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantActivity {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools_used: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_modified: Option<Vec<String>>,
}

impl AssistantActivity {
    /// Build an exchange record.
    ///
    /// Returns `None` when neither side of the exchange has text. The reply is
    /// cut to [`MAX_ASSISTANT_REPLY_CHARS`] and empty tool/file lists are
    /// stored as absent.
    pub fn new(
        timestamp: DateTime<Utc>,
        session_id: impl Into<String>,
        user_message: Option<String>,
        assistant_message: Option<String>,
        tools_used: Vec<String>,
        files_modified: Vec<String>,
    ) -> Option<Self> {
        let user_message = user_message.filter(|m| !m.is_empty());
        let assistant_message = assistant_message
            .filter(|m| !m.is_empty())
            .map(|m| truncate_reply(&m));

        if user_message.is_none() && assistant_message.is_none() {
            return None;
        }

        Some(Self {
            timestamp,
            session_id: session_id.into(),
            user_message,
            assistant_message,
            tools_used: non_empty(tools_used),
            files_modified: non_empty(files_modified),
        })
    }
}

/// A single commit observed in a watched repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryActivity {
    pub timestamp: DateTime<Utc>,
    pub repo: String,
    pub commit_hash: String,
    pub commit_message: String,
    pub files_changed: Vec<String>,
    pub additions: u64,
    pub deletions: u64,
    pub branch: String,
}

/// Any activity event, tagged by kind on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ActivityEvent {
    #[serde(rename = "screen-activity")]
    Screen(ScreenActivity),
    #[serde(rename = "voice-activity")]
    Voice(VoiceActivity),
    #[serde(rename = "claude-activity")]
    Assistant(AssistantActivity),
    #[serde(rename = "git-activity")]
    Repository(RepositoryActivity),
}

impl ActivityEvent {
    /// When the activity happened
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Screen(e) => e.timestamp,
            Self::Voice(e) => e.timestamp,
            Self::Assistant(e) => e.timestamp,
            Self::Repository(e) => e.timestamp,
        }
    }

    /// The kind of this event
    pub fn kind(&self) -> ActivityKind {
        match self {
            Self::Screen(_) => ActivityKind::Screen,
            Self::Voice(_) => ActivityKind::Voice,
            Self::Assistant(_) => ActivityKind::Assistant,
            Self::Repository(_) => ActivityKind::Repository,
        }
    }
}

impl From<ScreenActivity> for ActivityEvent {
    fn from(e: ScreenActivity) -> Self {
        Self::Screen(e)
    }
}

impl From<VoiceActivity> for ActivityEvent {
    fn from(e: VoiceActivity) -> Self {
        Self::Voice(e)
    }
}

impl From<AssistantActivity> for ActivityEvent {
    fn from(e: AssistantActivity) -> Self {
        Self::Assistant(e)
    }
}

impl From<RepositoryActivity> for ActivityEvent {
    fn from(e: RepositoryActivity) -> Self {
        Self::Repository(e)
    }
}

/// Discriminant of [`ActivityEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivityKind {
    Screen,
    Voice,
    Assistant,
    Repository,
}

impl ActivityKind {
    /// Wire tag used for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Screen => "screen-activity",
            Self::Voice => "voice-activity",
            Self::Assistant => "claude-activity",
            Self::Repository => "git-activity",
        }
    }
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn truncate_reply(text: &str) -> String {
    if text.chars().count() > MAX_ASSISTANT_REPLY_CHARS {
        let head: String = text.chars().take(MAX_ASSISTANT_REPLY_CHARS).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

fn non_empty(items: Vec<String>) -> Option<Vec<String>> {
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}
