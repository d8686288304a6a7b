//! Context snapshots: the summarized contents of the activity window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::activity::{
    ActivityEvent, AssistantActivity, RepositoryActivity, ScreenActivity, VoiceActivity,
};

/// Summary used when no clause applies
pub const EMPTY_SUMMARY: &str = "No notable activity in the current window.";

/// Everything inside the window at one instant, split by event kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSnapshot {
    /// When the snapshot was taken
    pub timestamp: DateTime<Utc>,
    pub screen_activity: Vec<ScreenActivity>,
    pub voice_activity: Vec<VoiceActivity>,
    #[serde(rename = "claudeActivity")]
    pub assistant_activity: Vec<AssistantActivity>,
    #[serde(rename = "gitActivity")]
    pub repository_activity: Vec<RepositoryActivity>,
    /// Human-readable digest of the four lists
    pub summary: String,
}

impl ContextSnapshot {
    /// Partition events by kind (arrival order kept) and derive the summary
    pub fn from_events<'a, I>(timestamp: DateTime<Utc>, events: I) -> Self
    where
        I: IntoIterator<Item = &'a ActivityEvent>,
    {
        let mut screen = Vec::new();
        let mut voice = Vec::new();
        let mut assistant = Vec::new();
        let mut repository = Vec::new();

        for event in events {
            match event {
                ActivityEvent::Screen(e) => screen.push(e.clone()),
                ActivityEvent::Voice(e) => voice.push(e.clone()),
                ActivityEvent::Assistant(e) => assistant.push(e.clone()),
                ActivityEvent::Repository(e) => repository.push(e.clone()),
            }
        }

        let summary = build_summary(&screen, &voice, &assistant, &repository);

        Self {
            timestamp,
            screen_activity: screen,
            voice_activity: voice,
            assistant_activity: assistant,
            repository_activity: repository,
            summary,
        }
    }

    /// Total number of events across all kinds
    pub fn event_count(&self) -> usize {
        self.screen_activity.len()
            + self.voice_activity.len()
            + self.assistant_activity.len()
            + self.repository_activity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.event_count() == 0
    }
}

/// Build the one-line digest of a window.
///
/// Clause order is fixed (screen, voice, claude, git) and empty kinds are
/// left out. Distinct names keep first-seen order.
pub fn build_summary(
    screen: &[ScreenActivity],
    voice: &[VoiceActivity],
    assistant: &[AssistantActivity],
    repository: &[RepositoryActivity],
) -> String {
    let mut parts: Vec<String> = Vec::new();

    if !screen.is_empty() {
        let apps = distinct(
            screen
                .iter()
                .filter_map(|s| s.app_name.as_deref())
                .filter(|name| !name.is_empty()),
        );
        let apps = if apps.is_empty() {
            "unknown apps".to_string()
        } else {
            apps.join(", ")
        };
        parts.push(format!("Screen: {} captures across {}", screen.len(), apps));
    }

    if !voice.is_empty() {
        parts.push(format!("Voice: {} transcriptions", voice.len()));
    }

    if !assistant.is_empty() {
        let files = distinct(
            assistant
                .iter()
                .flat_map(|a| a.files_modified.iter().flatten())
                .map(String::as_str),
        );
        let tools = distinct(
            assistant
                .iter()
                .flat_map(|a| a.tools_used.iter().flatten())
                .map(String::as_str),
        );

        let mut clause = format!("Claude: {} interactions", assistant.len());
        if !files.is_empty() {
            clause.push_str(&format!(", modified {}", files.join(", ")));
        }
        if !tools.is_empty() {
            clause.push_str(&format!(", used {}", tools.join(", ")));
        }
        parts.push(clause);
    }

    if !repository.is_empty() {
        let repos = distinct(repository.iter().map(|r| r.repo.as_str()));
        let messages: Vec<&str> = repository
            .iter()
            .map(|r| r.commit_message.as_str())
            .collect();
        parts.push(format!(
            "Git: {} commits in {} — {}",
            repository.len(),
            repos.join(", "),
            messages.join("; ")
        ));
    }

    if parts.is_empty() {
        return EMPTY_SUMMARY.to_string();
    }

    format!("{}.", parts.join(". "))
}

fn distinct<'a>(items: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut seen: Vec<&'a str> = Vec::new();
    for item in items {
        if !seen.contains(&item) {
            seen.push(item);
        }
    }
    seen
}
