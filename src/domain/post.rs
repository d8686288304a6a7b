//! Post records and the values exchanged with the oracles and publisher.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hard length limit of a post
pub const MAX_POST_CHARS: usize = 280;

/// A published post, as kept in the append-only history file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TweetRecord {
    pub id: String,
    pub text: String,
    /// ISO 8601 publish time
    pub timestamp: DateTime<Utc>,
    pub topic: String,
    /// Post this one replied to, if it continued a thread
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
}

/// Verdict of the decision oracle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    #[serde(alias = "shouldTweet")]
    pub should_publish: bool,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub topic: String,
}

impl Decision {
    pub fn skip(reason: impl Into<String>) -> Self {
        Self {
            should_publish: false,
            reason: reason.into(),
            topic: String::new(),
        }
    }
}

/// Output of the generation oracle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedPost {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub suggest_screenshot: bool,
}

impl GeneratedPost {
    /// Clamp the text to [`MAX_POST_CHARS`]
    pub fn clamped(mut self) -> Self {
        self.text = truncate_post(&self.text);
        self
    }
}

/// What the orchestrator asks the publisher to post
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub text: String,
    /// Continue the thread under this post id
    pub reply_to: Option<String>,
    pub media_path: Option<PathBuf>,
}

/// What the publisher reports back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedPost {
    pub id: String,
    pub text: String,
}

/// Cut text to [`MAX_POST_CHARS`], ending in `...` when it had to be cut
pub fn truncate_post(text: &str) -> String {
    if text.chars().count() <= MAX_POST_CHARS {
        return text.to_string();
    }
    let head: String = text.chars().take(MAX_POST_CHARS - 3).collect();
    format!("{}...", head)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_post() {
        let short = "shipped the thing";
        assert_eq!(truncate_post(short), short);

        let exact = "a".repeat(MAX_POST_CHARS);
        assert_eq!(truncate_post(&exact), exact);

        let long = "b".repeat(MAX_POST_CHARS + 1);
        let cut = truncate_post(&long);
        assert_eq!(cut.chars().count(), MAX_POST_CHARS);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn test_decision_accepts_legacy_field() {
        let decision: Decision =
            serde_json::from_str(r#"{"shouldTweet": true, "reason": "milestone", "topic": "parser"}"#)
                .unwrap();
        assert!(decision.should_publish);
        assert_eq!(decision.topic, "parser");
    }

    #[test]
    fn test_record_optional_fields_omitted() {
        let record = TweetRecord {
            id: "1".to_string(),
            text: "hello".to_string(),
            timestamp: Utc::now(),
            topic: "intro".to_string(),
            thread_id: None,
            media_url: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("threadId").is_none());
        assert!(json.get("mediaUrl").is_none());
    }
}
