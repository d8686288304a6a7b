//! Anthropic Messages API adapter.
//!
//! One client backs both oracles: a small fast model decides whether a
//! snapshot is worth posting, a larger one writes the post.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};

use crate::config::AnthropicSettings;
use crate::domain::{ContextSnapshot, Decision, GeneratedPost, TweetRecord, MAX_POST_CHARS};

use super::{DecisionOracle, GenerationOracle};

const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 256;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const DECISION_SYSTEM_PROMPT: &str = "You review a developer's recent activity and decide whether it is \
worth a build-in-public post.

Worth posting: a feature started or finished, an interesting bug solved, something new learned, \
an architectural decision, a milestone, a new tool tried.

Not worth posting: routine saves, debugging that went nowhere, task switching without progress, \
formatting or config churn, anything close to a recent post.

Reply with JSON only:
{\"shouldPublish\": true|false, \"reason\": \"short explanation\", \"topic\": \"short topic when posting\"}";

const GENERATION_SYSTEM_PROMPT: &str = "You are a developer posting about what you are building in public. \
Write one post of at most 280 characters about the activity you are given.

- Sound like a working developer, not a marketer
- Name the concrete tools, languages and pieces you touched
- Casual but informative
- At most two hashtags, at most one emoji
- Vary how posts open
- Suggest a screenshot when there is something visual to show

Reply with JSON only:
{\"text\": \"the post\", \"suggestScreenshot\": true|false}";

/// Client for the Anthropic Messages API
pub struct AnthropicOracle {
    client: reqwest::Client,
    settings: AnthropicSettings,
    /// Window length quoted in the decision prompt
    window_minutes: u64,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

impl AnthropicOracle {
    pub fn new(settings: AnthropicSettings, window_minutes: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            settings,
            window_minutes,
        })
    }

    /// Build API URL
    fn api_url(&self) -> String {
        format!("{}/v1/messages", self.settings.api_url.trim_end_matches('/'))
    }

    /// Send one user turn and return the first text block of the reply
    async fn complete(&self, model: &str, system: &str, prompt: &str) -> Result<String> {
        let request = MessagesRequest {
            model,
            max_tokens: MAX_TOKENS,
            system,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(self.api_url())
            .header("x-api-key", &self.settings.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
            .context("Failed to reach Anthropic API")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            match serde_json::from_str::<ApiErrorBody>(&body) {
                Ok(err) => anyhow::bail!(
                    "Anthropic API error ({}): {}: {}",
                    status,
                    err.error.kind,
                    err.error.message
                ),
                Err(_) => anyhow::bail!("Anthropic API error ({}): {}", status, body),
            }
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .context("Failed to parse Anthropic response")?;

        parsed
            .content
            .into_iter()
            .find(|b| b.kind == "text")
            .and_then(|b| b.text)
            .context("Anthropic response contained no text block")
    }
}

#[async_trait]
impl DecisionOracle for AnthropicOracle {
    #[instrument(skip_all, fields(model = %self.settings.decision_model))]
    async fn decide(&self, snapshot: &ContextSnapshot, recent: &[TweetRecord]) -> Result<Decision> {
        info!("Evaluating publish-worthiness");
        let prompt = decision_prompt(self.window_minutes, snapshot, recent);
        let reply = self
            .complete(&self.settings.decision_model, DECISION_SYSTEM_PROMPT, &prompt)
            .await?;

        let decision: Decision = parse_json_reply(&reply).context("Malformed decision reply")?;
        info!(
            should_publish = decision.should_publish,
            reason = %decision.reason,
            topic = %decision.topic,
            "Decision received"
        );
        Ok(decision)
    }
}

#[async_trait]
impl GenerationOracle for AnthropicOracle {
    #[instrument(skip_all, fields(model = %self.settings.generation_model, topic = %topic))]
    async fn generate(
        &self,
        snapshot: &ContextSnapshot,
        topic: &str,
        recent: &[TweetRecord],
    ) -> Result<GeneratedPost> {
        info!("Generating post");
        let prompt = generation_prompt(snapshot, topic, recent);
        let reply = self
            .complete(&self.settings.generation_model, GENERATION_SYSTEM_PROMPT, &prompt)
            .await?;

        let post: GeneratedPost = parse_json_reply(&reply).context("Malformed generation reply")?;
        let length = post.text.chars().count();
        if length > MAX_POST_CHARS {
            warn!(length, "Generated post too long, truncating");
        }
        let post = post.clamped();
        debug!(
            length = post.text.chars().count(),
            suggest_screenshot = post.suggest_screenshot,
            "Post generated"
        );
        Ok(post)
    }
}

/// User prompt for the decision oracle
pub fn decision_prompt(window_minutes: u64, snapshot: &ContextSnapshot, recent: &[TweetRecord]) -> String {
    let history = if recent.is_empty() {
        "No recent posts.".to_string()
    } else {
        recent
            .iter()
            .map(|t| format!("- [{}] {}", t.timestamp.to_rfc3339(), t.text))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "Activity summary from the last {} minutes:\n{}\n\nRecent posts (avoid repetition):\n{}\n\nShould this activity be posted about?",
        window_minutes, snapshot.summary, history
    )
}

/// User prompt for the generation oracle
pub fn generation_prompt(snapshot: &ContextSnapshot, topic: &str, recent: &[TweetRecord]) -> String {
    let mut sections = vec![
        format!("Topic: {}", topic),
        format!("Activity details:\n{}", snapshot.summary),
    ];

    if !snapshot.repository_activity.is_empty() {
        let commits: Vec<String> = snapshot
            .repository_activity
            .iter()
            .map(|g| {
                format!(
                    "- {} ({}, +{}/-{})",
                    g.commit_message, g.repo, g.additions, g.deletions
                )
            })
            .collect();
        sections.push(format!("Git commits:\n{}", commits.join("\n")));
    }

    if !snapshot.assistant_activity.is_empty() {
        let exchanges: Vec<String> = snapshot
            .assistant_activity
            .iter()
            .map(|c| {
                let message = c.user_message.as_deref().unwrap_or("interaction");
                match c.files_modified {
                    Some(ref files) if !files.is_empty() => {
                        format!("- {} (modified: {})", message, files.join(", "))
                    }
                    _ => format!("- {}", message),
                }
            })
            .collect();
        sections.push(format!("Assistant interactions:\n{}", exchanges.join("\n")));
    }

    let history = if recent.is_empty() {
        "No recent posts.".to_string()
    } else {
        recent
            .iter()
            .map(|t| format!("- {}", t.text))
            .collect::<Vec<_>>()
            .join("\n")
    };
    sections.push(format!("Recent posts (avoid similar style and content):\n{}", history));
    sections.push("Write a post about this activity.".to_string());

    sections.join("\n\n")
}

/// Parse a JSON object from a model reply, tolerating markdown fences and prose around it
pub fn parse_json_reply<T: DeserializeOwned>(reply: &str) -> Result<T> {
    let trimmed = reply.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end().trim_end_matches("```").trim())
        .unwrap_or(trimmed);

    if let Ok(value) = serde_json::from_str(unfenced) {
        return Ok(value);
    }

    let start = unfenced.find('{').context("No JSON object in reply")?;
    let end = unfenced.rfind('}').context("No JSON object in reply")?;
    if end < start {
        anyhow::bail!("No JSON object in reply");
    }
    serde_json::from_str(&unfenced[start..=end]).context("Reply is not valid JSON")
}
