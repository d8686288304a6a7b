//! Screen and audio capture collector.
//!
//! Polls the local capture service (`/search`) for OCR frames and audio
//! transcripts recorded since the previous poll. The service returns
//! overlapping results between polls, so every text is hashed and emitted
//! only the first time it is seen.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::core::event_bus::EventBus;
use crate::core::store::StateStore;
use crate::domain::{ActivityEvent, ScreenActivity, VoiceActivity};

/// Most hashes remembered before the oldest half is dropped
pub const MAX_SEEN_HASHES: usize = 10_000;

/// Results requested per content type and poll
const PAGE_LIMIT: u32 = 50;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Bounded set of recently seen content hashes, oldest evicted first
#[derive(Debug)]
pub struct SeenHashes {
    capacity: usize,
    set: HashSet<String>,
    order: VecDeque<String>,
}

impl Default for SeenHashes {
    fn default() -> Self {
        Self::with_capacity(MAX_SEEN_HASHES)
    }
}

impl SeenHashes {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            set: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Remember `hash`. Returns `false` if it was already known.
    ///
    /// Going over capacity evicts the oldest hashes until half capacity remains.
    pub fn insert(&mut self, hash: String) -> bool {
        if self.set.contains(&hash) {
            return false;
        }
        self.set.insert(hash.clone());
        self.order.push_back(hash);

        if self.order.len() > self.capacity {
            let keep = self.capacity / 2;
            while self.order.len() > keep {
                if let Some(old) = self.order.pop_front() {
                    self.set.remove(&old);
                }
            }
            debug!(kept = keep, "Evicted old content hashes");
        }
        true
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.set.contains(hash)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// SHA256 of a text, hex encoded
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContentType {
    Ocr,
    Audio,
}

impl ContentType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Ocr => "ocr",
            Self::Audio => "audio",
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Value,
}

#[derive(Debug, Deserialize)]
struct OcrContent {
    #[serde(default)]
    text: String,
    app_name: Option<String>,
    window_name: Option<String>,
    timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AudioContent {
    #[serde(default)]
    transcription: String,
    timestamp: Option<String>,
}

/// Counts from one poll cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollResult {
    pub screen: usize,
    pub voice: usize,
}

pub struct ScreenpipeCollector {
    client: reqwest::Client,
    base_url: String,
    bus: Arc<EventBus>,
    store: Arc<dyn StateStore>,
    seen: Mutex<SeenHashes>,
}

impl ScreenpipeCollector {
    pub fn new(base_url: &str, bus: Arc<EventBus>, store: Arc<dyn StateStore>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bus,
            store,
            seen: Mutex::new(SeenHashes::default()),
        })
    }

    /// Fetch both content types since the last poll and emit unseen items.
    ///
    /// A failing content type is logged and does not stop the other. The
    /// poll cursor advances even when both fail.
    pub async fn poll_once(&self) -> Result<PollResult> {
        let started = Utc::now();
        let since = self.store.load_state()?.last_screen_poll_at.unwrap_or(started);

        let (ocr, audio) = tokio::join!(
            self.fetch(ContentType::Ocr, since),
            self.fetch(ContentType::Audio, since)
        );

        let mut result = PollResult::default();
        match ocr {
            Ok(items) => result.screen = self.emit_items(ContentType::Ocr, items),
            Err(e) => warn!(error = %format!("{:#}", e), "Failed to poll screen captures"),
        }
        match audio {
            Ok(items) => result.voice = self.emit_items(ContentType::Audio, items),
            Err(e) => warn!(error = %format!("{:#}", e), "Failed to poll audio transcripts"),
        }

        self.store
            .update_state(&mut |s| s.last_screen_poll_at = Some(started))?;

        Ok(result)
    }

    /// Poll immediately, then every `every`, until shutdown
    pub fn spawn(self, every: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(api = %self.base_url, interval_secs = every.as_secs(), "Capture collector started");

            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.poll_once().await {
                            Ok(r) if r.screen + r.voice > 0 => {
                                debug!(screen = r.screen, voice = r.voice, "Capture poll emitted events");
                            }
                            Ok(_) => {}
                            Err(e) => warn!(error = %format!("{:#}", e), "Capture poll failed"),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }

            info!("Capture collector stopped");
        })
    }

    async fn fetch(&self, content_type: ContentType, since: DateTime<Utc>) -> Result<Vec<Value>> {
        let url = format!("{}/search", self.base_url);
        let start_time = since.to_rfc3339_opts(SecondsFormat::Millis, true);
        let limit = PAGE_LIMIT.to_string();

        let response = self
            .client
            .get(&url)
            .query(&[
                ("content_type", content_type.as_str()),
                ("start_time", start_time.as_str()),
                ("limit", limit.as_str()),
            ])
            .send()
            .await
            .with_context(|| format!("Failed to reach capture API at {}", url))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Capture API error: {}", status);
        }

        let body: SearchResponse = response
            .json()
            .await
            .context("Failed to parse capture API response")?;
        Ok(body.data)
    }

    fn emit_items(&self, content_type: ContentType, items: Vec<Value>) -> usize {
        let mut emitted = 0;
        for raw in items {
            let Ok(item) = serde_json::from_value::<SearchItem>(raw) else {
                continue;
            };
            let event = match (content_type, item.kind.as_str()) {
                (ContentType::Ocr, "OCR") => match serde_json::from_value::<OcrContent>(item.content) {
                    Ok(c) => self.screen_event(c),
                    Err(_) => None,
                },
                (ContentType::Audio, "Audio") => match serde_json::from_value::<AudioContent>(item.content) {
                    Ok(c) => self.voice_event(c),
                    Err(_) => None,
                },
                _ => None,
            };

            if let Some(event) = event {
                self.bus.publish(&event);
                emitted += 1;
            }
        }
        emitted
    }

    fn screen_event(&self, content: OcrContent) -> Option<ActivityEvent> {
        let text = content.text.trim();
        if text.is_empty() || !self.remember(text) {
            return None;
        }
        debug!(app = ?content.app_name, length = text.len(), "Screen activity detected");
        Some(ActivityEvent::Screen(ScreenActivity {
            timestamp: parse_timestamp(content.timestamp.as_deref()),
            ocr_text: text.to_string(),
            app_name: content.app_name,
            window_title: content.window_name,
        }))
    }

    fn voice_event(&self, content: AudioContent) -> Option<ActivityEvent> {
        let transcript = content.transcription.trim();
        if transcript.is_empty() || !self.remember(transcript) {
            return None;
        }
        debug!(length = transcript.len(), "Voice activity detected");
        Some(ActivityEvent::Voice(VoiceActivity {
            timestamp: parse_timestamp(content.timestamp.as_deref()),
            transcript: transcript.to_string(),
        }))
    }

    fn remember(&self, text: &str) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(content_hash(text))
    }
}

fn parse_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seen_hashes_dedup() {
        let mut seen = SeenHashes::default();
        assert!(seen.insert(content_hash("hello")));
        assert!(!seen.insert(content_hash("hello")));
        assert!(seen.contains(&content_hash("hello")));
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn test_seen_hashes_evicts_oldest_half() {
        let mut seen = SeenHashes::with_capacity(10);
        for i in 0..10 {
            seen.insert(i.to_string());
        }
        assert_eq!(seen.len(), 10);

        seen.insert("10".to_string());
        assert_eq!(seen.len(), 5);
        assert!(!seen.contains("0"));
        assert!(!seen.contains("5"));
        assert!(seen.contains("6"));
        assert!(seen.contains("10"));
    }

    #[test]
    fn test_content_hash_is_sha256_hex() {
        let hash = content_hash("abc");
        assert_eq!(hash.len(), 64);
        assert!(hash.starts_with("ba7816bf"));
    }

    #[test]
    fn test_parse_timestamp_fallback() {
        let ts = parse_timestamp(Some("2025-06-11T10:15:00.123Z"));
        assert_eq!(ts.timestamp_subsec_millis(), 123);

        let before = Utc::now();
        assert!(parse_timestamp(Some("garbage")) >= before);
        assert!(parse_timestamp(None) >= before);
    }
}
