//! Publish orchestrator.
//!
//! Runs one snapshot through the pipeline:
//!
//! ```text
//! RATE-CHECK -> DECIDE -> GENERATE -> PUBLISH -> RECORD
//! ```
//!
//! Each stage can end the run early. A failing stage aborts only the current
//! snapshot; nothing is retried and no error leaves [`PublishOrchestrator::handle_snapshot`].

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, instrument, warn};

use crate::adapters::{DecisionOracle, GenerationOracle, Publisher};
use crate::domain::{ContextSnapshot, PublishRequest, TweetRecord};

use super::rate_limiter::{RateDecision, RateLimiter};
use super::store::StateStore;

/// Number of past posts shown to the oracles
pub const HISTORY_WINDOW: usize = 10;

/// Pipeline stage, used to attribute failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    RateCheck,
    Decide,
    Generate,
    Publish,
    Record,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RateCheck => "rate-check",
            Self::Decide => "decide",
            Self::Generate => "generate",
            Self::Publish => "publish",
            Self::Record => "record",
        };
        f.write_str(name)
    }
}

/// How a snapshot's run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    RateLimited(RateDecision),
    NotWorthy { reason: String },
    EmptyGeneration,
    Published { id: String, text: String, topic: String },
    Failed { stage: Stage, error: String },
}

impl PipelineOutcome {
    fn failed(stage: Stage, error: impl fmt::Display) -> Self {
        Self::Failed {
            stage,
            error: format!("{:#}", error),
        }
    }
}

pub struct PublishOrchestrator {
    rate_limiter: RateLimiter,
    decider: Arc<dyn DecisionOracle>,
    generator: Arc<dyn GenerationOracle>,
    publisher: Arc<dyn Publisher>,
    store: Arc<dyn StateStore>,
    /// Reply to the previous post so posts form one thread
    as_thread: bool,
}

impl PublishOrchestrator {
    pub fn new(
        rate_limiter: RateLimiter,
        decider: Arc<dyn DecisionOracle>,
        generator: Arc<dyn GenerationOracle>,
        publisher: Arc<dyn Publisher>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            rate_limiter,
            decider,
            generator,
            publisher,
            store,
            as_thread: true,
        }
    }

    pub fn with_threading(mut self, as_thread: bool) -> Self {
        self.as_thread = as_thread;
        self
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Run one snapshot through the pipeline and log the outcome
    #[instrument(skip_all, fields(events = snapshot.event_count()))]
    pub async fn handle_snapshot(&self, snapshot: &ContextSnapshot) -> PipelineOutcome {
        let outcome = self.run(snapshot).await;
        match outcome {
            PipelineOutcome::RateLimited(ref decision) => {
                info!(?decision, "Rate limited, skipping snapshot");
            }
            PipelineOutcome::NotWorthy { ref reason } => {
                info!(%reason, "Not worth publishing");
            }
            PipelineOutcome::EmptyGeneration => {
                warn!("Empty post generated, skipping");
            }
            PipelineOutcome::Published {
                ref id,
                ref text,
                ref topic,
            } => {
                info!(%id, %text, %topic, publisher = self.publisher.name(), "Post published");
            }
            PipelineOutcome::Failed { stage, ref error } => {
                error!(%stage, %error, "Publish pipeline failed");
            }
        }
        outcome
    }

    async fn run(&self, snapshot: &ContextSnapshot) -> PipelineOutcome {
        // RATE-CHECK
        match self.rate_limiter.check_at(Utc::now()) {
            Ok(RateDecision::Allowed) => {}
            Ok(blocked) => return PipelineOutcome::RateLimited(blocked),
            Err(e) => return PipelineOutcome::failed(Stage::RateCheck, e),
        }

        let recent = match self.store.recent_history(HISTORY_WINDOW) {
            Ok(recent) => recent,
            Err(e) => return PipelineOutcome::failed(Stage::Decide, e),
        };

        // DECIDE
        let decision = match self.decider.decide(snapshot, &recent).await {
            Ok(decision) => decision,
            Err(e) => return PipelineOutcome::failed(Stage::Decide, e),
        };
        if !decision.should_publish {
            return PipelineOutcome::NotWorthy {
                reason: decision.reason,
            };
        }

        // GENERATE
        let post = match self.generator.generate(snapshot, &decision.topic, &recent).await {
            Ok(post) => post.clamped(),
            Err(e) => return PipelineOutcome::failed(Stage::Generate, e),
        };
        if post.text.trim().is_empty() {
            return PipelineOutcome::EmptyGeneration;
        }
        if post.suggest_screenshot {
            info!("Screenshot suggested; no capture source configured, posting text only");
        }

        // PUBLISH
        let reply_to = if self.as_thread {
            match self.store.load_state() {
                Ok(state) => state.current_thread_id,
                Err(e) => return PipelineOutcome::failed(Stage::Publish, e),
            }
        } else {
            None
        };

        let request = PublishRequest {
            text: post.text,
            reply_to: reply_to.clone(),
            media_path: None,
        };
        let published = match self.publisher.publish(request).await {
            Ok(published) => published,
            Err(e) => return PipelineOutcome::failed(Stage::Publish, e),
        };

        // RECORD
        if let Err(e) = self.record(&published.id, &published.text, &decision.topic, reply_to) {
            return PipelineOutcome::failed(Stage::Record, e);
        }

        PipelineOutcome::Published {
            id: published.id,
            text: published.text,
            topic: decision.topic,
        }
    }

    fn record(
        &self,
        id: &str,
        text: &str,
        topic: &str,
        reply_to: Option<String>,
    ) -> Result<(), super::store::StoreError> {
        let now = Utc::now();
        self.rate_limiter.record_publish_at(now)?;

        self.store.append_history(TweetRecord {
            id: id.to_string(),
            text: text.to_string(),
            timestamp: now,
            topic: topic.to_string(),
            thread_id: reply_to,
            media_url: None,
        })?;

        // Synthetic ids cannot be replied to
        if self.as_thread && self.publisher.is_live() {
            let id = id.to_string();
            self.store
                .update_state(&mut |s| s.current_thread_id = Some(id.clone()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rate_limiter::RateLimits;
    use crate::core::store::MemoryStore;
    use crate::domain::{ActivityEvent, Decision, GeneratedPost, PublishedPost, VoiceActivity};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FixedDecider(Decision);

    #[async_trait]
    impl DecisionOracle for FixedDecider {
        async fn decide(&self, _: &ContextSnapshot, _: &[TweetRecord]) -> Result<Decision> {
            Ok(self.0.clone())
        }
    }

    struct FixedGenerator(&'static str);

    #[async_trait]
    impl GenerationOracle for FixedGenerator {
        async fn generate(&self, _: &ContextSnapshot, _: &str, _: &[TweetRecord]) -> Result<GeneratedPost> {
            Ok(GeneratedPost {
                text: self.0.to_string(),
                suggest_screenshot: false,
            })
        }
    }

    #[derive(Default)]
    struct RecordingPublisher {
        requests: Mutex<Vec<PublishRequest>>,
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        fn name(&self) -> &str {
            "recording"
        }

        async fn publish(&self, request: PublishRequest) -> Result<PublishedPost> {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            Ok(PublishedPost {
                id: format!("id-{}", requests.len()),
                text: request.text,
            })
        }
    }

    fn snapshot() -> ContextSnapshot {
        let event: ActivityEvent = VoiceActivity {
            timestamp: Utc::now(),
            transcript: "finally got the parser working".to_string(),
        }
        .into();
        ContextSnapshot::from_events(Utc::now(), [&event])
    }

    fn worthy() -> Decision {
        Decision {
            should_publish: true,
            reason: "milestone".to_string(),
            topic: "parser".to_string(),
        }
    }

    fn orchestrator(
        store: Arc<MemoryStore>,
        decision: Decision,
        text: &'static str,
        publisher: Arc<RecordingPublisher>,
    ) -> PublishOrchestrator {
        let limits = RateLimits {
            max_per_hour: 100,
            max_per_day: 100,
            min_interval: chrono::Duration::zero(),
        };
        PublishOrchestrator::new(
            RateLimiter::new(store.clone(), limits),
            Arc::new(FixedDecider(decision)),
            Arc::new(FixedGenerator(text)),
            publisher,
            store,
        )
    }

    #[tokio::test]
    async fn test_consecutive_posts_form_a_thread() {
        let store = Arc::new(MemoryStore::new());
        let publisher = Arc::new(RecordingPublisher::default());
        let orch = orchestrator(store.clone(), worthy(), "progress", publisher.clone());

        let first = orch.handle_snapshot(&snapshot()).await;
        let second = orch.handle_snapshot(&snapshot()).await;
        assert!(matches!(first, PipelineOutcome::Published { ref id, .. } if id == "id-1"));
        assert!(matches!(second, PipelineOutcome::Published { ref id, .. } if id == "id-2"));

        let requests = publisher.requests.lock().unwrap();
        assert_eq!(requests[0].reply_to, None);
        assert_eq!(requests[1].reply_to.as_deref(), Some("id-1"));

        let history = store.load_history().unwrap();
        assert_eq!(history[1].thread_id.as_deref(), Some("id-1"));
        assert_eq!(history[1].topic, "parser");
        assert_eq!(
            store.load_state().unwrap().current_thread_id.as_deref(),
            Some("id-2")
        );
    }

    #[tokio::test]
    async fn test_not_worthy_short_circuits() {
        let store = Arc::new(MemoryStore::new());
        let publisher = Arc::new(RecordingPublisher::default());
        let orch = orchestrator(store.clone(), Decision::skip("routine"), "x", publisher.clone());

        let outcome = orch.handle_snapshot(&snapshot()).await;
        assert_eq!(
            outcome,
            PipelineOutcome::NotWorthy {
                reason: "routine".to_string()
            }
        );
        assert!(publisher.requests.lock().unwrap().is_empty());
        assert_eq!(store.load_state().unwrap().published_today, 0);
    }

    #[tokio::test]
    async fn test_blank_generation_short_circuits() {
        let store = Arc::new(MemoryStore::new());
        let publisher = Arc::new(RecordingPublisher::default());
        let orch = orchestrator(store.clone(), worthy(), "   ", publisher.clone());

        assert_eq!(
            orch.handle_snapshot(&snapshot()).await,
            PipelineOutcome::EmptyGeneration
        );
        assert!(publisher.requests.lock().unwrap().is_empty());
        assert!(store.load_history().unwrap().is_empty());
    }
}
