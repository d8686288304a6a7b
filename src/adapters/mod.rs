//! Adapter interfaces for external systems.
//!
//! The publish pipeline talks to three outside services through these
//! traits: a decision oracle, a generation oracle and a publisher. Concrete
//! implementations live in the submodules.

pub mod anthropic;
pub mod dry_run;
pub mod oauth1;
pub mod twitter;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{ContextSnapshot, Decision, GeneratedPost, PublishRequest, PublishedPost, TweetRecord};

pub use anthropic::AnthropicOracle;
pub use dry_run::DryRunPublisher;
pub use twitter::TwitterPublisher;

/// Judges whether a snapshot is worth a post
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn decide(&self, snapshot: &ContextSnapshot, recent: &[TweetRecord]) -> Result<Decision>;
}

/// Writes the post text for a topic
#[async_trait]
pub trait GenerationOracle: Send + Sync {
    async fn generate(
        &self,
        snapshot: &ContextSnapshot,
        topic: &str,
        recent: &[TweetRecord],
    ) -> Result<GeneratedPost>;
}

/// Posts text somewhere and reports the id it got
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Human-readable publisher name
    fn name(&self) -> &str;

    async fn publish(&self, request: PublishRequest) -> Result<PublishedPost>;

    /// Whether ids from this publisher are real posts that can be replied to
    fn is_live(&self) -> bool {
        true
    }
}
