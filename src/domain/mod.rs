//! Domain types for the livebuild agent.
//!
//! This module contains the core data structures:
//! - Activity: events produced by the collectors
//! - Snapshot: the summarized contents of the activity window
//! - Post: published records and oracle/publisher values

pub mod activity;
pub mod post;
pub mod snapshot;

// Re-export commonly used types
pub use activity::{
    ActivityEvent, ActivityKind, AssistantActivity, RepositoryActivity, ScreenActivity,
    VoiceActivity,
};
pub use post::{
    truncate_post, Decision, GeneratedPost, PublishRequest, PublishedPost, TweetRecord,
    MAX_POST_CHARS,
};
pub use snapshot::{build_summary, ContextSnapshot, EMPTY_SUMMARY};
