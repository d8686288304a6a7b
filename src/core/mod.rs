//! Core aggregation and publishing logic.
//!
//! This module contains:
//! - EventBus: In-process publish/subscribe for activity events
//! - ContextAccumulator: Sliding activity window and snapshot timer
//! - RateLimiter: Hourly, daily and spacing limits on publishing
//! - PublishOrchestrator: Snapshot -> decision -> generation -> publish
//! - Store: Persisted state and post history
//! - Agent: Runtime wiring and shutdown

pub mod accumulator;
pub mod agent;
pub mod event_bus;
pub mod orchestrator;
pub mod rate_limiter;
pub mod store;

// Re-export commonly used types
pub use accumulator::{ContextAccumulator, Schedule, SnapshotSink};
pub use agent::{Agent, AgentHandle, Services, PIPELINE_GRACE};
pub use event_bus::{Channel, EventBus, SubscriptionId};
pub use orchestrator::{PipelineOutcome, PublishOrchestrator, Stage, HISTORY_WINDOW};
pub use rate_limiter::{next_day_boundary, next_hour_boundary, RateDecision, RateLimiter, RateLimits, RateStatus};
pub use store::{AppState, InstanceLock, JsonFileStore, MemoryStore, StateStore, StoreError};
