//! livebuild - build-in-public agent
//!
//! Watches what a developer is doing (git commits, AI assistant sessions,
//! screen and voice capture), keeps a sliding window of that activity and
//! periodically asks a language model whether the recent work is worth a
//! short public post. Worthy snapshots are turned into posts, published as
//! a reply chain and recorded in a local history.
//!
//! # Architecture
//!
//! Collectors publish activity onto an in-process event bus. The context
//! accumulator keeps the last N minutes of events and emits snapshots on a
//! timer. Each snapshot runs through the publish pipeline:
//! rate limiter -> decision -> generation -> publisher -> record.
//!
//! # Modules
//!
//! - `adapters`: External services (Anthropic, X, dry run)
//! - `core`: Event bus, accumulator, rate limiter, orchestrator, store, agent
//! - `domain`: Activity events, snapshots, posts
//! - `ingest`: Git, assistant log and screen capture collectors
//! - `config`: Environment and file configuration
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run without publishing anything
//! livebuild run --dry-run
//!
//! # Check rate limiter counters
//! livebuild status
//!
//! # List recent posts
//! livebuild history --limit 5
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod ingest;

// Re-export main types at crate root for convenience
pub use config::AgentConfig;
pub use core::{Agent, AgentHandle, EventBus, PublishOrchestrator, RateLimiter};
pub use domain::{ActivityEvent, ContextSnapshot, TweetRecord};
