//! Publisher that only logs.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use crate::domain::{PublishRequest, PublishedPost};

use super::Publisher;

/// Id prefix of posts that never left the machine
pub const DRY_RUN_PREFIX: &str = "dry-run-";

#[derive(Debug, Default, Clone)]
pub struct DryRunPublisher;

impl DryRunPublisher {
    pub fn new() -> Self {
        Self
    }
}

pub fn is_dry_run_id(id: &str) -> bool {
    id.starts_with(DRY_RUN_PREFIX)
}

#[async_trait]
impl Publisher for DryRunPublisher {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn publish(&self, request: PublishRequest) -> Result<PublishedPost> {
        let id = format!("{}{}", DRY_RUN_PREFIX, Utc::now().timestamp_millis());
        info!(
            %id,
            text = %request.text,
            reply_to = ?request.reply_to,
            media = ?request.media_path,
            "Dry run, not publishing"
        );
        Ok(PublishedPost {
            id,
            text: request.text,
        })
    }

    fn is_live(&self) -> bool {
        false
    }
}
