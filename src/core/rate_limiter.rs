//! Publish rate limiting.
//!
//! Three independent limits gate every publish:
//! - Posts per local clock hour
//! - Posts per local calendar day
//! - Minimum spacing between two posts
//!
//! Counters live in the persisted [`AppState`] and every operation is one
//! atomic read-modify-write through the [`StateStore`], so limits survive
//! restarts.

use std::sync::Arc;

use chrono::{DateTime, Duration, Local, LocalResult, TimeZone, Timelike, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::PublishSettings;

use super::store::{AppState, StateStore, StoreError};

/// Configured publish limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimits {
    pub max_per_hour: u32,
    pub max_per_day: u32,
    pub min_interval: Duration,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self::from(&PublishSettings::default())
    }
}

impl From<&PublishSettings> for RateLimits {
    fn from(settings: &PublishSettings) -> Self {
        Self {
            max_per_hour: settings.max_per_hour,
            max_per_day: settings.max_per_day,
            min_interval: Duration::minutes(settings.min_interval_minutes as i64),
        }
    }
}

/// Outcome of a rate check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    HourlyLimit { resets_at: DateTime<Utc> },
    DailyLimit { resets_at: DateTime<Utc> },
    MinInterval { next_allowed_at: DateTime<Utc> },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Counters as reported by `livebuild status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateStatus {
    pub published_this_hour: u32,
    pub published_today: u32,
    pub last_publish_at: Option<DateTime<Utc>>,
    /// `None` when a publish is allowed right now
    pub next_allowed_at: Option<DateTime<Utc>>,
}

/// Stateful publish gate backed by a [`StateStore`]
pub struct RateLimiter {
    store: Arc<dyn StateStore>,
    limits: RateLimits,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn StateStore>, limits: RateLimits) -> Self {
        Self { store, limits }
    }

    pub fn limits(&self) -> &RateLimits {
        &self.limits
    }

    /// Whether a publish is allowed now
    pub fn can_publish(&self) -> Result<bool, StoreError> {
        self.can_publish_at(Utc::now())
    }

    pub fn can_publish_at(&self, now: DateTime<Utc>) -> Result<bool, StoreError> {
        Ok(self.check_at(now)?.is_allowed())
    }

    /// Roll counters over if a boundary passed, persist, and evaluate limits
    pub fn check_at(&self, now: DateTime<Utc>) -> Result<RateDecision, StoreError> {
        let state = self.store.update_state(&mut |s| roll_over(s, now))?;

        let decision = if state.published_this_hour >= self.limits.max_per_hour {
            RateDecision::HourlyLimit {
                resets_at: state.hour_reset_at,
            }
        } else if state.published_today >= self.limits.max_per_day {
            RateDecision::DailyLimit {
                resets_at: state.day_reset_at,
            }
        } else {
            match state.last_publish_at {
                Some(last) if now < last + self.limits.min_interval => RateDecision::MinInterval {
                    next_allowed_at: last + self.limits.min_interval,
                },
                _ => RateDecision::Allowed,
            }
        };

        debug!(
            ?decision,
            hour = state.published_this_hour,
            day = state.published_today,
            "Rate check"
        );
        Ok(decision)
    }

    /// Count one publish at the current time
    pub fn record_publish(&self) -> Result<(), StoreError> {
        self.record_publish_at(Utc::now())
    }

    pub fn record_publish_at(&self, now: DateTime<Utc>) -> Result<(), StoreError> {
        let state = self.store.update_state(&mut |s| {
            roll_over(s, now);
            s.published_this_hour += 1;
            s.published_today += 1;
            s.last_publish_at = Some(now);
        })?;

        info!(
            hour = state.published_this_hour,
            max_hour = self.limits.max_per_hour,
            day = state.published_today,
            max_day = self.limits.max_per_day,
            "Publish recorded"
        );
        Ok(())
    }

    /// Current counters and the earliest instant a publish would be allowed
    pub fn status(&self) -> Result<RateStatus, StoreError> {
        self.status_at(Utc::now())
    }

    /// Read-only: boundaries are rolled over on a copy and never persisted,
    /// so a `status` query cannot race the running agent's writes.
    pub fn status_at(&self, now: DateTime<Utc>) -> Result<RateStatus, StoreError> {
        let mut state = self.store.load_state()?;
        roll_over(&mut state, now);

        let mut blockers = Vec::new();
        if state.published_this_hour >= self.limits.max_per_hour {
            blockers.push(state.hour_reset_at);
        }
        if state.published_today >= self.limits.max_per_day {
            blockers.push(state.day_reset_at);
        }
        if let Some(last) = state.last_publish_at {
            let earliest = last + self.limits.min_interval;
            if now < earliest {
                blockers.push(earliest);
            }
        }

        Ok(RateStatus {
            published_this_hour: state.published_this_hour,
            published_today: state.published_today,
            last_publish_at: state.last_publish_at,
            next_allowed_at: blockers.into_iter().max(),
        })
    }
}

/// Reset counters whose boundary is at or before `now`
fn roll_over(state: &mut AppState, now: DateTime<Utc>) {
    if now >= state.hour_reset_at {
        state.published_this_hour = 0;
        state.hour_reset_at = next_hour_boundary(now, &Local);
    }
    if now >= state.day_reset_at {
        state.published_today = 0;
        state.day_reset_at = next_day_boundary(now, &Local);
    }
}

/// Top of the next hour in `tz`, strictly after `now`
pub fn next_hour_boundary<Tz: TimeZone>(now: DateTime<Utc>, tz: &Tz) -> DateTime<Utc> {
    let local = now.with_timezone(tz);
    let into_hour = Duration::minutes(local.minute() as i64)
        + Duration::seconds(local.second() as i64)
        + Duration::nanoseconds(local.nanosecond() as i64);
    now + (Duration::hours(1) - into_hour)
}

/// Midnight at the start of the next calendar day in `tz`.
///
/// A repeated midnight resolves to its first occurrence. A skipped midnight
/// resolves to 01:00; if that is missing too, 24 hours from `now`.
pub fn next_day_boundary<Tz: TimeZone>(now: DateTime<Utc>, tz: &Tz) -> DateTime<Utc> {
    let fallback = now + Duration::hours(24);

    let Some(tomorrow) = now.with_timezone(tz).date_naive().succ_opt() else {
        return fallback;
    };
    let Some(midnight) = tomorrow.and_hms_opt(0, 0, 0) else {
        return fallback;
    };

    let resolved = match tz.from_local_datetime(&midnight) {
        LocalResult::None => tz.from_local_datetime(&(midnight + Duration::hours(1))),
        other => other,
    };

    match resolved.earliest() {
        Some(dt) => dt.with_timezone(&Utc),
        None => fallback,
    }
}
