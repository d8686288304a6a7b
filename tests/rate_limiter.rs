//! Rate Limiter Integration Tests
//!
//! Tests for hourly/daily caps, boundary roll-over and persistence.

use std::sync::Arc;

use chrono::{DateTime, Duration, Local, TimeZone, Utc};
use livebuild::core::{JsonFileStore, RateDecision, RateLimiter, RateLimits, StateStore};
use tempfile::TempDir;

fn local(h: u32, m: u32) -> DateTime<Utc> {
    Local
        .with_ymd_and_hms(2025, 6, 11, h, m, 0)
        .single()
        .unwrap()
        .with_timezone(&Utc)
}

fn limits() -> RateLimits {
    RateLimits {
        max_per_hour: 3,
        max_per_day: 30,
        min_interval: Duration::minutes(10),
    }
}

#[test]
fn test_hourly_cap_resets_at_boundary_and_keeps_daily_count() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(JsonFileStore::open(temp.path()).unwrap());
    let limiter = RateLimiter::new(store.clone(), limits());

    for minute in [5, 20, 35] {
        let now = local(10, minute);
        assert_eq!(limiter.check_at(now).unwrap(), RateDecision::Allowed);
        limiter.record_publish_at(now).unwrap();
    }

    // Fourth attempt inside the same hour is blocked until 11:00 local
    match limiter.check_at(local(10, 50)).unwrap() {
        RateDecision::HourlyLimit { resets_at } => assert_eq!(resets_at, local(11, 0)),
        other => panic!("expected hourly limit, got {:?}", other),
    }

    assert_eq!(limiter.check_at(local(11, 0)).unwrap(), RateDecision::Allowed);
    let status = limiter.status_at(local(11, 0)).unwrap();
    assert_eq!(status.published_this_hour, 0);
    assert_eq!(status.published_today, 3);
    assert_eq!(status.next_allowed_at, None);
}

#[test]
fn test_min_interval_blocks_second_post() {
    let store = Arc::new(livebuild::core::MemoryStore::new());
    let limiter = RateLimiter::new(store, limits());

    limiter.record_publish_at(local(9, 0)).unwrap();
    assert_eq!(
        limiter.check_at(local(9, 5)).unwrap(),
        RateDecision::MinInterval {
            next_allowed_at: local(9, 10)
        }
    );
    assert!(limiter.can_publish_at(local(9, 10)).unwrap());
}

#[test]
fn test_counters_survive_reopen() {
    let temp = TempDir::new().unwrap();

    {
        let store = Arc::new(JsonFileStore::open(temp.path()).unwrap());
        let limiter = RateLimiter::new(store, limits());
        limiter.record_publish_at(local(14, 0)).unwrap();
        limiter.record_publish_at(local(14, 15)).unwrap();
    }

    let store = Arc::new(JsonFileStore::open(temp.path()).unwrap());
    let state = store.load_state().unwrap();
    assert_eq!(state.published_this_hour, 2);
    assert_eq!(state.published_today, 2);
    assert_eq!(state.last_publish_at, Some(local(14, 15)));

    let limiter = RateLimiter::new(store, limits());
    let status = limiter.status_at(local(14, 20)).unwrap();
    assert_eq!(status.next_allowed_at, Some(local(14, 25)));
}

#[test]
fn test_daily_cap_resets_at_local_midnight() {
    let store = Arc::new(livebuild::core::MemoryStore::new());
    let limiter = RateLimiter::new(
        store,
        RateLimits {
            max_per_hour: 10,
            max_per_day: 2,
            min_interval: Duration::zero(),
        },
    );

    limiter.record_publish_at(local(22, 0)).unwrap();
    limiter.record_publish_at(local(22, 1)).unwrap();

    let decision = limiter.check_at(local(23, 30)).unwrap();
    assert!(matches!(decision, RateDecision::DailyLimit { .. }));

    let midnight = Local
        .with_ymd_and_hms(2025, 6, 12, 0, 0, 0)
        .single()
        .unwrap()
        .with_timezone(&Utc);
    assert_eq!(
        decision,
        RateDecision::DailyLimit { resets_at: midnight }
    );
    assert!(limiter.can_publish_at(midnight).unwrap());
}
