//! Sliding-window context accumulator.
//!
//! Holds every activity event of the last `window` minutes in arrival order,
//! drops expired events on a prune schedule and hands a [`ContextSnapshot`] of
//! the window to its sink on a snapshot schedule.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::domain::{ActivityEvent, ContextSnapshot};

use super::event_bus::{Channel, EventBus, SubscriptionId};

/// Receiver of emitted snapshots
pub type SnapshotSink = Box<dyn Fn(ContextSnapshot) + Send + Sync>;

/// Periods of the two accumulator timers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub prune_every: StdDuration,
    pub snapshot_every: StdDuration,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            prune_every: StdDuration::from_secs(60),
            snapshot_every: StdDuration::from_secs(300),
        }
    }
}

pub struct ContextAccumulator {
    window: Duration,
    events: Mutex<VecDeque<ActivityEvent>>,
    sink: SnapshotSink,
}

impl ContextAccumulator {
    pub fn new(window_minutes: u64, sink: SnapshotSink) -> Self {
        Self::with_window(Duration::minutes(window_minutes as i64), sink)
    }

    pub fn with_window(window: Duration, sink: SnapshotSink) -> Self {
        Self {
            window,
            events: Mutex::new(VecDeque::new()),
            sink,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Append an event to the tail of the window
    pub fn on_event(&self, event: ActivityEvent) {
        let mut events = self.lock();
        events.push_back(event);
        debug!(len = events.len(), "Event accumulated");
    }

    /// Drop events older than `now - window` from the head.
    ///
    /// Stops at the first event inside the window. Returns how many were dropped.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let mut events = self.lock();
        prune_locked(&mut events, now - self.window)
    }

    /// Prune, then hand a snapshot of the window to the sink.
    ///
    /// Returns `false` without calling the sink when the window is empty.
    pub fn emit_snapshot(&self, now: DateTime<Utc>) -> bool {
        let snapshot = {
            let mut events = self.lock();
            prune_locked(&mut events, now - self.window);
            if events.is_empty() {
                debug!("Window empty, no snapshot");
                return false;
            }
            ContextSnapshot::from_events(now, events.iter())
        };

        info!(
            events = snapshot.event_count(),
            summary = %snapshot.summary,
            "Emitting context snapshot"
        );
        (self.sink)(snapshot);
        true
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Subscribe to every event on the bus
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> SubscriptionId {
        let this = Arc::clone(self);
        bus.subscribe(Channel::All, move |event| {
            this.on_event(event.clone());
            Ok(())
        })
    }

    /// Run the prune and snapshot timers until `shutdown` turns true.
    ///
    /// Each timer first fires one full period after start.
    pub fn spawn(self: &Arc<Self>, schedule: Schedule, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let start = Instant::now();
            let mut prune_timer = interval_at(start + schedule.prune_every, schedule.prune_every);
            let mut snapshot_timer =
                interval_at(start + schedule.snapshot_every, schedule.snapshot_every);
            prune_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            snapshot_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                window_minutes = this.window.num_minutes(),
                prune_secs = schedule.prune_every.as_secs(),
                snapshot_secs = schedule.snapshot_every.as_secs(),
                "Context accumulator started"
            );

            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = prune_timer.tick() => {
                        let dropped = this.prune(Utc::now());
                        if dropped > 0 {
                            debug!(dropped, remaining = this.len(), "Pruned expired events");
                        }
                    }
                    _ = snapshot_timer.tick() => {
                        this.emit_snapshot(Utc::now());
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            warn!("Shutdown sender dropped, stopping accumulator");
                            break;
                        }
                    }
                }
            }

            info!("Context accumulator stopped");
        })
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<ActivityEvent>> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn prune_locked(events: &mut VecDeque<ActivityEvent>, cutoff: DateTime<Utc>) -> usize {
    let mut dropped = 0;
    while events.front().is_some_and(|e| e.timestamp() < cutoff) {
        events.pop_front();
        dropped += 1;
    }
    dropped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ScreenActivity, VoiceActivity};

    fn voice_at(ts: DateTime<Utc>) -> ActivityEvent {
        ActivityEvent::Voice(VoiceActivity {
            timestamp: ts,
            transcript: "talking through the design".to_string(),
        })
    }

    fn collecting() -> (SnapshotSink, Arc<Mutex<Vec<ContextSnapshot>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let sink: SnapshotSink = Box::new(move |snap| s.lock().unwrap().push(snap));
        (sink, seen)
    }

    #[test]
    fn test_prune_boundary_is_inclusive() {
        let (sink, _) = collecting();
        let acc = ContextAccumulator::new(15, sink);
        let now = Utc::now();

        acc.on_event(voice_at(now - Duration::minutes(16)));
        acc.on_event(voice_at(now - Duration::minutes(15)));
        acc.on_event(voice_at(now - Duration::minutes(1)));

        assert_eq!(acc.prune(now), 1);
        assert_eq!(acc.len(), 2);
    }

    #[test]
    fn test_prune_stops_at_first_event_in_window() {
        let (sink, _) = collecting();
        let acc = ContextAccumulator::new(15, sink);
        let now = Utc::now();

        // Late arrival with an old timestamp behind a fresh one stays put
        acc.on_event(voice_at(now - Duration::minutes(1)));
        acc.on_event(voice_at(now - Duration::minutes(30)));

        assert_eq!(acc.prune(now), 0);
        assert_eq!(acc.len(), 2);
    }

    #[test]
    fn test_empty_window_does_not_call_sink() {
        let (sink, seen) = collecting();
        let acc = ContextAccumulator::new(15, sink);
        let now = Utc::now();

        assert!(!acc.emit_snapshot(now));

        acc.on_event(voice_at(now - Duration::minutes(20)));
        assert!(!acc.emit_snapshot(now));
        assert!(seen.lock().unwrap().is_empty());
        assert!(acc.is_empty());
    }

    #[test]
    fn test_snapshot_partitions_by_kind() {
        let (sink, seen) = collecting();
        let acc = ContextAccumulator::new(15, sink);
        let now = Utc::now();

        acc.on_event(voice_at(now));
        acc.on_event(ActivityEvent::Screen(ScreenActivity {
            timestamp: now,
            ocr_text: "fn main()".to_string(),
            app_name: Some("Code".to_string()),
            window_title: None,
        }));
        acc.on_event(voice_at(now));

        assert!(acc.emit_snapshot(now));
        let snapshots = seen.lock().unwrap();
        assert_eq!(snapshots.len(), 1);
        let snap = &snapshots[0];
        assert_eq!(snap.voice_activity.len(), 2);
        assert_eq!(snap.screen_activity.len(), 1);
        assert!(snap.assistant_activity.is_empty());
        assert!(snap.repository_activity.is_empty());
        assert_eq!(snap.event_count(), 3);
        // Emission does not consume the window
        assert_eq!(acc.len(), 3);
    }

    #[test]
    fn test_attach_receives_bus_events() {
        let (sink, _) = collecting();
        let acc = Arc::new(ContextAccumulator::new(15, sink));
        let bus = EventBus::new();
        let id = acc.attach(&bus);

        bus.publish(&voice_at(Utc::now()));
        assert_eq!(acc.len(), 1);

        bus.unsubscribe(id);
        bus.publish(&voice_at(Utc::now()));
        assert_eq!(acc.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timers_emit_and_stop_on_shutdown() {
        let (sink, seen) = collecting();
        let acc = Arc::new(ContextAccumulator::new(15, sink));
        acc.on_event(voice_at(Utc::now()));

        let (tx, rx) = watch::channel(false);
        let schedule = Schedule {
            prune_every: StdDuration::from_secs(1),
            snapshot_every: StdDuration::from_secs(5),
        };
        let handle = acc.spawn(schedule, rx);

        tokio::time::sleep(StdDuration::from_secs(11)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(seen.lock().unwrap().len(), 2);
    }
}
