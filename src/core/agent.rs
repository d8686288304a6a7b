//! Agent runtime.
//!
//! Wires the store, event bus, accumulator, orchestrator and collectors
//! together and owns their tasks until shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::adapters::{
    AnthropicOracle, DecisionOracle, DryRunPublisher, GenerationOracle, Publisher, TwitterPublisher,
};
use crate::config::{paths, AgentConfig};
use crate::domain::ContextSnapshot;
use crate::ingest::{wait_for_shutdown, AssistantLogCollector, GitCollector, ScreenpipeCollector};

use super::accumulator::{ContextAccumulator, Schedule};
use super::event_bus::EventBus;
use super::orchestrator::PublishOrchestrator;
use super::rate_limiter::{RateLimiter, RateLimits};
use super::store::{InstanceLock, JsonFileStore, StateStore};

/// How long shutdown waits for an in-flight pipeline run
pub const PIPELINE_GRACE: Duration = Duration::from_secs(30);

/// The external services the pipeline calls
pub struct Services {
    pub decider: Arc<dyn DecisionOracle>,
    pub generator: Arc<dyn GenerationOracle>,
    pub publisher: Arc<dyn Publisher>,
}

impl Services {
    /// Anthropic oracles plus the X publisher, or the dry-run publisher
    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        let oracle = Arc::new(AnthropicOracle::new(
            config.anthropic.clone(),
            config.context_window_minutes,
        )?);

        let publisher: Arc<dyn Publisher> = if config.publish.dry_run {
            Arc::new(DryRunPublisher::new())
        } else {
            let credentials = config
                .twitter
                .clone()
                .context("X credentials are required unless dry run is enabled")?;
            Arc::new(TwitterPublisher::new(credentials))
        };

        Ok(Self {
            decider: oracle.clone(),
            generator: oracle,
            publisher,
        })
    }
}

pub struct Agent;

impl Agent {
    /// Start the agent with services built from `config`
    pub async fn start(config: AgentConfig) -> Result<AgentHandle> {
        let services = Services::from_config(&config)?;
        Self::start_with(config, services).await
    }

    /// Start the agent with the given services
    pub async fn start_with(config: AgentConfig, services: Services) -> Result<AgentHandle> {
        let lock = InstanceLock::acquire(&paths::lock_file(&config.home))?;
        let store: Arc<dyn StateStore> = Arc::new(JsonFileStore::open(&config.home)?);
        let bus = Arc::new(EventBus::new());

        info!(
            dry_run = config.publish.dry_run,
            publisher = services.publisher.name(),
            repos = ?config.watched_repos,
            window_minutes = config.context_window_minutes,
            poll_secs = config.poll_interval.as_secs(),
            home = %config.home.display(),
            "Live building agent starting"
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut collectors: Vec<JoinHandle<()>> = Vec::new();

        // Snapshots flow from the accumulator's timer task to the pipeline task
        let (snapshot_tx, snapshot_rx) = mpsc::unbounded_channel::<ContextSnapshot>();
        let accumulator = Arc::new(ContextAccumulator::new(
            config.context_window_minutes,
            Box::new(move |snapshot| {
                if snapshot_tx.send(snapshot).is_err() {
                    warn!("Pipeline stopped, dropping snapshot");
                }
            }),
        ));
        accumulator.attach(&bus);
        collectors.push(accumulator.spawn(
            Schedule {
                prune_every: config.prune_interval,
                snapshot_every: config.snapshot_interval,
            },
            shutdown_rx.clone(),
        ));

        let orchestrator = PublishOrchestrator::new(
            RateLimiter::new(store.clone(), RateLimits::from(&config.publish)),
            services.decider,
            services.generator,
            services.publisher,
            store.clone(),
        );
        let pipeline = tokio::spawn(run_pipeline(
            Arc::new(orchestrator),
            snapshot_rx,
            shutdown_rx.clone(),
        ));

        collectors.extend(
            GitCollector::new(config.watched_repos.clone(), bus.clone(), store.clone())
                .spawn(shutdown_rx.clone()),
        );
        collectors.push(
            AssistantLogCollector::new(&config.claude_history_path, bus.clone(), store.clone())
                .spawn(shutdown_rx.clone()),
        );
        collectors.push(
            ScreenpipeCollector::new(&config.screenpipe_api_url, bus.clone(), store.clone())?
                .spawn(config.poll_interval, shutdown_rx),
        );

        info!("Live building agent running");

        Ok(AgentHandle {
            shutdown_tx,
            collectors,
            pipeline,
            bus,
            store,
            _lock: lock,
        })
    }
}

/// Handle snapshots one at a time until shutdown.
///
/// A run already in progress when shutdown arrives is finished first. Each
/// run is its own task, so a panicking oracle or publisher loses only that
/// snapshot.
pub(crate) async fn run_pipeline(
    orchestrator: Arc<PublishOrchestrator>,
    mut snapshots: mpsc::UnboundedReceiver<ContextSnapshot>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let snapshot = tokio::select! {
            next = snapshots.recv() => match next {
                Some(snapshot) => snapshot,
                None => break,
            },
            _ = wait_for_shutdown(&mut shutdown) => break,
        };

        let orchestrator = Arc::clone(&orchestrator);
        let run = tokio::spawn(async move { orchestrator.handle_snapshot(&snapshot).await });
        if let Err(e) = run.await {
            error!(error = %e, "Pipeline run panicked, snapshot dropped");
        }
    }
    info!("Publish pipeline stopped");
}

/// Running agent
pub struct AgentHandle {
    shutdown_tx: watch::Sender<bool>,
    collectors: Vec<JoinHandle<()>>,
    pipeline: JoinHandle<()>,
    bus: Arc<EventBus>,
    store: Arc<dyn StateStore>,
    _lock: InstanceLock,
}

impl AgentHandle {
    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    pub fn store(&self) -> Arc<dyn StateStore> {
        Arc::clone(&self.store)
    }

    /// Stop every task and release the instance lock
    pub async fn shutdown(self) {
        self.shutdown_with_grace(PIPELINE_GRACE).await
    }

    pub async fn shutdown_with_grace(self, grace: Duration) {
        info!("Shutting down");
        let _ = self.shutdown_tx.send(true);

        for task in self.collectors {
            if let Err(e) = task.await {
                error!(error = %e, "Task ended abnormally");
            }
        }

        let mut pipeline = self.pipeline;
        match tokio::time::timeout(grace, &mut pipeline).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Pipeline task ended abnormally"),
            Err(_) => {
                warn!(grace_secs = grace.as_secs(), "Pipeline run did not finish in time, aborting");
                pipeline.abort();
            }
        }

        info!("Shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::MemoryStore;
    use crate::domain::{ActivityEvent, Decision, GeneratedPost, TweetRecord, VoiceActivity};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Panics on its first call, then publishes
    #[derive(Default)]
    struct FlakyDecider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DecisionOracle for FlakyDecider {
        async fn decide(&self, _: &ContextSnapshot, _: &[TweetRecord]) -> Result<Decision> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("decision oracle blew up");
            }
            Ok(Decision {
                should_publish: true,
                reason: "recovered".to_string(),
                topic: "recovery".to_string(),
            })
        }
    }

    struct FixedGenerator;

    #[async_trait]
    impl GenerationOracle for FixedGenerator {
        async fn generate(&self, _: &ContextSnapshot, _: &str, _: &[TweetRecord]) -> Result<GeneratedPost> {
            Ok(GeneratedPost {
                text: "back on track".to_string(),
                suggest_screenshot: false,
            })
        }
    }

    fn snapshot() -> ContextSnapshot {
        let event: ActivityEvent = VoiceActivity {
            timestamp: Utc::now(),
            transcript: "trying again".to_string(),
        }
        .into();
        ContextSnapshot::from_events(Utc::now(), [&event])
    }

    #[tokio::test]
    async fn test_panicking_run_does_not_stop_pipeline() {
        let store = Arc::new(MemoryStore::new());
        let limits = RateLimits {
            max_per_hour: 10,
            max_per_day: 10,
            min_interval: chrono::Duration::zero(),
        };
        let orchestrator = PublishOrchestrator::new(
            RateLimiter::new(store.clone(), limits),
            Arc::new(FlakyDecider::default()),
            Arc::new(FixedGenerator),
            Arc::new(DryRunPublisher::new()),
            store.clone(),
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tx.send(snapshot()).unwrap();
        tx.send(snapshot()).unwrap();
        drop(tx);

        run_pipeline(Arc::new(orchestrator), rx, shutdown_rx).await;

        let history = store.load_history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].text, "back on track");
    }
}
