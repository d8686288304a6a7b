//! Command-line interface for livebuild.
//!
//! Provides commands for running the agent, checking rate limiter status,
//! listing published posts and showing the resolved configuration.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::{self, redact, AgentConfig};
use crate::core::{Agent, JsonFileStore, RateLimiter, RateLimits, StateStore};

/// livebuild - turn ambient developer activity into build-in-public posts
#[derive(Parser, Debug)]
#[command(name = "livebuild")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the agent until interrupted
    Run {
        /// Log posts instead of publishing them
        #[arg(long)]
        dry_run: bool,
    },

    /// Show rate limiter counters and collector cursors
    Status,

    /// List recently published posts
    History {
        /// Maximum number of posts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run { dry_run } => run_agent(dry_run).await,
            Commands::Status => show_status().await,
            Commands::History { limit } => show_history(limit).await,
            Commands::Config => show_config().await,
        }
    }
}

/// Run the agent until Ctrl-C or SIGTERM
async fn run_agent(dry_run: bool) -> Result<()> {
    let config = AgentConfig::load_with_dry_run(dry_run)?;
    let handle = Agent::start(config).await?;

    wait_for_signal().await?;
    info!("Signal received");

    handle.shutdown().await;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}

/// Show rate limiter counters and collector cursors
async fn show_status() -> Result<()> {
    let home = config::livebuild_home()?;
    let limits = match AgentConfig::load_with_dry_run(true) {
        Ok(cfg) => RateLimits::from(&cfg.publish),
        Err(_) => RateLimits::default(),
    };

    let store = std::sync::Arc::new(JsonFileStore::open(&home)?);
    let limiter = RateLimiter::new(store.clone(), limits.clone());
    let status = limiter.status()?;
    let state = store.load_state()?;

    println!("Data directory: {}", home.display());
    println!();
    println!("Rate limits:");
    println!(
        "  This hour:     {}/{}",
        status.published_this_hour, limits.max_per_hour
    );
    println!("  Today:         {}/{}", status.published_today, limits.max_per_day);
    println!("  Min interval:  {}m", limits.min_interval.num_minutes());
    println!(
        "  Last publish:  {}",
        status
            .last_publish_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    );
    println!(
        "  Next allowed:  {}",
        status
            .next_allowed_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "now".to_string())
    );
    println!();
    println!("Thread: {}", state.current_thread_id.as_deref().unwrap_or("(none)"));
    println!(
        "Last capture poll: {}",
        state
            .last_screen_poll_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    );
    println!("Tracked session logs: {}", state.assistant_log_offsets.len());
    if !state.last_seen_commits.is_empty() {
        println!("Last seen commits:");
        for (repo, hash) in &state.last_seen_commits {
            println!("  {}: {}", repo, &hash[..hash.len().min(7)]);
        }
    }

    Ok(())
}

/// List the most recent posts, oldest first
async fn show_history(limit: usize) -> Result<()> {
    let home = config::livebuild_home()?;
    let store = JsonFileStore::open(&home)?;
    let records = store.recent_history(limit)?;

    if records.is_empty() {
        println!("No posts yet.");
        return Ok(());
    }

    println!("{:<24} {:<22} {:<20} TEXT", "ID", "PUBLISHED", "TOPIC");
    println!("{}", "-".repeat(100));

    for record in records {
        let text: String = record.text.chars().take(60).collect();
        println!(
            "{:<24} {:<22} {:<20} {}",
            record.id,
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.topic.chars().take(20).collect::<String>(),
            text.replace('\n', " ")
        );
    }

    Ok(())
}

/// Show resolved configuration
async fn show_config() -> Result<()> {
    let cfg = AgentConfig::load()?;

    println!("livebuild configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home (state):        {}", cfg.home.display());
    println!("  State file:          {}", config::paths::state_file(&cfg.home).display());
    println!("  History file:        {}", config::paths::history_file(&cfg.home).display());
    println!("  Assistant history:   {}", cfg.claude_history_path.display());
    println!();
    println!("Sources:");
    if cfg.watched_repos.is_empty() {
        println!("  Repos:               (none)");
    } else {
        for repo in &cfg.watched_repos {
            println!("  Repo:                {}", repo.display());
        }
    }
    println!("  Capture API:         {}", cfg.screenpipe_api_url);
    println!("  Poll interval:       {}s", cfg.poll_interval.as_secs());
    println!();
    println!("Context:");
    println!("  Window:              {}m", cfg.context_window_minutes);
    println!("  Snapshot every:      {}s", cfg.snapshot_interval.as_secs());
    println!("  Prune every:         {}s", cfg.prune_interval.as_secs());
    println!();
    println!("Publishing:");
    println!("  Dry run:             {}", cfg.publish.dry_run);
    println!("  Max per hour:        {}", cfg.publish.max_per_hour);
    println!("  Max per day:         {}", cfg.publish.max_per_day);
    println!("  Min interval:        {}m", cfg.publish.min_interval_minutes);
    println!("  Decision model:      {}", cfg.anthropic.decision_model);
    println!("  Generation model:    {}", cfg.anthropic.generation_model);
    println!("  Anthropic key:       {}", redact(&cfg.anthropic.api_key));
    match cfg.twitter {
        Some(ref creds) => println!("  X API key:           {}", redact(&creds.api_key)),
        None => println!("  X API key:           (not required in dry run)"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_dry_run() {
        let cli = Cli::try_parse_from(["livebuild", "run", "--dry-run"]).unwrap();
        assert!(matches!(cli.command, Commands::Run { dry_run: true }));
    }

    #[test]
    fn test_parse_history_limit() {
        let cli = Cli::try_parse_from(["livebuild", "history", "-l", "3"]).unwrap();
        assert!(matches!(cli.command, Commands::History { limit: 3 }));

        let cli = Cli::try_parse_from(["livebuild", "history"]).unwrap();
        assert!(matches!(cli.command, Commands::History { limit: 10 }));
    }
}
