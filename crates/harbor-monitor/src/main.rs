//! harbor-monitor - container health monitoring daemon
//!
//! Polls container metrics on a timer, evaluates alert rules and delivers
//! notifications to email, chat and webhook channels.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use harbor_alerts::DeliveryOutcome;
use harbor_monitor::{
    build_engine, log_channel_health, referenced_channels, sample_rules, sources, MonitorConfig,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "harbor-monitor")]
#[command(about = "Container health monitoring and alerting daemon")]
#[command(version)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true, env = "HARBOR_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitoring daemon
    Run {
        /// Path to config file
        #[arg(short, long, default_value = "/etc/harbor/config.json")]
        config: PathBuf,
    },

    /// Validate the config and rule files
    CheckConfig {
        /// Path to config file
        #[arg(short, long, default_value = "/etc/harbor/config.json")]
        config: PathBuf,
    },

    /// Send a test notification to every channel of a rule
    TestChannel {
        /// Path to config file
        #[arg(short, long, default_value = "/etc/harbor/config.json")]
        config: PathBuf,

        /// Rule id
        #[arg(long)]
        rule: String,
    },

    /// Generate a sample config and rules file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "/etc/harbor/config.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }

    match cli.command {
        Commands::Run { config } => {
            run_daemon(&config).await?;
        }

        Commands::CheckConfig { config } => {
            check_config(&config)?;
        }

        Commands::TestChannel { config, rule } => {
            test_channel(&config, &rule).await?;
        }

        Commands::InitConfig { output } => {
            init_config(&output)?;
        }
    }

    Ok(())
}

async fn run_daemon(config_path: &Path) -> anyhow::Result<()> {
    info!(config = %config_path.display(), "starting harbor-monitor");

    let config = MonitorConfig::from_file(config_path)?;
    info!(
        poll_interval_secs = config.engine.poll_interval_secs,
        digest = config.engine.digest.enabled,
        "loaded config"
    );

    let engine = Arc::new(build_engine(&config)?);
    let shutdown = CancellationToken::new();

    let health_task = {
        let engine = Arc::clone(&engine);
        let shutdown = shutdown.clone();
        let period = Duration::from_secs(config.health_log_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => log_channel_health(&engine),
                }
            }
        })
    };

    let engine_task = tokio::spawn(Arc::clone(&engine).run(shutdown.clone()));

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutdown requested, draining dispatch queue");
    shutdown.cancel();

    let outcome = engine_task.await;
    if let Err(e) = health_task.await {
        error!(error = %e, "health logger failed");
    }
    log_channel_health(&engine);

    outcome??;
    info!("harbor-monitor stopped");
    Ok(())
}

fn check_config(config_path: &Path) -> anyhow::Result<()> {
    let config = MonitorConfig::from_file(config_path)?;
    let rules = sources::load_rules(&config.rules_path, config.engine.default_cooldown_minutes)?;
    let enabled = rules.iter().filter(|r| r.enabled).count();

    println!("Config OK: {}", config_path.display());
    println!();
    println!("  Rules: {} ({} enabled)", rules.len(), enabled);
    println!("  Channels: {:?}", referenced_channels(&rules));
    println!("  Poll interval: {}s", config.engine.poll_interval_secs);
    println!(
        "  Digest: {}",
        if config.engine.digest.enabled {
            format!(
                "every {} minutes below {}",
                config.engine.digest.interval_minutes, config.engine.digest.below_priority
            )
        } else {
            "disabled".to_string()
        }
    );

    Ok(())
}

async fn test_channel(config_path: &Path, rule_id: &str) -> anyhow::Result<()> {
    let config = MonitorConfig::from_file(config_path)?;
    let engine = build_engine(&config)?;

    let outcomes = engine.admin().test_rule_channels(rule_id).await?;
    if outcomes.is_empty() {
        println!("Rule '{rule_id}' has no enabled channels");
        return Ok(());
    }

    let mut failed = 0;
    for (channel, outcome) in &outcomes {
        match outcome {
            DeliveryOutcome::Sent { attempts } => {
                println!("  {channel}: sent ({attempts} attempt(s))");
            }
            DeliveryOutcome::Failed { attempts, error } => {
                failed += 1;
                println!("  {channel}: failed after {attempts} attempt(s): {error}");
            }
            DeliveryOutcome::Suppressed { reason } => {
                println!("  {channel}: suppressed ({reason})");
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} channel(s) failed", outcomes.len());
    }
    Ok(())
}

fn init_config(output: &Path) -> anyhow::Result<()> {
    let rules_path = output.with_file_name("rules.json");
    let config = MonitorConfig {
        rules_path: rules_path.clone(),
        ..MonitorConfig::default()
    };

    config.save(output)?;
    std::fs::write(&rules_path, serde_json::to_string_pretty(&sample_rules()?)?)?;

    println!("Config written to {}", output.display());
    println!("Rules written to {}", rules_path.display());
    println!();
    println!("Edit the rule channels, then run:");
    println!("  harbor-monitor run --config {}", output.display());

    Ok(())
}
