use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde_json::json;
use tracing::{info, warn, Level};
use tracing_subscriber;

use tollgate::abuse::{AbuseDetector, AbusePattern, ActionKind, Severity};
use tollgate::config::{DetectorConfig, NamedLimiterConfig, TollgateConfig};
use tollgate::ratelimit::{Algorithm, RateLimiterManager};

/// Tollgate traffic drill: exercise the configured limiters and abuse
/// patterns with a burst of simulated requests.
#[derive(Parser, Debug)]
#[command(name = "tollgate", version, about)]
struct Args {
    /// Path to a YAML configuration file. Defaults to a built-in demo
    /// configuration when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Identifier the simulated traffic is attributed to.
    #[arg(short, long, default_value = "demo-user")]
    identifier: String,

    /// Number of simulated requests to fire.
    #[arg(short, long, default_value_t = 12)]
    requests: u32,
}

fn demo_config() -> TollgateConfig {
    TollgateConfig {
        limiters: vec![NamedLimiterConfig {
            name: "requests".to_string(),
            window_ms: 60_000,
            max_requests: 8,
            algorithm: Algorithm::FixedWindow,
        }],
        detector: DetectorConfig {
            patterns: vec![AbusePattern {
                name: "request_burst".to_string(),
                threshold: 10,
                window_ms: 60_000,
                severity: Severity::High,
                action: ActionKind::Block,
            }],
            global_cooldown_ms: 0,
            ..DetectorConfig::default()
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let args = Args::parse();

    info!("Starting Tollgate traffic drill");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = match &args.config {
        Some(path) => TollgateConfig::from_file(path)?,
        None => demo_config(),
    };
    config.validate()?;
    info!(
        limiters = config.limiters.len(),
        patterns = config.detector.patterns.len(),
        "Configuration loaded"
    );

    let manager = RateLimiterManager::from_config(&config.limiters)?;
    let detector = Arc::new(AbuseDetector::new(
        config.detector.clone(),
        Box::new(|event| {
            warn!(
                identifier = %event.identifier,
                event_type = %event.event_type,
                action = %event.action,
                "Abuse detected"
            );
        }),
    )?);
    detector.spawn_maintenance();

    for seq in 0..args.requests {
        let results = manager.check_all(&args.identifier);
        let allowed = results.iter().all(|result| result.allowed);
        info!(
            seq,
            allowed,
            denials = results.iter().filter(|result| !result.allowed).count(),
            "Simulated request"
        );
        detector.record_event("request_burst", &args.identifier, json!({ "seq": seq }));
    }

    for (name, status) in manager.status_all(&args.identifier) {
        match status {
            Some(result) => info!(
                limiter = %name,
                allowed = result.allowed,
                remaining = result.remaining,
                retry_after_ms = ?result.retry_after_ms,
                "Limiter status"
            ),
            None => info!(limiter = %name, "Limiter status: never checked"),
        }
    }

    let stats = detector.stats();
    info!(
        total_events = stats.total_events,
        blocked = stats.blocked_count,
        banned = stats.banned_count,
        blocked_now = detector.is_blocked(&args.identifier),
        "Abuse detector stats"
    );

    detector.destroy();
    manager.destroy();
    info!("Tollgate traffic drill finished");
    Ok(())
}
