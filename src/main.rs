//! checkin: daily multi-platform check-in runner
//!
//! Entry point. Loads configuration, initialises structured logging,
//! builds one signer per configured platform, runs them once in order
//! and pushes the aggregated report. Meant to be started by cron.

use anyhow::Result;
use tracing::{info, warn};

use checkin::config::{self, AppConfig};
use checkin::engine::{Orchestrator, Pacing};
use checkin::notify::build_notifier;
use checkin::signers::build_slots;
use checkin::storage::StateStore;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path =
        std::env::var("CHECKIN_CONFIG").unwrap_or_else(|_| config::DEFAULT_CONFIG_FILE.to_string());
    let cfg = AppConfig::load(&config_path)?;

    init_logging(&cfg);
    info!(config = %config_path, state_file = %cfg.run.state_file, "checkin starting");

    // -- Initialise components -------------------------------------------

    let slots = build_slots(&cfg, &AppConfig::resolve_env)?;
    let configured = slots.iter().filter(|s| s.signer.is_some()).count();
    if configured == 0 {
        warn!("No platform has credentials, the report will only list unconfigured platforms");
    }

    let notifier = build_notifier(&cfg.notifier, cfg.run.http_timeout_secs, &AppConfig::resolve_env)?;
    let store = StateStore::new(&cfg.run.state_file);
    let pacing = Pacing::from(&cfg.run);

    // -- Run -------------------------------------------------------------

    let summary = Orchestrator::new(&store, notifier.as_ref(), pacing)
        .run(slots)
        .await?;

    info!(
        platforms = summary.results.len(),
        configured,
        failures = summary.failures(),
        notified = summary.notified,
        channel = notifier.name(),
        "Run complete"
    );

    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging(cfg: &AppConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.logging.filter));

    let json_logging = cfg.logging.json || std::env::var("CHECKIN_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
