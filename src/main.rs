//! feedloom binary entrypoint.
//! Loads `.env` and config, syncs every source once, runs the analysis stages and exits.
//! Exit status is non-zero only for configuration or store errors.

use anyhow::Result;
use chrono::Utc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use feedloom::config::AppConfig;
use feedloom::metrics::Metrics;

const DEFAULT_FILTER: &str = "feedloom=info,warn";

/// `RUST_LOG` wins over the default filter; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

async fn run() -> Result<()> {
    let cfg = AppConfig::load_default()?;
    info!(
        sources = cfg.sources.len(),
        ai = cfg.ai.enabled,
        data_dir = %cfg.paths.data_dir.display(),
        "config loaded"
    );

    let metrics = match Metrics::install() {
        Ok(m) => Some(m),
        Err(e) => {
            warn!(error = %e, "metrics recorder unavailable");
            None
        }
    };

    let report = feedloom::run_once(&cfg, Utc::now()).await?;
    if report.sync.failed() > 0 {
        warn!(failed = report.sync.failed(), "some sources failed; they will back off");
    }

    if let (Some(m), Some(path)) = (metrics.as_ref(), cfg.paths.metrics_path.as_deref()) {
        m.write_textfile(path)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    // Load .env in local/dev; a missing file is fine.
    let _ = dotenvy::dotenv();
    init_tracing();

    if let Err(e) = run().await {
        error!(error = %format!("{e:#}"), "run failed");
        std::process::exit(1);
    }
}
