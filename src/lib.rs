// src/lib.rs
//! feedloom: incremental multi-source sync into a local item store, followed by
//! AI summarization and classification routed across budgeted providers.

pub mod ai;
pub mod ai_bootstrap;
pub mod analyze;
pub mod config;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod store;

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::ai::ProviderUsage;
use crate::ai_bootstrap::AiRuntime;
use crate::analyze::{classify_pending, summarize_pending, StageOptions, StageReport};
use crate::config::AppConfig;
use crate::ingest::providers::Fetchers;
use crate::ingest::{Scheduler, SyncReport};
use crate::store::{FileItemStore, FileStateStore, ItemStore};

pub use crate::error::{ProviderError, RouterError};

/// Everything one run did, for logging and tests.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub sync: SyncReport,
    pub summarize: Option<StageReport>,
    pub classify: Option<StageReport>,
    pub budget: BTreeMap<String, ProviderUsage>,
}

/// One full run against the configured HTTP sources.
pub async fn run_once(cfg: &AppConfig, now: DateTime<Utc>) -> Result<RunReport> {
    let fetchers = Fetchers::from_config(cfg)?;
    run_with_fetchers(cfg, &fetchers, now).await
}

/// Sync every source, then run the analysis stages if AI is enabled. Store and
/// configuration errors abort; per-source and per-item failures do not.
pub async fn run_with_fetchers(
    cfg: &AppConfig,
    fetchers: &Fetchers,
    now: DateTime<Utc>,
) -> Result<RunReport> {
    let mut states = FileStateStore::open(cfg.paths.state_path())?;
    let mut items = FileItemStore::open(cfg.paths.items_path())?;
    let ai = AiRuntime::from_config(&cfg.ai, &cfg.http)?;

    let sync = Scheduler::new(fetchers, &mut states, &mut items)
        .with_max_pages(cfg.ingest.max_pages)
        .run(&cfg.sources, now)
        .await?;

    let mut report = RunReport {
        sync,
        ..Default::default()
    };
    if let Some(rt) = ai {
        let opts = StageOptions::from(&rt.cfg);
        let summarized = summarize_pending(&mut items, &rt.router, &opts).await?;
        report.summarize = Some(summarized);
        if !summarized.budget_stopped {
            report.classify =
                Some(classify_pending(&mut items, &rt.router, &rt.cfg.labels, &opts).await?);
        }
        rt.router.budget().log_status();
        report.budget = rt.router.budget().snapshot();
    }

    crate::metrics::Metrics::mark_run_completed(now.timestamp());
    info!(
        sources = report.sync.sources.len(),
        appended = report.sync.appended(),
        failed_sources = report.sync.failed(),
        items = items.len(),
        "run complete"
    );
    Ok(report)
}
