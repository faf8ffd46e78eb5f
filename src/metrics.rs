use std::path::Path;

use anyhow::{Context, Result};
use metrics::{describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::store::write_atomic;

/// Process-wide Prometheus recorder. There is no HTTP endpoint: a run renders a snapshot
/// into a node-exporter textfile when a path is configured.
pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Installs the global recorder; fails if one is already installed.
    pub fn install() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        describe_gauge!(
            "run_last_completed_ts",
            "Unix timestamp of the last completed run."
        );
        Ok(Self { handle })
    }

    pub fn mark_run_completed(ts: i64) {
        gauge!("run_last_completed_ts").set(ts as f64);
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }

    pub fn write_textfile(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating metrics dir {}", dir.display()))?;
        }
        write_atomic(path, self.render().as_bytes())?;
        info!(path = %path.display(), "metrics snapshot written");
        Ok(())
    }
}
