use anyhow::Result;
use metrics::counter;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::ai::{GenerationRequest, ProviderRouter};
use crate::analyze::{ensure_metrics_described, StageOptions, StageReport};
use crate::error::RouterError;
use crate::store::{Item, ItemStore};

/// Recorded when the answer names no known label, so the item is not asked again.
pub const UNCLASSIFIED: &str = "unclassified";

fn preamble(labels: &[String]) -> String {
    format!(
        "You tag items for a reading digest. Allowed labels: {}. \
Answer with the matching labels only, comma-separated, nothing else.",
        labels.join(", ")
    )
}

fn prompt(item: &Item) -> String {
    let summary = item.summary.as_deref().unwrap_or_default();
    format!("Title: {}\nSummary: {summary}\n", item.title)
}

/// Keep only known labels from a comma/newline separated answer: matched
/// case-insensitively, returned in canonical spelling, first occurrence wins.
pub fn parse_labels(answer: &str, labels: &[String]) -> Vec<String> {
    let canon: HashMap<String, &String> = labels.iter().map(|l| (l.to_lowercase(), l)).collect();
    let mut out: Vec<String> = Vec::new();
    for raw in answer.split([',', '\n', ';']) {
        let t = raw
            .trim()
            .trim_start_matches(['-', '*'])
            .trim()
            .trim_matches(['"', '\'', '.', '`'])
            .to_lowercase();
        if let Some(label) = canon.get(&t) {
            if !out.iter().any(|l| l == *label) {
                out.push((*label).clone());
            }
        }
    }
    out
}

/// Classify summarized items that have no classifications yet, in store order.
/// An empty label set leaves the stage a no-op.
pub async fn classify_pending(
    items: &mut dyn ItemStore,
    router: &ProviderRouter,
    labels: &[String],
    opts: &StageOptions,
) -> Result<StageReport> {
    ensure_metrics_described();
    let mut report = StageReport::default();
    if labels.is_empty() {
        debug!("no labels configured; classification skipped");
        return Ok(report);
    }
    let pending: Vec<String> = items
        .items()
        .iter()
        .filter(|i| i.summary.is_some() && i.classifications.is_none())
        .take(opts.max_items_per_run)
        .map(|i| i.id.clone())
        .collect();
    let system = preamble(labels);

    for id in pending {
        let Some(item) = items.get(&id).cloned() else {
            continue;
        };
        let req = GenerationRequest::new(prompt(&item))
            .preamble(system.as_str())
            .temperature(opts.temperature)
            .max_tokens(opts.max_tokens);

        report.attempted += 1;
        match router.invoke(&req).await {
            Ok(res) => {
                let mut found = parse_labels(&res.text, labels);
                let outcome = if found.is_empty() {
                    found.push(UNCLASSIFIED.to_string());
                    "unclassified"
                } else {
                    "ok"
                };
                let mut updated = item;
                updated.classifications = Some(found);
                items.put(updated)?;
                report.succeeded += 1;
                counter!("analyze_items_total", "stage" => "classify", "outcome" => outcome)
                    .increment(1);
                debug!(item = %id, provider = %res.provider_id, outcome, "classified");
            }
            Err(RouterError::NoCandidates) => {
                warn!("no provider candidates; classification skipped");
                report.attempted -= 1;
                break;
            }
            Err(e) => {
                report.exhausted += 1;
                counter!("analyze_items_total", "stage" => "classify", "outcome" => "exhausted")
                    .increment(1);
                if e.all_vetoed() {
                    info!(item = %id, "budget exhausted for every provider; stopping classification");
                    report.budget_stopped = true;
                    break;
                }
                warn!(item = %id, error = %e, "classification failed; item left for next run");
            }
        }
    }
    info!(
        attempted = report.attempted,
        succeeded = report.succeeded,
        exhausted = report.exhausted,
        "classification stage finished"
    );
    Ok(report)
}
