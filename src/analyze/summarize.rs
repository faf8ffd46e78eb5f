use anyhow::Result;
use metrics::counter;
use tracing::{debug, info, warn};

use crate::ai::{GenerationRequest, ProviderRouter};
use crate::analyze::{
    ensure_metrics_described, sanitize_completion, StageOptions, StageReport, MAX_SUMMARY_CHARS,
};
use crate::error::RouterError;
use crate::store::{Enrichment, Item, ItemStore};

const PREAMBLE: &str = "You summarize saved links for a personal reading digest. \
Answer with two or three plain sentences describing what the item is about. \
No lists, no markdown, no preamble.";

fn prompt(item: &Item) -> String {
    let mut p = format!("Title: {}\n", item.title);
    if let Some(url) = &item.url {
        p.push_str(&format!("URL: {url}\n"));
    }
    p.push_str(&format!("Source: {}\n", item.source_type.as_str()));
    p
}

/// Summarize items that have none yet, in store order, up to `max_items_per_run`.
pub async fn summarize_pending(
    items: &mut dyn ItemStore,
    router: &ProviderRouter,
    opts: &StageOptions,
) -> Result<StageReport> {
    ensure_metrics_described();
    let pending: Vec<String> = items
        .items()
        .iter()
        .filter(|i| i.summary.is_none())
        .take(opts.max_items_per_run)
        .map(|i| i.id.clone())
        .collect();

    let mut report = StageReport::default();
    for id in pending {
        let Some(item) = items.get(&id).cloned() else {
            continue;
        };
        let req = GenerationRequest::new(prompt(&item))
            .preamble(PREAMBLE)
            .temperature(opts.temperature)
            .max_tokens(opts.max_tokens);

        report.attempted += 1;
        match router.invoke(&req).await {
            Ok(res) => {
                let summary = sanitize_completion(&res.text, MAX_SUMMARY_CHARS);
                if summary.is_empty() {
                    // Charged, but the item stays pending and is billed again next run.
                    warn!(
                        item = %id,
                        provider = %res.provider_id,
                        model = %res.model,
                        "completion sanitized to nothing; summary not stored"
                    );
                    report.exhausted += 1;
                    counter!("analyze_items_total", "stage" => "summarize", "outcome" => "empty")
                        .increment(1);
                    continue;
                }
                let enrichment = Enrichment::from(&res);
                let mut updated = item;
                updated.summary = Some(summary);
                updated.enrichment = Some(enrichment);
                items.put(updated)?;
                report.succeeded += 1;
                counter!("analyze_items_total", "stage" => "summarize", "outcome" => "ok")
                    .increment(1);
                debug!(item = %id, provider = %res.provider_id, "summarized");
            }
            Err(RouterError::NoCandidates) => {
                warn!("no provider candidates; summarization skipped");
                report.attempted -= 1;
                break;
            }
            Err(e) => {
                report.exhausted += 1;
                counter!("analyze_items_total", "stage" => "summarize", "outcome" => "exhausted")
                    .increment(1);
                if e.all_vetoed() {
                    info!(item = %id, "budget exhausted for every provider; stopping summarization");
                    report.budget_stopped = true;
                    break;
                }
                warn!(item = %id, error = %e, "summarization failed; item left for next run");
            }
        }
    }
    info!(
        attempted = report.attempted,
        succeeded = report.succeeded,
        exhausted = report.exhausted,
        "summarization stage finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::SourceKind;
    use chrono::Utc;

    #[test]
    fn prompt_carries_title_and_url() {
        let item = Item {
            id: "raindrop:1".into(),
            title: "Zero-copy parsing".into(),
            url: Some("https://example.com/zc".into()),
            source_type: SourceKind::BookmarkCollection,
            source_key: "reading".into(),
            published_at: None,
            ingested_at: Utc::now(),
            summary: None,
            classifications: None,
            enrichment: None,
        };
        let p = prompt(&item);
        assert!(p.contains("Title: Zero-copy parsing"));
        assert!(p.contains("URL: https://example.com/zc"));
    }
}
