// src/ingest/mod.rs
pub mod config;
pub mod providers;
pub mod scheduler;
pub mod types;

pub use scheduler::{decide, Scheduler, SourceOutcome, SyncDecision, SyncReport};

use crate::ingest::types::{RawRecord, SourceDescriptor, SourceKind};
use crate::store::Item;
use chrono::{DateTime, Utc};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

/// Titles longer than this are truncated on ingestion.
pub const MAX_TITLE_CHARS: usize = 500;

/// One-time metrics registration (so series show up in the snapshot).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "ingest_sources_total",
            "Sources considered per run, labelled by scheduling decision."
        );
        describe_counter!(
            "ingest_events_total",
            "Raw records parsed from fetchers, labelled by provider."
        );
        describe_counter!(
            "ingest_items_appended_total",
            "Items appended to the item store."
        );
        describe_counter!(
            "ingest_dedup_total",
            "Records dropped by deduplication, labelled by tier (seen|global)."
        );
        describe_counter!(
            "ingest_invalid_total",
            "Records skipped because they had no id or no usable title."
        );
        describe_counter!(
            "ingest_source_errors_total",
            "Source syncs that ended in a fetch failure."
        );
        describe_histogram!("ingest_fetch_ms", "Per-page fetch time in milliseconds.");
        describe_gauge!(
            "ingest_last_run_ts",
            "Unix ts when the sync scheduler last finished."
        );
    });
}

/// Normalize a title: decode entities, strip tags, fold typographic quotes, collapse
/// whitespace, cap length.
pub fn normalize_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    if out.chars().count() > MAX_TITLE_CHARS {
        out = out.chars().take(MAX_TITLE_CHARS).collect();
    }
    out
}

/// Global item id: `<namespace>:<source-local id>`.
pub fn item_id(kind: SourceKind, local_id: &str) -> String {
    format!("{}:{}", kind.namespace(), local_id.trim())
}

/// Turn a raw record into an `Item`. `None` when the record has no id or its title
/// normalizes to nothing.
pub fn normalize_record(
    source: &SourceDescriptor,
    rec: &RawRecord,
    now: DateTime<Utc>,
) -> Option<Item> {
    if rec.local_id.trim().is_empty() {
        return None;
    }
    let title = normalize_text(&rec.title);
    if title.is_empty() {
        return None;
    }
    let url = rec
        .url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(str::to_string);

    Some(Item {
        id: item_id(source.kind, &rec.local_id),
        title,
        url,
        source_type: source.kind,
        source_key: source.key.clone(),
        published_at: rec.published_at,
        ingested_at: now,
        summary: None,
        classifications: None,
        enrichment: None,
    })
}
