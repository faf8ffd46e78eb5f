// src/analyze/mod.rs
//! Analysis stages run after ingestion: summarization, then classification. Each stage
//! walks the item store in order, calls the provider router once per pending item and
//! persists every enriched item immediately.

pub mod classify;
pub mod summarize;

pub use classify::{classify_pending, parse_labels, UNCLASSIFIED};
pub use summarize::summarize_pending;

use metrics::describe_counter;
use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::config::ai::AiConfig;

/// Longest summary kept, in characters.
pub const MAX_SUMMARY_CHARS: usize = 600;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageOptions {
    pub max_items_per_run: usize,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for StageOptions {
    fn default() -> Self {
        Self::from(&AiConfig::default())
    }
}

impl From<&AiConfig> for StageOptions {
    fn from(cfg: &AiConfig) -> Self {
        Self {
            max_items_per_run: cfg.max_items_per_run,
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageReport {
    /// Router invocations made.
    pub attempted: usize,
    pub succeeded: usize,
    /// Invocations where every candidate failed or was vetoed; the item stays pending.
    pub exhausted: usize,
    /// The stage stopped early because every candidate was over budget.
    pub budget_stopped: bool,
}

pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "analyze_items_total",
            "Items processed by an analysis stage, labelled by stage and outcome."
        );
    });
}

/// Single line, collapsed whitespace, surrounding quotes stripped, capped at `max_chars`.
pub fn sanitize_completion(input: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(input.len().min(max_chars * 4));
    let mut count = 0usize;
    let mut prev_space = false;
    for ch in input.chars() {
        let c = if ch.is_whitespace() || ch.is_control() { ' ' } else { ch };
        if c == ' ' {
            if prev_space || out.is_empty() {
                continue;
            }
            prev_space = true;
        } else {
            prev_space = false;
        }
        if count == max_chars {
            break;
        }
        out.push(c);
        count += 1;
    }
    let trimmed = out.trim_end();
    trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}
