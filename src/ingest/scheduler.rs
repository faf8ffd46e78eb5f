// src/ingest/scheduler.rs
//! Per-source sync scheduling: backoff, bootstrap and cadence gating, page-by-page
//! ingestion with two-tier dedup, and the success/failure state transitions.
//!
//! Ordering per record is "append item, persist items, record seen id, persist state".
//! A crash between the two persists leaves an item whose id is not yet in `seen_ids`;
//! the next run re-fetches it and the global-id check rejects it, so nothing is lost and
//! nothing is duplicated.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use tracing::{info, warn};

use crate::ingest::providers::Fetchers;
use crate::ingest::types::{Cadence, FetchWindow, RawRecord, SourceDescriptor};
use crate::ingest::{ensure_metrics_described, normalize_record};
use crate::store::{ItemStore, SourceState, StateStore};

/// Minimum distance between runs of a `weekly-once` source once bootstrapped.
pub const WEEKLY_INTERVAL_DAYS: i64 = 7;
/// Backoff grows by one day per consecutive failure up to this ceiling.
pub const MAX_BACKOFF_DAYS: u32 = 7;
pub const DEFAULT_MAX_PAGES: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDecision {
    Run,
    SkipBackoff,
    SkipCadence,
    SkipOnceDone,
    SkipDisabled,
}

impl SyncDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncDecision::Run => "run",
            SyncDecision::SkipBackoff => "skip_backoff",
            SyncDecision::SkipCadence => "skip_cadence",
            SyncDecision::SkipOnceDone => "skip_once_done",
            SyncDecision::SkipDisabled => "skip_disabled",
        }
    }
}

/// Whether `source` should be fetched on `today`. Backoff is checked first and wins over
/// bootstrap and cadence.
pub fn decide(state: &SourceState, source: &SourceDescriptor, today: NaiveDate) -> SyncDecision {
    if let Some(not_before) = state.retry_not_before {
        if today < not_before {
            return SyncDecision::SkipBackoff;
        }
    }
    if source.cadence == Cadence::WeeklyOnce
        && !state.bootstrap_pending
        && !elapsed_days(state.last_run_at, today, WEEKLY_INTERVAL_DAYS)
    {
        return SyncDecision::SkipCadence;
    }
    if source.cadence == Cadence::Once && state.last_success_at.is_some() {
        return SyncDecision::SkipOnceDone;
    }
    SyncDecision::Run
}

/// Calendar-day distance, so a cron that fires a few minutes earlier than last week
/// still counts as a full week. Never having run counts as elapsed.
fn elapsed_days(last: Option<DateTime<Utc>>, today: NaiveDate, days: i64) -> bool {
    match last {
        None => true,
        Some(ts) => (today - ts.date_naive()).num_days() >= days,
    }
}

pub fn backoff_days(consecutive_failures: u32) -> u32 {
    consecutive_failures.clamp(1, MAX_BACKOFF_DAYS)
}

pub fn record_success(state: &mut SourceState, now: DateTime<Utc>) {
    state.last_run_at = Some(now);
    state.last_success_at = Some(now);
    state.last_error_at = None;
    state.last_error = None;
    state.consecutive_failures = 0;
    state.retry_not_before = None;
    state.bootstrap_pending = false;
}

pub fn record_failure(state: &mut SourceState, now: DateTime<Utc>, error: &str) {
    state.last_run_at = Some(now);
    state.last_error_at = Some(now);
    state.last_error = Some(error.to_string());
    state.consecutive_failures = state.consecutive_failures.saturating_add(1);
    let days = backoff_days(state.consecutive_failures);
    state.retry_not_before = Some(now.date_naive() + Duration::days(i64::from(days)));
}

/// What happened to one source in one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceOutcome {
    pub key: String,
    pub decision: SyncDecision,
    pub pages: u32,
    pub fetched: usize,
    pub appended: usize,
    pub seen_skipped: usize,
    pub global_duplicates: usize,
    pub invalid: usize,
    pub error: Option<String>,
}

impl SourceOutcome {
    fn new(key: &str, decision: SyncDecision) -> Self {
        Self {
            key: key.to_string(),
            decision,
            pages: 0,
            fetched: 0,
            appended: 0,
            seen_skipped: 0,
            global_duplicates: 0,
            invalid: 0,
            error: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.decision == SyncDecision::Run && self.error.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub sources: Vec<SourceOutcome>,
}

impl SyncReport {
    pub fn appended(&self) -> usize {
        self.sources.iter().map(|s| s.appended).sum()
    }

    pub fn failed(&self) -> usize {
        self.sources.iter().filter(|s| s.error.is_some()).count()
    }

    pub fn outcome(&self, key: &str) -> Option<&SourceOutcome> {
        self.sources.iter().find(|s| s.key == key)
    }
}

/// Drives every configured source once. Sole writer of both stores for the run.
pub struct Scheduler<'a> {
    fetchers: &'a Fetchers,
    states: &'a mut dyn StateStore,
    items: &'a mut dyn ItemStore,
    max_pages: u32,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        fetchers: &'a Fetchers,
        states: &'a mut dyn StateStore,
        items: &'a mut dyn ItemStore,
    ) -> Self {
        Self {
            fetchers,
            states,
            items,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    /// Sync all sources in configuration order. Fetch failures are absorbed per source;
    /// only store failures and missing fetchers abort the run.
    pub async fn run(
        &mut self,
        sources: &[SourceDescriptor],
        now: DateTime<Utc>,
    ) -> Result<SyncReport> {
        ensure_metrics_described();
        let mut report = SyncReport::default();
        for source in sources {
            let outcome = self.sync_source(source, now).await?;
            counter!("ingest_sources_total", "decision" => outcome.decision.as_str())
                .increment(1);
            report.sources.push(outcome);
        }
        gauge!("ingest_last_run_ts").set(now.timestamp() as f64);
        info!(
            target: "ingest",
            sources = report.sources.len(),
            appended = report.appended(),
            failed = report.failed(),
            "sync finished"
        );
        Ok(report)
    }

    async fn sync_source(
        &mut self,
        source: &SourceDescriptor,
        now: DateTime<Utc>,
    ) -> Result<SourceOutcome> {
        let mut state = self
            .states
            .get(&source.key)
            .cloned()
            .unwrap_or_else(|| SourceState::fresh(source.cadence));

        let decision = if source.enabled {
            decide(&state, source, now.date_naive())
        } else {
            SyncDecision::SkipDisabled
        };
        let mut outcome = SourceOutcome::new(&source.key, decision);
        if decision != SyncDecision::Run {
            info!(
                target: "ingest",
                source = %source.key,
                decision = decision.as_str(),
                retry_not_before = ?state.retry_not_before,
                "source skipped"
            );
            return Ok(outcome);
        }

        let fetchers = self.fetchers;
        let fetcher = fetchers.get(source.kind).ok_or_else(|| {
            anyhow!(
                "no fetcher configured for {} (source {})",
                source.kind.as_str(),
                source.key
            )
        })?;

        info!(
            target: "ingest",
            source = %source.key,
            kind = source.kind.as_str(),
            bootstrap = state.bootstrap_pending,
            "syncing source"
        );

        let window = FetchWindow::lookback(now, source.lookback_window_days);
        let mut cursor = None;
        loop {
            let t0 = std::time::Instant::now();
            let page = match fetcher.fetch_page(source, &window, cursor.as_ref()).await {
                Ok(page) => page,
                Err(e) => {
                    let msg = format!("{e:#}");
                    warn!(
                        target: "ingest",
                        source = %source.key,
                        fetcher = fetcher.name(),
                        failures = state.consecutive_failures + 1,
                        error = %msg,
                        "source fetch failed"
                    );
                    counter!("ingest_source_errors_total").increment(1);
                    record_failure(&mut state, now, &msg);
                    self.states.put(&source.key, &state)?;
                    outcome.error = Some(msg);
                    return Ok(outcome);
                }
            };
            histogram!("ingest_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
            outcome.pages += 1;
            outcome.fetched += page.records.len();

            for rec in &page.records {
                self.ingest_record(source, &mut state, rec, now, &mut outcome)?;
            }

            match page.next {
                Some(next) if outcome.pages < self.max_pages => cursor = Some(next),
                Some(_) => {
                    warn!(
                        target: "ingest",
                        source = %source.key,
                        max_pages = self.max_pages,
                        "page limit reached, remaining pages left for a later run"
                    );
                    break;
                }
                None => break,
            }
        }

        record_success(&mut state, now);
        self.states.put(&source.key, &state)?;
        info!(
            target: "ingest",
            source = %source.key,
            pages = outcome.pages,
            fetched = outcome.fetched,
            appended = outcome.appended,
            seen = outcome.seen_skipped,
            duplicates = outcome.global_duplicates,
            invalid = outcome.invalid,
            "source synced"
        );
        Ok(outcome)
    }

    fn ingest_record(
        &mut self,
        source: &SourceDescriptor,
        state: &mut SourceState,
        rec: &RawRecord,
        now: DateTime<Utc>,
        outcome: &mut SourceOutcome,
    ) -> Result<()> {
        let local_id = rec.local_id.trim();
        if state.seen_ids.contains(local_id) {
            outcome.seen_skipped += 1;
            counter!("ingest_dedup_total", "tier" => "seen").increment(1);
            return Ok(());
        }
        let Some(item) = normalize_record(source, rec, now) else {
            outcome.invalid += 1;
            counter!("ingest_invalid_total").increment(1);
            return Ok(());
        };

        if self.items.contains(&item.id) {
            outcome.global_duplicates += 1;
            counter!("ingest_dedup_total", "tier" => "global").increment(1);
        } else if self.items.append(item)? {
            outcome.appended += 1;
            counter!("ingest_items_appended_total").increment(1);
        }

        state.seen_ids.insert(local_id.to_string());
        self.states.put(&source.key, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::SourceKind;
    use chrono::TimeZone;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 6, 0, 0).unwrap()
    }

    #[test]
    fn backoff_beats_bootstrap() {
        let src = SourceDescriptor::new("later", SourceKind::VideoPlaylist, Cadence::WeeklyOnce);
        let mut st = SourceState::fresh(Cadence::WeeklyOnce);
        record_failure(&mut st, at(2025, 4, 1), "boom");
        assert!(st.bootstrap_pending);
        assert_eq!(decide(&st, &src, day(2025, 4, 1)), SyncDecision::SkipBackoff);
        assert_eq!(decide(&st, &src, day(2025, 4, 2)), SyncDecision::Run);
    }

    #[test]
    fn backoff_grows_then_caps_at_seven_days() {
        let mut st = SourceState::default();
        let now = at(2025, 4, 1);
        for k in 1..=10u32 {
            record_failure(&mut st, now, "boom");
            let expect = day(2025, 4, 1) + Duration::days(i64::from(k.min(7)));
            assert_eq!(st.consecutive_failures, k);
            assert_eq!(st.retry_not_before, Some(expect));
        }
    }

    #[test]
    fn success_resets_failure_fields_together() {
        let mut st = SourceState::fresh(Cadence::WeeklyOnce);
        record_failure(&mut st, at(2025, 4, 1), "boom");
        record_success(&mut st, at(2025, 4, 3));
        assert_eq!(st.consecutive_failures, 0);
        assert_eq!(st.retry_not_before, None);
        assert_eq!(st.last_error_at, None);
        assert_eq!(st.last_error, None);
        assert!(!st.bootstrap_pending);
        assert_eq!(st.last_success_at, Some(at(2025, 4, 3)));
        assert_eq!(st.last_run_at, Some(at(2025, 4, 3)));
    }

    #[test]
    fn failure_never_clears_bootstrap() {
        let mut st = SourceState::fresh(Cadence::WeeklyOnce);
        for _ in 0..3 {
            record_failure(&mut st, at(2025, 4, 1), "boom");
        }
        assert!(st.bootstrap_pending);
        assert!(st.last_success_at.is_none());
    }

    #[test]
    fn weekly_cadence_counts_calendar_days() {
        let src = SourceDescriptor::new("later", SourceKind::VideoPlaylist, Cadence::WeeklyOnce);
        let mut st = SourceState::fresh(Cadence::WeeklyOnce);
        record_success(&mut st, Utc.with_ymd_and_hms(2025, 4, 1, 6, 30, 0).unwrap());
        assert_eq!(decide(&st, &src, day(2025, 4, 7)), SyncDecision::SkipCadence);
        assert_eq!(decide(&st, &src, day(2025, 4, 8)), SyncDecision::Run);
    }

    #[test]
    fn once_sources_stop_after_first_success() {
        let src = SourceDescriptor::new("archive", SourceKind::BookmarkCollection, Cadence::Once);
        let mut st = SourceState::fresh(Cadence::Once);
        assert_eq!(decide(&st, &src, day(2025, 4, 1)), SyncDecision::Run);
        record_failure(&mut st, at(2025, 4, 1), "boom");
        assert_eq!(decide(&st, &src, day(2025, 4, 2)), SyncDecision::Run);
        record_success(&mut st, at(2025, 4, 2));
        assert_eq!(decide(&st, &src, day(2025, 5, 2)), SyncDecision::SkipOnceDone);
    }

    #[test]
    fn daily_sources_are_not_cadence_gated() {
        let src = SourceDescriptor::new("chan", SourceKind::VideoChannel, Cadence::Daily);
        let mut st = SourceState::fresh(Cadence::Daily);
        record_success(&mut st, at(2025, 4, 1));
        assert_eq!(decide(&st, &src, day(2025, 4, 1)), SyncDecision::Run);
    }
}
