use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::ingest::types::Cadence;

/// Persisted sync bookkeeping for one configured source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceState {
    /// Last *attempted* run, successful or not.
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub consecutive_failures: u32,
    /// While today is before this date the source is skipped.
    pub retry_not_before: Option<NaiveDate>,
    /// Weekly-once sources only, until their first success.
    #[serde(default)]
    pub bootstrap_pending: bool,
    /// Source-local ids already handled; work avoidance, not the dedup boundary.
    #[serde(default)]
    pub seen_ids: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl SourceState {
    /// State for a source that has never run.
    pub fn fresh(cadence: Cadence) -> Self {
        Self {
            bootstrap_pending: cadence == Cadence::WeeklyOnce,
            ..Default::default()
        }
    }
}

pub trait StateStore {
    fn get(&self, key: &str) -> Option<&SourceState>;
    /// Insert or replace, then persist before returning.
    fn put(&mut self, key: &str, state: &SourceState) -> Result<()>;
}

/// JSON object `{ "<source key>": SourceState }`, rewritten atomically on every `put`.
pub struct FileStateStore {
    path: PathBuf,
    states: BTreeMap<String, SourceState>,
}

impl FileStateStore {
    /// Load the file if it exists. A malformed file is fatal: silently starting over would
    /// re-bootstrap every source and forget all backoff windows.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let states = super::read_json_opt(&path)?.unwrap_or_default();
        Ok(Self { path, states })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl StateStore for FileStateStore {
    fn get(&self, key: &str) -> Option<&SourceState> {
        self.states.get(key)
    }

    fn put(&mut self, key: &str, state: &SourceState) -> Result<()> {
        self.states.insert(key.to_string(), state.clone());
        super::write_json_atomic(&self.path, &self.states)
    }
}

/// In-memory store for tests and dry runs; counts persists so tests can assert on them.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    pub states: BTreeMap<String, SourceState>,
    pub writes: usize,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, key: &str) -> Option<&SourceState> {
        self.states.get(key)
    }

    fn put(&mut self, key: &str, state: &SourceState) -> Result<()> {
        self.states.insert(key.to_string(), state.clone());
        self.writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fresh_state_bootstraps_only_weekly_once() {
        assert!(SourceState::fresh(Cadence::WeeklyOnce).bootstrap_pending);
        assert!(!SourceState::fresh(Cadence::Daily).bootstrap_pending);
        assert!(!SourceState::fresh(Cadence::Once).bootstrap_pending);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut st = SourceState::fresh(Cadence::WeeklyOnce);
        st.last_run_at = Some(Utc.with_ymd_and_hms(2025, 3, 1, 6, 0, 0).unwrap());
        st.consecutive_failures = 2;
        st.retry_not_before = NaiveDate::from_ymd_opt(2025, 3, 3);
        st.seen_ids.insert("abc".into());

        {
            let mut store = FileStateStore::open(&path).unwrap();
            assert!(store.is_empty());
            store.put("watch-later", &st).unwrap();
        }

        let store = FileStateStore::open(&path).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("watch-later"), Some(&st));
    }

    #[test]
    fn older_files_without_optional_fields_still_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, r#"{"reading": {"last_run_at": null}}"#).unwrap();
        let store = FileStateStore::open(&path).unwrap();
        let st = store.get("reading").unwrap();
        assert_eq!(st.consecutive_failures, 0);
        assert!(st.seen_ids.is_empty());
        assert!(!st.bootstrap_pending);
    }
}
