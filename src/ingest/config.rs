// src/ingest/config.rs
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::ingest::scheduler::DEFAULT_MAX_PAGES;
use crate::ingest::types::SourceDescriptor;

fn default_max_pages() -> u32 {
    DEFAULT_MAX_PAGES
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Upper bound on pages fetched per source per run.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
        }
    }
}

/// Trim keys and remote ids in place, then reject empty or duplicate keys: the key is
/// the State Store's primary key, so two sources sharing one would corrupt each other.
pub fn clean_sources(sources: &mut [SourceDescriptor]) -> Result<()> {
    let mut keys = BTreeSet::new();
    for s in sources.iter_mut() {
        s.key = s.key.trim().to_string();
        if let Some(id) = s.remote_id.as_mut() {
            *id = id.trim().to_string();
        }
        if s.remote_id.as_deref() == Some("") {
            s.remote_id = None;
        }
        if s.key.is_empty() {
            bail!("source with empty key");
        }
        if !keys.insert(s.key.clone()) {
            bail!("duplicate source key {:?}", s.key);
        }
    }
    Ok(())
}
