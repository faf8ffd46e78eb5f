use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::ai::{ProviderCallResult, TokenUsage};
use crate::ingest::types::SourceKind;

/// A normalized unit of content. `id` is `"<namespace>:<source-local id>"` and is never
/// rewritten; analysis stages only fill the optional fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub title: String,
    pub url: Option<String>,
    pub source_type: SourceKind,
    #[serde(default)]
    pub source_key: String,
    pub published_at: Option<DateTime<Utc>>,
    pub ingested_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classifications: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<Enrichment>,
}

/// Which provider produced the summary, and what it cost in tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrichment {
    pub provider_id: String,
    pub model: String,
    pub tokens: TokenUsage,
}

impl From<&ProviderCallResult> for Enrichment {
    fn from(r: &ProviderCallResult) -> Self {
        Self {
            provider_id: r.provider_id.clone(),
            model: r.model.clone(),
            tokens: r.tokens_used,
        }
    }
}

pub trait ItemStore {
    fn contains(&self, id: &str) -> bool;
    fn get(&self, id: &str) -> Option<&Item>;
    /// All items in ingestion order.
    fn items(&self) -> &[Item];
    /// Append and persist. Returns `false` (and writes nothing) if the id already exists.
    fn append(&mut self, item: Item) -> Result<bool>;
    /// Replace an existing item (same id) and persist.
    fn put(&mut self, item: Item) -> Result<()>;

    fn len(&self) -> usize {
        self.items().len()
    }

    fn is_empty(&self) -> bool {
        self.items().is_empty()
    }
}

/// Ordered id index shared by the file and memory stores.
#[derive(Debug, Default)]
struct Indexed {
    items: Vec<Item>,
    by_id: HashMap<String, usize>,
}

impl Indexed {
    fn from_items(items: Vec<Item>) -> Result<Self> {
        let mut by_id = HashMap::with_capacity(items.len());
        for (i, it) in items.iter().enumerate() {
            if by_id.insert(it.id.clone(), i).is_some() {
                bail!("item store contains duplicate id {}", it.id);
            }
        }
        Ok(Self { items, by_id })
    }

    fn get(&self, id: &str) -> Option<&Item> {
        self.by_id.get(id).map(|&i| &self.items[i])
    }

    fn push(&mut self, item: Item) -> bool {
        if self.by_id.contains_key(&item.id) {
            return false;
        }
        self.by_id.insert(item.id.clone(), self.items.len());
        self.items.push(item);
        true
    }

    fn replace(&mut self, item: Item) -> Result<()> {
        match self.by_id.get(&item.id) {
            Some(&i) => {
                self.items[i] = item;
                Ok(())
            }
            None => bail!("cannot update unknown item {}", item.id),
        }
    }
}

/// JSON array of items, rewritten atomically on every mutation.
pub struct FileItemStore {
    path: PathBuf,
    inner: Indexed,
}

impl FileItemStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let items: Vec<Item> = super::read_json_opt(&path)?.unwrap_or_default();
        let inner = Indexed::from_items(items)?;
        Ok(Self { path, inner })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<()> {
        super::write_json_atomic(&self.path, &self.inner.items)
    }
}

impl ItemStore for FileItemStore {
    fn contains(&self, id: &str) -> bool {
        self.inner.by_id.contains_key(id)
    }

    fn get(&self, id: &str) -> Option<&Item> {
        self.inner.get(id)
    }

    fn items(&self) -> &[Item] {
        &self.inner.items
    }

    fn append(&mut self, item: Item) -> Result<bool> {
        if !self.inner.push(item) {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    fn put(&mut self, item: Item) -> Result<()> {
        self.inner.replace(item)?;
        self.persist()
    }
}

#[derive(Debug, Default)]
pub struct MemoryItemStore {
    inner: Indexed,
    pub writes: usize,
}

impl MemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: Vec<Item>) -> Result<Self> {
        Ok(Self {
            inner: Indexed::from_items(items)?,
            writes: 0,
        })
    }
}

impl ItemStore for MemoryItemStore {
    fn contains(&self, id: &str) -> bool {
        self.inner.by_id.contains_key(id)
    }

    fn get(&self, id: &str) -> Option<&Item> {
        self.inner.get(id)
    }

    fn items(&self) -> &[Item] {
        &self.inner.items
    }

    fn append(&mut self, item: Item) -> Result<bool> {
        let added = self.inner.push(item);
        if added {
            self.writes += 1;
        }
        Ok(added)
    }

    fn put(&mut self, item: Item) -> Result<()> {
        self.inner.replace(item)?;
        self.writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item(id: &str) -> Item {
        Item {
            id: id.to_string(),
            title: format!("title {id}"),
            url: None,
            source_type: SourceKind::VideoChannel,
            source_key: "chan".into(),
            published_at: None,
            ingested_at: Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap(),
            summary: None,
            classifications: None,
            enrichment: None,
        }
    }

    #[test]
    fn append_rejects_existing_id() {
        let mut s = MemoryItemStore::new();
        assert!(s.append(item("yt:a")).unwrap());
        assert!(!s.append(item("yt:a")).unwrap());
        assert_eq!(s.len(), 1);
        assert_eq!(s.writes, 1);
    }

    #[test]
    fn file_store_keeps_order_and_updates_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.json");
        {
            let mut s = FileItemStore::open(&path).unwrap();
            s.append(item("yt:b")).unwrap();
            s.append(item("yt:a")).unwrap();
            let mut b = s.get("yt:b").cloned().unwrap();
            b.summary = Some("short".into());
            s.put(b).unwrap();
        }
        let s = FileItemStore::open(&path).unwrap();
        let ids: Vec<_> = s.items().iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["yt:b", "yt:a"]);
        assert_eq!(s.get("yt:b").unwrap().summary.as_deref(), Some("short"));
    }

    #[test]
    fn put_of_unknown_item_fails() {
        let mut s = MemoryItemStore::new();
        assert!(s.put(item("yt:zzz")).is_err());
    }

    #[test]
    fn duplicate_ids_on_disk_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.json");
        let json = serde_json::to_string(&vec![item("yt:a"), item("yt:a")]).unwrap();
        std::fs::write(&path, json).unwrap();
        assert!(FileItemStore::open(&path).is_err());
    }
}
