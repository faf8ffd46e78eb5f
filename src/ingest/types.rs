// src/ingest/types.rs
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    BookmarkCollection,
    VideoPlaylist,
    VideoChannel,
}

impl SourceKind {
    /// Prefix of the global item id. Both video kinds share `yt` so the same video
    /// reached through a playlist and a channel is one item.
    pub fn namespace(self) -> &'static str {
        match self {
            SourceKind::BookmarkCollection => "raindrop",
            SourceKind::VideoPlaylist | SourceKind::VideoChannel => "yt",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::BookmarkCollection => "bookmark-collection",
            SourceKind::VideoPlaylist => "video-playlist",
            SourceKind::VideoChannel => "video-channel",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Cadence {
    Once,
    Daily,
    WeeklyOnce,
}

fn default_enabled() -> bool {
    true
}

/// A configured source. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub key: String,
    pub kind: SourceKind,
    pub cadence: Cadence,
    /// 0 = no lower bound.
    #[serde(default)]
    pub lookback_window_days: u32,
    /// Collection / playlist / channel id; the key doubles as the id when absent.
    #[serde(default)]
    pub remote_id: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl SourceDescriptor {
    pub fn new(key: impl Into<String>, kind: SourceKind, cadence: Cadence) -> Self {
        Self {
            key: key.into(),
            kind,
            cadence,
            lookback_window_days: 0,
            remote_id: None,
            enabled: true,
        }
    }

    pub fn remote_id(&self) -> &str {
        self.remote_id.as_deref().unwrap_or(&self.key)
    }
}

/// Time window a fetch is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub since: Option<DateTime<Utc>>,
    pub until: DateTime<Utc>,
}

impl FetchWindow {
    pub fn lookback(now: DateTime<Utc>, days: u32) -> Self {
        let since = (days > 0).then(|| now - Duration::days(i64::from(days)));
        Self { since, until: now }
    }

    /// Records without a publish date are always in the window.
    pub fn contains(&self, published_at: Option<DateTime<Utc>>) -> bool {
        match (published_at, self.since) {
            (Some(ts), Some(since)) => ts >= since,
            _ => true,
        }
    }

    /// True when `published_at` is known and older than the window start.
    pub fn is_before(&self, published_at: Option<DateTime<Utc>>) -> bool {
        !self.contains(published_at)
    }
}

/// A record as a fetcher returns it, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub local_id: String,
    pub title: String,
    pub url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Continuation for paginated sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    Index(u32),
    Token(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub records: Vec<RawRecord>,
    /// `None` ends the iteration.
    pub next: Option<PageCursor>,
}

#[async_trait::async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Fetch one page. `cursor` is `None` for the first page.
    async fn fetch_page(
        &self,
        source: &SourceDescriptor,
        window: &FetchWindow,
        cursor: Option<&PageCursor>,
    ) -> Result<Page>;
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn kinds_and_cadences_use_kebab_case() {
        let d: SourceDescriptor = serde_json::from_str(
            r#"{"key":"later","kind":"video-playlist","cadence":"weekly-once"}"#,
        )
        .unwrap();
        assert_eq!(d.kind, SourceKind::VideoPlaylist);
        assert_eq!(d.cadence, Cadence::WeeklyOnce);
        assert!(d.enabled);
        assert_eq!(d.remote_id(), "later");
        assert_eq!(d.lookback_window_days, 0);
    }

    #[test]
    fn zero_lookback_is_unbounded() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let w = FetchWindow::lookback(now, 0);
        assert!(w.contains(Some(Utc.with_ymd_and_hms(1999, 1, 1, 0, 0, 0).unwrap())));

        let w = FetchWindow::lookback(now, 7);
        assert!(w.contains(Some(now - Duration::days(7))));
        assert!(w.is_before(Some(now - Duration::days(8))));
        assert!(w.contains(None));
    }
}
