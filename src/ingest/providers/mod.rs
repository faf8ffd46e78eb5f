// src/ingest/providers/mod.rs
pub mod raindrop;
pub mod youtube_channel;
pub mod youtube_playlist;

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::config::AppConfig;
use crate::ingest::types::{SourceFetcher, SourceKind};

pub use raindrop::RaindropProvider;
pub use youtube_channel::YoutubeChannelProvider;
pub use youtube_playlist::YoutubePlaylistProvider;

pub const ENV_RAINDROP_TOKEN: &str = "RAINDROP_TOKEN";
pub const ENV_YOUTUBE_API_KEY: &str = "YOUTUBE_API_KEY";

/// One fetcher per source kind.
#[derive(Default)]
pub struct Fetchers {
    by_kind: HashMap<SourceKind, Box<dyn SourceFetcher>>,
}

impl Fetchers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: SourceKind, fetcher: impl SourceFetcher + 'static) -> Self {
        self.by_kind.insert(kind, Box::new(fetcher));
        self
    }

    pub fn get(&self, kind: SourceKind) -> Option<&dyn SourceFetcher> {
        self.by_kind.get(&kind).map(|f| f.as_ref())
    }

    /// Build HTTP fetchers for every kind an enabled source uses. A missing credential
    /// for such a kind is a configuration error.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let http = cfg.http.fetch_client()?;
        let mut out = Self::new();
        for source in cfg.sources.iter().filter(|s| s.enabled) {
            if out.by_kind.contains_key(&source.kind) {
                continue;
            }
            out = match source.kind {
                SourceKind::BookmarkCollection => {
                    let token = required_env(ENV_RAINDROP_TOKEN, &source.key)?;
                    out.with(source.kind, RaindropProvider::from_token(http.clone(), token))
                }
                SourceKind::VideoPlaylist => {
                    let key = required_env(ENV_YOUTUBE_API_KEY, &source.key)?;
                    out.with(source.kind, YoutubePlaylistProvider::from_api_key(http.clone(), key))
                }
                SourceKind::VideoChannel => {
                    out.with(source.kind, YoutubeChannelProvider::from_client(http.clone()))
                }
            };
        }
        Ok(out)
    }
}

fn required_env(var: &str, source_key: &str) -> Result<String> {
    std::env::var(var)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .with_context(|| format!("missing {var} env var (needed by source {source_key})"))
}

/// Parse an RFC 3339 timestamp; `None` for anything unparsable.
pub(crate) fn parse_rfc3339(ts: &str) -> Option<DateTime<Utc>> {
    let odt = OffsetDateTime::parse(ts.trim(), &Rfc3339).ok()?;
    DateTime::<Utc>::from_timestamp(odt.unix_timestamp(), odt.nanosecond())
}

/// Fail with the status and a bounded slice of the body on non-2xx.
pub(crate) async fn read_success_body(resp: reqwest::Response, what: &str) -> Result<String> {
    let status = resp.status();
    let body = resp
        .text()
        .await
        .with_context(|| format!("{what}: reading body"))?;
    if !status.is_success() {
        let snippet: String = body.chars().take(300).collect();
        anyhow::bail!("{what}: HTTP {status}: {snippet}");
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn rfc3339_variants_parse() {
        let want = Utc.with_ymd_and_hms(2025, 2, 3, 4, 5, 6).unwrap();
        assert_eq!(parse_rfc3339("2025-02-03T04:05:06Z"), Some(want));
        assert_eq!(parse_rfc3339("2025-02-03T04:05:06+00:00"), Some(want));
        assert_eq!(parse_rfc3339("2025-02-03T05:05:06+01:00"), Some(want));
        assert!(parse_rfc3339("2025-02-03T04:05:06.250Z").is_some());
        assert_eq!(parse_rfc3339("yesterday"), None);
    }
}
