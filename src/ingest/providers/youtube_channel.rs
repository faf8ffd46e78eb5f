// src/ingest/providers/youtube_channel.rs
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use metrics::counter;
use quick_xml::de::from_str;
use serde::Deserialize;

use super::{parse_rfc3339, read_success_body};
use crate::ingest::types::{
    FetchWindow, Page, PageCursor, RawRecord, SourceDescriptor, SourceFetcher,
};

const YOUTUBE_FEEDS_URL: &str = "https://www.youtube.com/feeds/videos.xml";

#[derive(Debug, Deserialize)]
struct Feed {
    #[serde(default, rename = "entry")]
    entries: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    /// `yt:video:<videoId>`
    id: Option<String>,
    #[serde(rename = "yt:videoId", alias = "videoId")]
    video_id: Option<String>,
    title: Option<String>,
    #[serde(default)]
    link: Vec<Link>,
    published: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Link {
    #[serde(rename = "@rel")]
    rel: Option<String>,
    #[serde(rename = "@href")]
    href: Option<String>,
}

impl Entry {
    fn video_id(&self) -> Option<String> {
        self.video_id
            .clone()
            .or_else(|| {
                self.id
                    .as_deref()
                    .and_then(|id| id.strip_prefix("yt:video:"))
                    .map(str::to_string)
            })
            .filter(|v| !v.trim().is_empty())
    }

    fn alternate_link(&self) -> Option<String> {
        self.link
            .iter()
            .find(|l| l.rel.as_deref().unwrap_or("alternate") == "alternate")
            .and_then(|l| l.href.clone())
    }
}

/// Channel uploads from the public Atom feed. No key needed; the feed only carries the
/// most recent uploads, so it is always a single page.
pub struct YoutubeChannelProvider {
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http {
        client: reqwest::Client,
        feeds_url: String,
    },
}

impl YoutubeChannelProvider {
    pub fn from_fixture(xml: &str) -> Self {
        Self {
            mode: Mode::Fixture(xml.to_string()),
        }
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self {
            mode: Mode::Http {
                client,
                feeds_url: YOUTUBE_FEEDS_URL.to_string(),
            },
        }
    }

    pub fn with_feeds_url(mut self, url: &str) -> Self {
        if let Mode::Http { feeds_url, .. } = &mut self.mode {
            *feeds_url = url.to_string();
        }
        self
    }

    fn parse_feed(xml: &str, window: &FetchWindow) -> Result<Page> {
        let feed: Feed = from_str(xml).context("parsing youtube channel atom feed")?;
        let mut records = Vec::with_capacity(feed.entries.len());
        for entry in &feed.entries {
            let published_at = entry.published.as_deref().and_then(parse_rfc3339);
            if window.is_before(published_at) {
                continue;
            }
            let local_id = entry.video_id().unwrap_or_default();
            let url = entry
                .alternate_link()
                .or_else(|| {
                    (!local_id.is_empty())
                        .then(|| format!("https://www.youtube.com/watch?v={local_id}"))
                });
            records.push(RawRecord {
                local_id,
                title: entry.title.clone().unwrap_or_default(),
                url,
                published_at,
            });
        }
        counter!("ingest_events_total", "provider" => "youtube_channel")
            .increment(records.len() as u64);
        Ok(Page {
            records,
            next: None,
        })
    }
}

#[async_trait]
impl SourceFetcher for YoutubeChannelProvider {
    async fn fetch_page(
        &self,
        source: &SourceDescriptor,
        window: &FetchWindow,
        cursor: Option<&PageCursor>,
    ) -> Result<Page> {
        if let Some(c) = cursor {
            bail!("channel feeds have a single page, got cursor {c:?}");
        }
        match &self.mode {
            Mode::Fixture(xml) => Self::parse_feed(xml, window),
            Mode::Http { client, feeds_url } => {
                let resp = client
                    .get(feeds_url.as_str())
                    .query(&[("channel_id", source.remote_id())])
                    .send()
                    .await
                    .context("youtube channel feed http get()")?;
                let body = read_success_body(resp, "youtube channel feed").await?;
                Self::parse_feed(&body, window)
            }
        }
    }

    fn name(&self) -> &'static str {
        "youtube_channel"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns:yt="http://www.youtube.com/xml/schemas/2015" xmlns="http://www.w3.org/2005/Atom">
 <title>Some Channel</title>
 <entry>
  <id>yt:video:abc123</id>
  <yt:videoId>abc123</yt:videoId>
  <title>Fresh upload</title>
  <link rel="alternate" href="https://www.youtube.com/watch?v=abc123"/>
  <published>2025-05-30T12:00:00+00:00</published>
 </entry>
 <entry>
  <id>yt:video:old999</id>
  <yt:videoId>old999</yt:videoId>
  <title>Old upload</title>
  <link rel="alternate" href="https://www.youtube.com/watch?v=old999"/>
  <published>2024-01-01T12:00:00+00:00</published>
 </entry>
</feed>"#;

    #[test]
    fn parses_entries_into_records() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let page = YoutubeChannelProvider::parse_feed(XML, &FetchWindow::lookback(now, 0)).unwrap();
        assert_eq!(page.next, None);
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.records[0].local_id, "abc123");
        assert_eq!(page.records[0].title, "Fresh upload");
        assert_eq!(
            page.records[0].url.as_deref(),
            Some("https://www.youtube.com/watch?v=abc123")
        );
    }

    #[test]
    fn lookback_drops_old_uploads() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let page = YoutubeChannelProvider::parse_feed(XML, &FetchWindow::lookback(now, 30)).unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].local_id, "abc123");
    }
}
