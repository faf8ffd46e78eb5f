// src/ingest/providers/youtube_playlist.rs
use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use metrics::counter;
use serde::Deserialize;

use super::{parse_rfc3339, read_success_body};
use crate::ingest::types::{
    FetchWindow, Page, PageCursor, RawRecord, SourceDescriptor, SourceFetcher,
};

const YOUTUBE_API_URL: &str = "https://www.googleapis.com/youtube/v3";
pub const MAX_RESULTS: u32 = 50;

/// Placeholder titles YouTube keeps in playlists for videos that are gone.
const UNAVAILABLE_TITLES: [&str; 2] = ["Private video", "Deleted video"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemsResponse {
    #[serde(default)]
    items: Vec<PlaylistItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItem {
    snippet: Snippet,
    content_details: Option<ContentDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    #[serde(default)]
    title: String,
    /// When the video was added to the playlist.
    published_at: Option<String>,
    resource_id: ResourceId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentDetails {
    video_published_at: Option<String>,
}

/// Video playlists through the YouTube Data API, paged by `nextPageToken`.
pub struct YoutubePlaylistProvider {
    mode: Mode,
}

enum Mode {
    Fixture {
        first: String,
        by_token: HashMap<String, String>,
    },
    Http {
        client: reqwest::Client,
        api_key: String,
        base_url: String,
    },
}

impl YoutubePlaylistProvider {
    pub fn from_fixture(first_page: &str) -> Self {
        Self {
            mode: Mode::Fixture {
                first: first_page.to_string(),
                by_token: HashMap::new(),
            },
        }
    }

    /// Register the body served for `pageToken = token` in fixture mode.
    pub fn with_fixture_page(mut self, token: &str, body: &str) -> Self {
        if let Mode::Fixture { by_token, .. } = &mut self.mode {
            by_token.insert(token.to_string(), body.to_string());
        }
        self
    }

    pub fn from_api_key(client: reqwest::Client, api_key: String) -> Self {
        Self {
            mode: Mode::Http {
                client,
                api_key,
                base_url: YOUTUBE_API_URL.to_string(),
            },
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        if let Mode::Http { base_url, .. } = &mut self.mode {
            *base_url = url.trim_end_matches('/').to_string();
        }
        self
    }

    fn parse_page(body: &str, window: &FetchWindow) -> Result<Page> {
        let parsed: PlaylistItemsResponse =
            serde_json::from_str(body).context("parsing youtube playlistItems json")?;

        let mut records = Vec::with_capacity(parsed.items.len());
        for it in parsed.items {
            let Some(video_id) = it.snippet.resource_id.video_id else {
                continue;
            };
            // Prefer the video's own publish date over the playlist insertion date.
            let published_at = it
                .content_details
                .and_then(|cd| cd.video_published_at)
                .or(it.snippet.published_at)
                .as_deref()
                .and_then(parse_rfc3339);
            // Playlists are ordered by position, not date: filter, keep paging.
            if window.is_before(published_at) {
                continue;
            }
            let title = if UNAVAILABLE_TITLES.contains(&it.snippet.title.as_str()) {
                String::new()
            } else {
                it.snippet.title
            };
            records.push(RawRecord {
                url: Some(format!("https://www.youtube.com/watch?v={video_id}")),
                local_id: video_id,
                title,
                published_at,
            });
        }

        counter!("ingest_events_total", "provider" => "youtube_playlist")
            .increment(records.len() as u64);
        let next = parsed
            .next_page_token
            .filter(|t| !t.is_empty())
            .map(PageCursor::Token);
        Ok(Page { records, next })
    }
}

#[async_trait]
impl SourceFetcher for YoutubePlaylistProvider {
    async fn fetch_page(
        &self,
        source: &SourceDescriptor,
        window: &FetchWindow,
        cursor: Option<&PageCursor>,
    ) -> Result<Page> {
        let token = match cursor {
            None => None,
            Some(PageCursor::Token(t)) => Some(t.as_str()),
            Some(PageCursor::Index(i)) => bail!("youtube pages by token, got index {i}"),
        };

        match &self.mode {
            Mode::Fixture { first, by_token } => match token {
                None => Self::parse_page(first, window),
                Some(t) => match by_token.get(t) {
                    Some(body) => Self::parse_page(body, window),
                    None => bail!("fixture has no page for token {t:?}"),
                },
            },
            Mode::Http {
                client,
                api_key,
                base_url,
            } => {
                let mut query = vec![
                    ("part", "snippet,contentDetails".to_string()),
                    ("maxResults", MAX_RESULTS.to_string()),
                    ("playlistId", source.remote_id().to_string()),
                    ("key", api_key.clone()),
                ];
                if let Some(t) = token {
                    query.push(("pageToken", t.to_string()));
                }
                let resp = client
                    .get(format!("{base_url}/playlistItems"))
                    .query(&query)
                    .send()
                    .await
                    .context("youtube playlistItems http get()")?;
                let body = read_success_body(resp, "youtube playlistItems").await?;
                Self::parse_page(&body, window)
            }
        }
    }

    fn name(&self) -> &'static str {
        "youtube_playlist"
    }
}
