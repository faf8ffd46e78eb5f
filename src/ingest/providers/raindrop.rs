// src/ingest/providers/raindrop.rs
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use metrics::counter;
use serde::Deserialize;

use super::{parse_rfc3339, read_success_body};
use crate::ingest::types::{
    FetchWindow, Page, PageCursor, RawRecord, SourceDescriptor, SourceFetcher,
};

const RAINDROP_API_URL: &str = "https://api.raindrop.io/rest/v1";
pub const PER_PAGE: u32 = 50;

#[derive(Debug, Deserialize)]
struct RaindropPage {
    #[serde(default)]
    result: bool,
    #[serde(default)]
    items: Vec<Raindrop>,
    #[serde(default, rename = "errorMessage")]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Raindrop {
    #[serde(rename = "_id")]
    id: i64,
    #[serde(default)]
    title: String,
    link: Option<String>,
    created: Option<String>,
}

/// Bookmark collections from Raindrop.io, newest first, paged by index.
pub struct RaindropProvider {
    mode: Mode,
}

enum Mode {
    /// Page bodies by page index.
    Fixture(Vec<String>),
    Http {
        client: reqwest::Client,
        token: String,
        base_url: String,
    },
}

impl RaindropProvider {
    pub fn from_fixture_pages<S: AsRef<str>>(pages: &[S]) -> Self {
        Self {
            mode: Mode::Fixture(pages.iter().map(|p| p.as_ref().to_string()).collect()),
        }
    }

    pub fn from_token(client: reqwest::Client, token: String) -> Self {
        Self {
            mode: Mode::Http {
                client,
                token,
                base_url: RAINDROP_API_URL.to_string(),
            },
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        if let Mode::Http { base_url, .. } = &mut self.mode {
            *base_url = url.trim_end_matches('/').to_string();
        }
        self
    }

    fn parse_page(body: &str, page: u32, window: &FetchWindow) -> Result<Page> {
        let parsed: RaindropPage =
            serde_json::from_str(body).context("parsing raindrop page json")?;
        if !parsed.result {
            bail!(
                "raindrop api returned result=false: {}",
                parsed.error_message.unwrap_or_default()
            );
        }

        let full_page = parsed.items.len() as u32 >= PER_PAGE;
        let mut reached_window_start = false;
        let mut records = Vec::with_capacity(parsed.items.len());
        for it in parsed.items {
            let published_at = it.created.as_deref().and_then(parse_rfc3339);
            if window.is_before(published_at) {
                // sorted newest first: everything after this is older too
                reached_window_start = true;
                continue;
            }
            records.push(RawRecord {
                local_id: it.id.to_string(),
                title: it.title,
                url: it.link,
                published_at,
            });
        }

        counter!("ingest_events_total", "provider" => "raindrop").increment(records.len() as u64);
        let next = (full_page && !reached_window_start).then_some(PageCursor::Index(page + 1));
        Ok(Page { records, next })
    }
}

#[async_trait]
impl SourceFetcher for RaindropProvider {
    async fn fetch_page(
        &self,
        source: &SourceDescriptor,
        window: &FetchWindow,
        cursor: Option<&PageCursor>,
    ) -> Result<Page> {
        let page = match cursor {
            None => 0,
            Some(PageCursor::Index(i)) => *i,
            Some(PageCursor::Token(t)) => bail!("raindrop pages by index, got token {t:?}"),
        };

        match &self.mode {
            Mode::Fixture(pages) => match pages.get(page as usize) {
                Some(body) => Self::parse_page(body, page, window),
                None => Ok(Page::default()),
            },
            Mode::Http {
                client,
                token,
                base_url,
            } => {
                let url = format!("{base_url}/raindrops/{}", source.remote_id());
                let resp = client
                    .get(&url)
                    .bearer_auth(token)
                    .query(&[
                        ("page", page.to_string()),
                        ("perpage", PER_PAGE.to_string()),
                        ("sort", "-created".to_string()),
                    ])
                    .send()
                    .await
                    .context("raindrop http get()")?;
                let body = read_success_body(resp, "raindrop").await?;
                Self::parse_page(&body, page, window)
            }
        }
    }

    fn name(&self) -> &'static str {
        "raindrop"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn body(n: usize, start_id: i64, created: &str) -> String {
        let items: Vec<String> = (0..n)
            .map(|i| {
                format!(
                    r#"{{"_id": {}, "title": "Bookmark {}", "link": "https://example.com/{}", "created": "{}"}}"#,
                    start_id + i as i64,
                    i,
                    i,
                    created
                )
            })
            .collect();
        format!(r#"{{"result": true, "items": [{}]}}"#, items.join(","))
    }

    #[test]
    fn full_page_requests_the_next_index() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let w = FetchWindow::lookback(now, 0);
        let full = body(PER_PAGE as usize, 1, "2025-05-30T10:00:00.000Z");
        let p = RaindropProvider::parse_page(&full, 0, &w).unwrap();
        assert_eq!(p.records.len(), PER_PAGE as usize);
        assert_eq!(p.next, Some(PageCursor::Index(1)));

        let short = body(3, 100, "2025-05-30T10:00:00.000Z");
        let p = RaindropProvider::parse_page(&short, 1, &w).unwrap();
        assert_eq!(p.next, None);
        assert_eq!(p.records[0].local_id, "100");
    }

    #[test]
    fn items_older_than_window_stop_pagination() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let w = FetchWindow::lookback(now, 3);
        let old = body(PER_PAGE as usize, 1, "2025-01-01T00:00:00Z");
        let p = RaindropProvider::parse_page(&old, 0, &w).unwrap();
        assert!(p.records.is_empty());
        assert_eq!(p.next, None);
    }

    #[test]
    fn result_false_is_an_error() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let w = FetchWindow::lookback(now, 0);
        let err = RaindropProvider::parse_page(
            r#"{"result": false, "errorMessage": "Collection not found"}"#,
            0,
            &w,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Collection not found"));
    }
}
