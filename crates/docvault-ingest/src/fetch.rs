//! Remote content fetchers.
//!
//! The ingestion pipeline only sees the traits; the reqwest-backed defaults
//! can be swapped for stubs in tests or for a headless-browser fetcher.

use std::time::Duration;

use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use tracing::debug;

use crate::extract::decode_entities;
use docvault_core::{Error, Result};

/// Fetches the HTML of a web page.
pub trait PageFetcher: Send + Sync {
    fn fetch_html(&self, url: &str) -> Result<String>;
}

/// Fetches the plain-text transcript of a video, trying `langs` in order.
pub trait TranscriptFetcher: Send + Sync {
    fn fetch_transcript(&self, video_id: &str, langs: &[String]) -> Result<String>;
}

const USER_AGENT: &str = concat!("docvault/", env!("CARGO_PKG_VERSION"));

/// Lazily built so constructing a fetcher on an async runtime thread is safe.
fn client(cell: &OnceCell<reqwest::blocking::Client>) -> Result<&reqwest::blocking::Client> {
    cell.get_or_try_init(|| {
        reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::Extraction(format!("Failed to build HTTP client: {}", e)))
    })
}

fn get_text(client: &reqwest::blocking::Client, url: &str) -> Result<String> {
    let response = client
        .get(url)
        .send()
        .map_err(|e| Error::Extraction(format!("Failed to fetch {}: {}", url, e)))?;
    if !response.status().is_success() {
        return Err(Error::Extraction(format!(
            "Fetching {} returned {}",
            url,
            response.status()
        )));
    }
    response
        .text()
        .map_err(|e| Error::Extraction(format!("Failed to read body of {}: {}", url, e)))
}

/// Plain HTTP GET page fetcher.
#[derive(Default)]
pub struct HttpPageFetcher {
    client: OnceCell<reqwest::blocking::Client>,
}

impl HttpPageFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PageFetcher for HttpPageFetcher {
    fn fetch_html(&self, url: &str) -> Result<String> {
        let html = get_text(client(&self.client)?, url)?;
        debug!("Fetched {} bytes of HTML from {}", html.len(), url);
        Ok(html)
    }
}

static TIMEDTEXT_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<text[^>]*>(.*?)</text>").unwrap());

/// Parse a timedtext XML document into one line per caption.
pub fn parse_timedtext(xml: &str) -> String {
    TIMEDTEXT_LINE
        .captures_iter(xml)
        .map(|c| decode_entities(c[1].trim()).replace('\n', " "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Transcript fetcher using YouTube's timedtext endpoint.
pub struct YoutubeTranscriptFetcher {
    base_url: String,
    client: OnceCell<reqwest::blocking::Client>,
}

impl Default for YoutubeTranscriptFetcher {
    fn default() -> Self {
        Self::new("https://www.youtube.com/api/timedtext")
    }
}

impl YoutubeTranscriptFetcher {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            client: OnceCell::new(),
        }
    }
}

impl TranscriptFetcher for YoutubeTranscriptFetcher {
    fn fetch_transcript(&self, video_id: &str, langs: &[String]) -> Result<String> {
        let client = client(&self.client)?;
        for lang in langs {
            let url = format!("{}?lang={}&v={}", self.base_url, lang, video_id);
            let xml = get_text(client, &url)?;
            let text = parse_timedtext(&xml);
            if !text.is_empty() {
                debug!("Fetched {} transcript for video {}", lang, video_id);
                return Ok(text);
            }
        }
        Err(Error::Extraction(format!(
            "Youtube video {} has no transcript in {:?}",
            video_id, langs
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timedtext() {
        let xml = r#"<?xml version="1.0" encoding="utf-8" ?><transcript>
            <text start="0.5" dur="2.1">Hello &amp; welcome</text>
            <text start="2.6" dur="1.0">to the
show</text>
            <text start="3.6" dur="1.0"> </text>
        </transcript>"#;
        assert_eq!(parse_timedtext(xml), "Hello & welcome\nto the show");
    }

    #[test]
    fn test_parse_timedtext_empty() {
        assert_eq!(parse_timedtext(""), "");
    }
}
