//! Content extraction: turn any [`ContentSource`] into raw bytes to store and index.
//!
//! This is the only place that branches on the kind of source. Everything
//! downstream (hashing, dedup, decoding, chunking) works on
//! [`ExtractedContent`].

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::fetch::{HttpPageFetcher, PageFetcher, TranscriptFetcher, YoutubeTranscriptFetcher};
use crate::file;
use docvault_core::{Error, Result};

/// One unit of content submitted for ingestion.
#[derive(Debug, Clone)]
pub enum ContentSource {
    /// An uploaded file; the extension must be on the allow-list.
    File { name: String, bytes: Vec<u8> },
    /// A web page whose visible text is indexed.
    HtmlUrl(String),
    /// A YouTube video whose transcript is indexed.
    VideoUrl(String),
}

impl ContentSource {
    pub fn file(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self::File {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// How the unit is reported back: file name or URL.
    pub fn label(&self) -> &str {
        match self {
            Self::File { name, .. } => name,
            Self::HtmlUrl(url) | Self::VideoUrl(url) => url,
        }
    }
}

/// Raw bytes ready for hashing and storage.
#[derive(Debug, Clone)]
pub struct ExtractedContent {
    /// Document name recorded in the store.
    pub name: String,
    /// Extension of the stored file, with the dot.
    pub extension: String,
    pub bytes: Vec<u8>,
}

/// Dispatches each source kind to its extraction routine.
pub struct ContentExtractor {
    pages: Arc<dyn PageFetcher>,
    transcripts: Arc<dyn TranscriptFetcher>,
    transcript_langs: Vec<String>,
}

impl ContentExtractor {
    pub fn new(pages: Arc<dyn PageFetcher>, transcripts: Arc<dyn TranscriptFetcher>) -> Self {
        Self {
            pages,
            transcripts,
            transcript_langs: vec!["en".to_string()],
        }
    }

    /// Extractor backed by plain HTTP fetches.
    pub fn with_defaults() -> Self {
        Self::new(
            Arc::new(HttpPageFetcher::new()),
            Arc::new(YoutubeTranscriptFetcher::default()),
        )
    }

    pub fn with_transcript_langs(mut self, langs: Vec<String>) -> Self {
        self.transcript_langs = langs;
        self
    }

    pub fn extract(&self, source: &ContentSource) -> Result<ExtractedContent> {
        match source {
            ContentSource::File { name, bytes } => {
                file::check_allowed(name)?;
                Ok(ExtractedContent {
                    name: name.clone(),
                    extension: file::file_extension(name),
                    bytes: bytes.clone(),
                })
            }
            ContentSource::HtmlUrl(url) => {
                check_http_url(url)?;
                let html = self.pages.fetch_html(url)?;
                let text = html_to_text(&html);
                if text.is_empty() {
                    return Err(Error::Extraction(format!("No text found at {}", url)));
                }
                debug!("Extracted {} chars of text from {}", text.len(), url);
                Ok(text_content(url, text))
            }
            ContentSource::VideoUrl(url) => {
                let video_id = youtube_video_id(url).ok_or_else(|| {
                    Error::UnsupportedContent(format!("Youtube url {} is invalid", url))
                })?;
                let text = self
                    .transcripts
                    .fetch_transcript(&video_id, &self.transcript_langs)
                    .map_err(|e| match e {
                        Error::Extraction(msg) => Error::Extraction(format!(
                            "{}: Youtube url {} video has disabled transcriptions",
                            msg, url
                        )),
                        other => other,
                    })?;
                Ok(text_content(url, text))
            }
        }
    }
}

fn text_content(url: &str, text: String) -> ExtractedContent {
    ExtractedContent {
        name: url.to_string(),
        extension: ".txt".to_string(),
        bytes: text.into_bytes(),
    }
}

fn check_http_url(url: &str) -> Result<()> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| Error::UnsupportedContent(format!("Invalid url {}: {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(Error::UnsupportedContent(format!(
            "Unsupported url scheme {} in {}",
            other, url
        ))),
    }
}

static YT_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:https?://)?(?:www\.|m\.)?youtu(?:\.be/|be\.com/(?:watch\?v=|embed/|v/|shorts/|user/(?:\S+/)?(?:UC)?))([^&=\n%?/ ]{11})",
    )
    .unwrap()
});

/// The 11-character video id of a YouTube URL.
pub fn youtube_video_id(url: &str) -> Option<String> {
    YT_URL.captures(url.trim()).map(|c| c[1].to_string())
}

static DROP_BLOCKS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<!--.*?-->|<script\b.*?</script\s*>|<style\b.*?</style\s*>|<noscript\b.*?</noscript\s*>|<head\b.*?</head\s*>").unwrap()
});
static BLOCK_BREAK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<br\s*/?>|</?(?:p|div|h[1-6]|li|tr|section|article|header|footer|blockquote|pre)\b[^>]*>").unwrap()
});
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static ENTITY: Lazy<Regex> = Lazy::new(|| Regex::new(r"&(#x[0-9a-fA-F]+|#[0-9]+|[a-zA-Z]+);").unwrap());

/// Decode the common named and all numeric HTML entities.
pub fn decode_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |c: &regex::Captures<'_>| {
            let entity = &c[1];
            let decoded = if let Some(hex) = entity.strip_prefix("#x") {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = entity.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                match entity {
                    "amp" => Some('&'),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "nbsp" => Some(' '),
                    _ => None,
                }
            };
            decoded.map_or_else(|| c[0].to_string(), String::from)
        })
        .into_owned()
}

/// Visible text of an HTML document, one block per line.
pub fn html_to_text(html: &str) -> String {
    let without_blocks = DROP_BLOCKS.replace_all(html, " ");
    let with_breaks = BLOCK_BREAK.replace_all(&without_blocks, "\n");
    let stripped = TAG.replace_all(&with_breaks, " ");
    let decoded = decode_entities(&stripped);

    decoded
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
