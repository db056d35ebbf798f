//! docvault Ingest — chunking, content extraction, document ingestion.

pub mod chunking;
pub mod extract;
pub mod fetch;
pub mod file;
pub mod ingest;

pub use chunking::chunk_text;
pub use extract::{ContentExtractor, ContentSource, ExtractedContent};
pub use fetch::{HttpPageFetcher, PageFetcher, TranscriptFetcher, YoutubeTranscriptFetcher};
pub use ingest::{content_hash, IngestResult, IngestSettings, IngestedUnit, Ingester, UnitFailure};
