//! docvault Infer — embedding backends.
//!
//! Provides the `EmbedderBackend` trait and its implementations. The
//! backend is chosen from configuration at startup; the `onnx` backend is
//! only available when the crate is built with the `onnx` feature.

pub mod cache;
pub mod embedder;
pub mod hashing;
pub mod http;
pub mod onnx_embedder;

pub use cache::CachedEmbedder;
pub use embedder::{l2_normalize, truncate_chars, EmbedderBackend};
pub use hashing::HashingEmbedder;
pub use http::HttpEmbedder;

#[cfg(feature = "onnx")]
pub use onnx_embedder::OnnxEmbedder;

use std::sync::Arc;

use docvault_core::{EmbedderKind, EmbedderSettings, Error, Result};

/// Build the configured embedder producing `dim`-length vectors.
pub fn create_embedder(settings: &EmbedderSettings, dim: usize) -> Result<Arc<dyn EmbedderBackend>> {
    let embedder: Arc<dyn EmbedderBackend> = match settings.kind {
        EmbedderKind::Hashing => Arc::new(HashingEmbedder::new(dim, settings.max_input_chars)),
        EmbedderKind::Http => {
            let url = settings
                .api_url
                .as_deref()
                .ok_or_else(|| Error::Config("HF_API_URL is required for the http embedder".into()))?;
            Arc::new(HttpEmbedder::new(
                url,
                settings.api_token.clone(),
                dim,
                settings.max_input_chars,
            )?)
        }
        EmbedderKind::Onnx => create_onnx(settings, dim)?,
    };
    tracing::info!("Using {} embedder (dim={})", embedder.name(), embedder.dimension());
    Ok(embedder)
}

#[cfg(feature = "onnx")]
fn create_onnx(settings: &EmbedderSettings, dim: usize) -> Result<Arc<dyn EmbedderBackend>> {
    Ok(Arc::new(OnnxEmbedder::load(
        &settings.model_dir,
        dim,
        settings.max_input_chars,
    )?))
}

#[cfg(not(feature = "onnx"))]
fn create_onnx(_settings: &EmbedderSettings, _dim: usize) -> Result<Arc<dyn EmbedderBackend>> {
    Err(Error::Config(
        "the onnx embedder requires building with the `onnx` feature".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn settings(kind: EmbedderKind) -> EmbedderSettings {
        EmbedderSettings {
            kind,
            api_url: None,
            api_token: None,
            model_dir: PathBuf::from("/nonexistent"),
            max_input_chars: 2048,
        }
    }

    #[test]
    fn test_hashing_backend() {
        let e = create_embedder(&settings(EmbedderKind::Hashing), 16).unwrap();
        assert_eq!(e.dimension(), 16);
        assert_eq!(e.name(), "hashing");
    }

    #[test]
    fn test_http_backend_needs_url() {
        let err = create_embedder(&settings(EmbedderKind::Http), 16).err().unwrap();
        assert!(matches!(err, Error::Config(_)));

        let mut s = settings(EmbedderKind::Http);
        s.api_url = Some("http://127.0.0.1:9/embed".into());
        assert_eq!(create_embedder(&s, 16).unwrap().name(), "http");
    }

    #[test]
    fn test_onnx_backend_fails_without_model() {
        assert!(create_embedder(&settings(EmbedderKind::Onnx), 384).is_err());
    }
}
