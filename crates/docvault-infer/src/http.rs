//! Remote feature-extraction embedder.
//!
//! Posts `{"inputs": text}` to a Hugging Face style endpoint. Accepted
//! response shapes: a flat vector, a token matrix (mean-pooled here), or an
//! object carrying an `embedding` field as returned by a self-hosted
//! sentence-transformers server.

use std::time::Duration;

use ndarray::Array1;
use once_cell::sync::OnceCell;
use serde_json::Value;
use tracing::debug;

use crate::embedder::{l2_normalize, truncate_chars, EmbedderBackend};
use docvault_core::{Error, Result};

pub struct HttpEmbedder {
    endpoint: String,
    api_token: Option<String>,
    dim: usize,
    max_input_chars: usize,
    /// Built on first use: a blocking client must not be created on an async runtime thread.
    client: OnceCell<reqwest::blocking::Client>,
}

impl HttpEmbedder {
    pub fn new(endpoint: &str, api_token: Option<String>, dim: usize, max_input_chars: usize) -> Result<Self> {
        reqwest::Url::parse(endpoint)
            .map_err(|e| Error::Config(format!("invalid embedding endpoint {}: {}", endpoint, e)))?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            api_token,
            dim,
            max_input_chars,
            client: OnceCell::new(),
        })
    }

    fn client(&self) -> Result<&reqwest::blocking::Client> {
        self.client.get_or_try_init(|| {
            reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .map_err(|e| Error::Inference(format!("Failed to build HTTP client: {}", e)))
        })
    }
}

fn as_vector(value: &Value) -> Option<Vec<f32>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

/// Pull one embedding out of the endpoint's JSON response.
pub fn parse_embedding(body: &Value) -> Result<Vec<f32>> {
    let bad = || Error::Inference("Unrecognized embedding response format".to_string());

    let value = match body.get("embedding") {
        Some(inner) => inner,
        None => body,
    };

    if let Some(flat) = as_vector(value).filter(|v| !v.is_empty()) {
        return Ok(flat);
    }

    // Nested: [[...]] (one pooled vector) or [[tok], [tok], ...] / [[[tok], ...]].
    let mut rows = value.as_array().ok_or_else(bad)?;
    if rows.len() == 1 && rows[0].get(0).map_or(false, Value::is_array) {
        rows = rows[0].as_array().ok_or_else(bad)?;
    }
    let tokens: Vec<Vec<f32>> = rows.iter().map(as_vector).collect::<Option<_>>().ok_or_else(bad)?;
    let dim = tokens.first().map(Vec::len).ok_or_else(bad)?;
    if tokens.iter().any(|t| t.len() != dim) {
        return Err(bad());
    }

    let mut pooled = Array1::<f32>::zeros(dim);
    for t in &tokens {
        pooled += &Array1::from_vec(t.clone());
    }
    Ok((pooled / tokens.len() as f32).to_vec())
}

impl EmbedderBackend for HttpEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let text = truncate_chars(text, self.max_input_chars);
        let mut request = self
            .client()?
            .post(&self.endpoint)
            .json(&serde_json::json!({ "inputs": text }));
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .map_err(|e| Error::Inference(format!("Embedding request failed: {}", e)))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(Error::Inference(format!(
                "Embedding endpoint returned {}: {}",
                status, body
            )));
        }
        let body: Value = response
            .json()
            .map_err(|e| Error::Inference(format!("Failed to parse embedding response: {}", e)))?;

        let embedding = parse_embedding(&body)?;
        if embedding.len() != self.dim {
            return Err(Error::Inference(format!(
                "Endpoint returned {} dimensions, expected {}",
                embedding.len(),
                self.dim
            )));
        }
        debug!("Embedded {} chars via {}", text.len(), self.endpoint);
        Ok(l2_normalize(Array1::from_vec(embedding)).to_vec())
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn name(&self) -> &str {
        "http"
    }
}
