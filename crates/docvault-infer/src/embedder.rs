//! Embedding backend trait and shared vector helpers.
//!
//! Implementations:
//! - `HashingEmbedder`: local feature hashing, no model files
//! - `HttpEmbedder`: remote feature-extraction endpoint
//! - `OnnxEmbedder`: ONNX Runtime with all-MiniLM-L6-v2 (requires the `onnx` feature)
//!
//! Every backend is deterministic for a given input and silently truncates
//! inputs past its length limit.

use ndarray::Array1;

use docvault_core::Result;

/// Trait for embedding backends.
pub trait EmbedderBackend: Send + Sync {
    /// Embed one text.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts, keeping input order.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Length of every vector this backend returns.
    fn dimension(&self) -> usize;

    /// Short label for logs.
    fn name(&self) -> &str;
}

/// Cut `text` to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Scale to unit length. Zero vectors are returned unchanged.
pub fn l2_normalize(embedding: Array1<f32>) -> Array1<f32> {
    let norm = embedding.dot(&embedding).sqrt();
    if norm < 1e-9 {
        embedding
    } else {
        embedding / norm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_truncate_on_char_boundary() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }

    #[test]
    fn test_normalize() {
        let v = l2_normalize(array![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(l2_normalize(array![0.0, 0.0]), array![0.0, 0.0]);
    }
}
