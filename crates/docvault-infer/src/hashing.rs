//! Local feature-hashing embedder.
//!
//! Lowercased word unigrams and bigrams are hashed (FNV-1a) into a fixed
//! number of buckets with a sign bit, then L2-normalized. Texts that share
//! vocabulary land close together under inner product. Not semantic, but
//! deterministic and free of model files.

use ndarray::Array1;

use crate::embedder::{l2_normalize, truncate_chars, EmbedderBackend};
use docvault_core::Result;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;

fn fnv1a(parts: &[&str]) -> u64 {
    let mut hash = FNV_OFFSET;
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hash ^= u64::from(b' ');
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        for byte in part.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
    }
    hash
}

#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dim: usize,
    max_input_chars: usize,
}

impl HashingEmbedder {
    pub fn new(dim: usize, max_input_chars: usize) -> Self {
        Self { dim, max_input_chars }
    }

    fn add(&self, v: &mut Array1<f32>, parts: &[&str], weight: f32) {
        let h = fnv1a(parts);
        let bucket = (h % self.dim as u64) as usize;
        let sign = if (h >> 63) & 1 == 1 { -1.0 } else { 1.0 };
        v[bucket] += sign * weight;
    }
}

impl EmbedderBackend for HashingEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let text = truncate_chars(text, self.max_input_chars).to_lowercase();
        let tokens: Vec<&str> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();

        let mut v = Array1::<f32>::zeros(self.dim);
        for token in &tokens {
            self.add(&mut v, &[*token], 1.0);
        }
        for pair in tokens.windows(2) {
            self.add(&mut v, &[pair[0], pair[1]], 0.5);
        }
        Ok(l2_normalize(v).to_vec())
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn name(&self) -> &str {
        "hashing"
    }
}
