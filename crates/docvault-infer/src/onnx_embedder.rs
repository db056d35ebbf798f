//! ONNX-based embedding engine for sentence-transformers models.
//!
//! Loads `model.onnx` and `tokenizer.json` (all-MiniLM-L6-v2 by default,
//! 384 dimensions) and mean-pools token embeddings under the attention
//! mask. Requires the `onnx` feature.

#[cfg(feature = "onnx")]
mod inner {
    use std::path::Path;

    use ndarray::Array1;
    use ort::session::Session;
    use ort::value::Tensor;
    use parking_lot::Mutex;
    use tokenizers::Tokenizer;
    use tracing::info;

    use crate::embedder::{l2_normalize, truncate_chars, EmbedderBackend};
    use docvault_core::{Error, Result};

    /// Maximum sequence length for the model.
    const MAX_SEQ_LEN: usize = 512;

    fn infer_err(context: &str, e: impl std::fmt::Display) -> Error {
        Error::Inference(format!("{}: {}", context, e))
    }

    pub struct OnnxEmbedder {
        session: Mutex<Session>,
        tokenizer: Tokenizer,
        dimension: usize,
        max_input_chars: usize,
    }

    impl OnnxEmbedder {
        /// Load the model and tokenizer from `model_dir`.
        pub fn load(model_dir: &Path, dimension: usize, max_input_chars: usize) -> Result<Self> {
            let model_path = model_dir.join("model.onnx");
            let tokenizer_path = model_dir.join("tokenizer.json");

            if !model_path.exists() {
                return Err(Error::Inference(format!("Model not found: {}", model_path.display())));
            }
            if !tokenizer_path.exists() {
                return Err(Error::Inference(format!(
                    "Tokenizer not found: {}",
                    tokenizer_path.display()
                )));
            }

            // With load-dynamic, ORT_DYLIB_PATH must point to libonnxruntime.
            ort::init().commit();

            let session = Session::builder()
                .map_err(|e| infer_err("Failed to create session builder", e))?
                .with_intra_threads(2)
                .map_err(|e| infer_err("Failed to set threads", e))?
                .commit_from_file(&model_path)
                .map_err(|e| infer_err("Failed to load ONNX model", e))?;

            let tokenizer = Tokenizer::from_file(&tokenizer_path)
                .map_err(|e| infer_err("Failed to load tokenizer", e))?;

            info!("ONNX embedder loaded: dim={}, model={}", dimension, model_path.display());

            Ok(Self {
                session: Mutex::new(session),
                tokenizer,
                dimension,
                max_input_chars,
            })
        }

        fn infer(&self, text: &str) -> Result<Array1<f32>> {
            let encoding = self
                .tokenizer
                .encode(text, true)
                .map_err(|e| infer_err("Tokenization failed", e))?;

            let seq_len = encoding.get_ids().len().min(MAX_SEQ_LEN);
            let input_ids = &encoding.get_ids()[..seq_len];
            let attention_mask = &encoding.get_attention_mask()[..seq_len];

            let ids_data: Vec<i64> = input_ids.iter().map(|&id| id as i64).collect();
            let mask_data: Vec<i64> = attention_mask.iter().map(|&m| m as i64).collect();
            let type_ids_data: Vec<i64> = vec![0i64; seq_len];

            let ids_tensor = Tensor::from_array(([1usize, seq_len], ids_data))
                .map_err(|e| infer_err("Failed to create ids tensor", e))?;
            let mask_tensor = Tensor::from_array(([1usize, seq_len], mask_data))
                .map_err(|e| infer_err("Failed to create mask tensor", e))?;
            let type_ids_tensor = Tensor::from_array(([1usize, seq_len], type_ids_data))
                .map_err(|e| infer_err("Failed to create type_ids tensor", e))?;

            let mut session = self.session.lock();
            let outputs = session
                .run(ort::inputs![ids_tensor, mask_tensor, type_ids_tensor])
                .map_err(|e| infer_err("ONNX inference failed", e))?;

            // Either [1, seq_len, dim] token embeddings or an already pooled [1, dim].
            let (shape, data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| infer_err("Failed to extract output tensor", e))?;
            let shape_dims: Vec<i64> = shape.iter().copied().collect();

            match shape_dims.len() {
                3 => {
                    let dim = shape_dims[2] as usize;
                    let mask_sum: f32 = attention_mask.iter().map(|&m| m as f32).sum();
                    if mask_sum < 1e-9 {
                        return Ok(Array1::zeros(dim));
                    }
                    let mut pooled = Array1::<f32>::zeros(dim);
                    for (i, &m) in attention_mask.iter().enumerate() {
                        if m > 0 {
                            let offset = i * dim;
                            for d in 0..dim {
                                pooled[d] += data[offset + d];
                            }
                        }
                    }
                    Ok(pooled / mask_sum)
                }
                2 => {
                    let dim = shape_dims[1] as usize;
                    Ok(Array1::from_vec(data[..dim].to_vec()))
                }
                _ => Err(Error::Inference(format!("Unexpected output shape: {:?}", shape_dims))),
            }
        }
    }

    impl EmbedderBackend for OnnxEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let embedding = self.infer(truncate_chars(text, self.max_input_chars))?;
            if embedding.len() != self.dimension {
                return Err(Error::Inference(format!(
                    "Model produced {} dimensions, expected {}",
                    embedding.len(),
                    self.dimension
                )));
            }
            Ok(l2_normalize(embedding).to_vec())
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn name(&self) -> &str {
            "onnx"
        }
    }
}

#[cfg(feature = "onnx")]
pub use inner::OnnxEmbedder;
