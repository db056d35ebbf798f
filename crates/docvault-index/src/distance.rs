//! Distance computation over a loaded partition matrix.
//!
//! Every metric is expressed as a distance where smaller is closer:
//! `IP` → `1 - dot`, `COSINE` → `1 - cos`, `L2` → Euclidean distance.

use ndarray::{Array1, ArrayView1, ArrayView2};

use docvault_core::MetricType;

/// L2 norm of each matrix row.
pub fn row_norms(matrix: ArrayView2<'_, f32>) -> Array1<f32> {
    matrix.rows().into_iter().map(|row| row.dot(&row).sqrt()).collect()
}

/// Distances from `query` to every row of `matrix`.
pub fn distances(
    metric: MetricType,
    matrix: ArrayView2<'_, f32>,
    norms: ArrayView1<'_, f32>,
    query: ArrayView1<'_, f32>,
) -> Array1<f32> {
    // (N, dim) @ (dim,) → (N,)
    let dots = matrix.dot(&query);
    match metric {
        MetricType::Ip => dots.mapv(|d| 1.0 - d),
        MetricType::Cosine => {
            let q_norm = query.dot(&query).sqrt();
            let mut out = dots;
            for (d, &n) in out.iter_mut().zip(norms.iter()) {
                let denom = n * q_norm;
                *d = if denom < 1e-9 { 1.0 } else { 1.0 - *d / denom };
            }
            out
        }
        MetricType::L2 => {
            let q_sq = query.dot(&query);
            let mut out = dots;
            for (d, &n) in out.iter_mut().zip(norms.iter()) {
                *d = (n * n + q_sq - 2.0 * *d).max(0.0).sqrt();
            }
            out
        }
    }
}

/// Little-endian f32 blob encoding used for stored embeddings.
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn decode_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    fn compute(metric: MetricType, matrix: &Array2<f32>, query: &Array1<f32>) -> Array1<f32> {
        let norms = row_norms(matrix.view());
        distances(metric, matrix.view(), norms.view(), query.view())
    }

    #[test]
    fn test_inner_product_distance() {
        let m = array![[1.0, 0.0], [0.0, 1.0]];
        let d = compute(MetricType::Ip, &m, &array![1.0, 0.0]);
        assert!((d[0] - 0.0).abs() < 1e-6);
        assert!((d[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_ignores_magnitude() {
        let m = array![[3.0, 0.0], [0.0, 0.0]];
        let d = compute(MetricType::Cosine, &m, &array![2.0, 0.0]);
        assert!(d[0].abs() < 1e-6);
        // Zero rows are as far as orthogonal ones.
        assert!((d[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance() {
        let m = array![[0.0, 0.0], [3.0, 4.0]];
        let d = compute(MetricType::L2, &m, &array![0.0, 0.0]);
        assert!(d[0].abs() < 1e-6);
        assert!((d[1] - 5.0).abs() < 1e-5);
    }

    #[test]
    fn test_blob_encoding() {
        let v = vec![0.25f32, -1.5, 3.0];
        assert_eq!(decode_vector(&encode_vector(&v)), v);
    }
}
