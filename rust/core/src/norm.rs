//! Normalization helpers shared by model structures and evaluators.

use ndarray::{Array1, Array2, ArrayView2, Axis};

/// Epsilon added to variances before taking the square root.
pub const NORM_EPSILON: f32 = 1e-3;

/// Per-feature mean and (population) variance of a batch.
#[must_use]
pub fn batch_statistics(x: &ArrayView2<'_, f32>) -> (Array1<f32>, Array1<f32>) {
    let cols = x.ncols();
    let mean = x
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(cols));
    let mut var = Array1::zeros(cols);
    if x.nrows() > 0 {
        for row in x.rows() {
            for (j, &v) in row.iter().enumerate() {
                let d = v - mean[j];
                var[j] += d * d;
            }
        }
        var /= x.nrows() as f32;
    }
    (mean, var)
}

/// Normalize each feature column with the given statistics.
#[must_use]
pub fn normalize(x: &ArrayView2<'_, f32>, mean: &Array1<f32>, var: &Array1<f32>) -> Array2<f32> {
    let mut out = x.to_owned();
    for mut row in out.rows_mut() {
        for (j, v) in row.iter_mut().enumerate() {
            *v = (*v - mean[j]) / (var[j] + NORM_EPSILON).sqrt();
        }
    }
    out
}

/// Scale each row to unit L2 norm. Rows with (near-)zero norm are left as is.
#[must_use]
pub fn unit_norm_rows(x: &ArrayView2<'_, f32>) -> Array2<f32> {
    let mut out = x.to_owned();
    for mut row in out.rows_mut() {
        let norm = row.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            row.mapv_inplace(|v| v / norm);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn test_batch_statistics() {
        let x = array![[1.0_f32, 0.0], [3.0, 0.0]];
        let (mean, var) = batch_statistics(&x.view());
        assert_eq!(mean, array![2.0, 0.0]);
        assert_eq!(var, array![1.0, 0.0]);
    }

    #[test]
    fn test_normalize_centers_batch() {
        let x = array![[1.0_f32, 5.0], [3.0, 5.0]];
        let (mean, var) = batch_statistics(&x.view());
        let normed = normalize(&x.view(), &mean, &var);
        let (new_mean, _) = batch_statistics(&normed.view());
        assert!(new_mean.iter().all(|m| m.abs() < 1e-5));
    }

    #[test]
    fn test_unit_norm_rows() {
        let x = array![[3.0_f32, 4.0], [0.0, 0.0]];
        let normed = unit_norm_rows(&x.view());
        let n0 = normed.row(0).iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((n0 - 1.0).abs() < 1e-6);
        // Zero row untouched, no NaN.
        assert_eq!(normed.row(1).to_vec(), vec![0.0, 0.0]);
    }
}
