use ndarray::{Array2, ArrayView1, ArrayView2};

use crate::FloatOps;

pub trait SimilarityMeasure {
    fn calculate<T: FloatOps>(&self, a: ArrayView1<T>, b: ArrayView1<T>) -> T;
}

/// Cosine of the angle between two vectors, zero if either vector is zero.
pub struct CosineSimilarity;

impl SimilarityMeasure for CosineSimilarity {
    fn calculate<T: FloatOps>(&self, a: ArrayView1<T>, b: ArrayView1<T>) -> T {
        let mut dot_product = T::zero();
        let mut norm_a = T::zero();
        let mut norm_b = T::zero();

        for (&x, &y) in a.iter().zip(b.iter()) {
            dot_product += x * y;
            norm_a += x * x;
            norm_b += y * y;
        }

        let norm_product = (norm_a * norm_b).sqrt();
        if norm_product > T::epsilon() {
            dot_product / norm_product
        } else {
            T::zero()
        }
    }
}

/// Pearson correlation coefficient.
///
/// Undefined for a constant vector, in which case `NaN` is returned so that no
/// threshold comparison can succeed.
pub struct PearsonSimilarity;

impl SimilarityMeasure for PearsonSimilarity {
    fn calculate<T: FloatOps>(&self, a: ArrayView1<T>, b: ArrayView1<T>) -> T {
        let n = match T::from_usize(a.len()) {
            Some(n) if a.len() > 1 => n,
            _ => return T::nan(),
        };
        let mean_a = a.sum() / n;
        let mean_b = b.sum() / n;

        let mut cov = T::zero();
        let mut var_a = T::zero();
        let mut var_b = T::zero();
        for (&x, &y) in a.iter().zip(b.iter()) {
            let dx = x - mean_a;
            let dy = y - mean_b;
            cov += dx * dy;
            var_a += dx * dx;
            var_b += dy * dy;
        }

        let denominator = (var_a * var_b).sqrt();
        if denominator > T::zero() {
            cov / denominator
        } else {
            T::nan()
        }
    }
}

/// Symmetric `nrow × nrow` matrix of pairwise similarities between the rows of `matrix`.
pub fn row_similarities<T, S>(matrix: ArrayView2<T>, measure: &S) -> Array2<T>
where
    T: FloatOps,
    S: SimilarityMeasure,
{
    let k = matrix.nrows();
    let mut result = Array2::<T>::zeros((k, k));
    for i in 0..k {
        result[[i, i]] = measure.calculate(matrix.row(i), matrix.row(i));
        for j in (i + 1)..k {
            let s = measure.calculate(matrix.row(i), matrix.row(j));
            result[[i, j]] = s;
            result[[j, i]] = s;
        }
    }
    result
}

/// Pearson correlation between every pair of rows.
pub fn row_correlations<T: FloatOps>(matrix: ArrayView2<T>) -> Array2<T> {
    row_similarities(matrix, &PearsonSimilarity)
}
