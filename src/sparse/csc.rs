use std::ops::AddAssign;

use anyhow::{anyhow, bail};
use log::{debug, warn};
use nalgebra_sparse::CscMatrix;
use ndarray::{Array2, ArrayView1, ArrayView2, Zip};
use num_traits::{PrimInt, Unsigned, Zero};

use crate::{Direction, FloatOps};

use super::{
    ClrNormalize, GroupStatistics, Grouping, MatrixNonZero, MatrixSum, RowScale, RowStatistics,
};

/// Writes the stored entries into a dense `nrow × ncol` array of zeros.
pub fn to_dense<T: FloatOps>(matrix: &CscMatrix<T>) -> Array2<T> {
    let mut dense = Array2::zeros((matrix.nrows(), matrix.ncols()));
    for (row, col, &value) in matrix.triplet_iter() {
        dense[[row, col]] = value;
    }
    dense
}

fn count_as<T: FloatOps>(count: usize) -> anyhow::Result<T> {
    T::from_usize(count).ok_or_else(|| anyhow!("Failed to convert count {} to target type", count))
}

#[inline]
fn clip<T: FloatOps>(value: T, thresh: T) -> T {
    if value > thresh {
        thresh
    } else if value < -thresh {
        -thresh
    } else {
        value
    }
}

impl<M: FloatOps> MatrixNonZero for CscMatrix<M> {
    fn nonzero_col<T>(&self) -> anyhow::Result<Vec<T>>
    where
        T: PrimInt + Unsigned + Zero + AddAssign,
    {
        self.col_offsets()
            .windows(2)
            .map(|window| {
                let diff = window[1]
                    .checked_sub(window[0])
                    .ok_or_else(|| anyhow!("Subtraction overflow"))?;
                T::from(diff).ok_or_else(|| anyhow!("Failed to convert to target type"))
            })
            .collect()
    }

    fn nonzero_row<T>(&self) -> anyhow::Result<Vec<T>>
    where
        T: PrimInt + Unsigned + Zero + AddAssign,
    {
        let mut result = vec![T::zero(); self.nrows()];
        for &row_index in self.row_indices() {
            result[row_index] += T::one();
        }
        Ok(result)
    }
}

impl<M: FloatOps> MatrixSum for CscMatrix<M> {
    type Item = M;

    fn sum_row(&self) -> anyhow::Result<Vec<M>> {
        let mut result = vec![M::zero(); self.nrows()];
        for (&row, &value) in self.row_indices().iter().zip(self.values()) {
            result[row] += value;
        }
        Ok(result)
    }
}

impl<M: FloatOps> RowStatistics for CscMatrix<M> {
    type Item = M;

    fn row_means(&self) -> anyhow::Result<Vec<M>> {
        let ncols: M = count_as(self.ncols())?;
        let mut means = self.sum_row()?;
        for mean in means.iter_mut() {
            *mean /= ncols;
        }
        Ok(means)
    }

    fn row_sds(&self, means: &[M]) -> anyhow::Result<Vec<M>> {
        if means.len() != self.nrows() {
            bail!(
                "Length of means ({}) does not match number of rows ({})",
                means.len(),
                self.nrows()
            );
        }

        let mut sds = vec![M::zero(); self.nrows()];
        for (&row, &value) in self.row_indices().iter().zip(self.values()) {
            let diff = value - means[row];
            sds[row] += diff * diff;
        }

        let stored: Vec<usize> = self.nonzero_row()?;
        let denom = count_as::<M>(self.ncols())? - M::one();
        for ((sd, &mean), &nnz) in sds.iter_mut().zip(means).zip(&stored) {
            let zeros: M = count_as(self.ncols() - nnz)?;
            *sd += zeros * mean * mean;
            *sd = (*sd / denom).sqrt();
        }

        let flat = sds.iter().filter(|&&sd| sd == M::zero()).count();
        if flat > 0 {
            warn!("{} of {} rows have zero standard deviation", flat, self.nrows());
        }
        Ok(sds)
    }
}

impl<M: FloatOps> GroupStatistics for CscMatrix<M> {
    type Item = M;

    fn group_exp_mean(&self, grouping: &Grouping) -> anyhow::Result<Array2<M>> {
        grouping.ensure_columns(self.ncols())?;
        let mut result = Array2::<M>::zeros((self.nrows(), grouping.ngroups()));

        for (col, column) in self.col_iter().enumerate() {
            let group = grouping.group_of(col);
            for (&row, &value) in column.row_indices().iter().zip(column.values()) {
                result[[row, group]] += value.exp_m1();
            }
        }

        for (mut means, &size) in result.columns_mut().into_iter().zip(grouping.group_sizes()) {
            let size: M = count_as(size)?;
            means.mapv_inplace(|sum| sum / size);
        }

        debug!(
            "Computed exp means for {} rows over {} groups",
            self.nrows(),
            grouping.ngroups()
        );
        Ok(result)
    }

    fn group_log_vmr(&self, means: ArrayView2<M>, grouping: &Grouping) -> anyhow::Result<Array2<M>> {
        grouping.ensure_columns(self.ncols())?;
        let shape = (self.nrows(), grouping.ngroups());
        if means.dim() != shape {
            bail!(
                "Means matrix has shape {:?} but {:?} (rows x groups) is required",
                means.dim(),
                shape
            );
        }

        let mut result = Array2::<M>::zeros(shape);
        let mut stored = Array2::<usize>::zeros(shape);
        for (col, column) in self.col_iter().enumerate() {
            let group = grouping.group_of(col);
            for (&row, &value) in column.row_indices().iter().zip(column.values()) {
                let diff = value.exp_m1() - means[[row, group]];
                result[[row, group]] += diff * diff;
                stored[[row, group]] += 1;
            }
        }

        for (group, &size) in grouping.group_sizes().iter().enumerate() {
            let denom = count_as::<M>(size)? - M::one();
            for row in 0..self.nrows() {
                let mean = means[[row, group]];
                let zeros: M = count_as(size.saturating_sub(stored[[row, group]]))?;
                let variance = (result[[row, group]] + zeros * mean * mean) / denom;
                let vmr = (variance / mean).ln();
                result[[row, group]] = if vmr.is_nan() { M::zero() } else { vmr };
            }
        }

        Ok(result)
    }
}

impl<M: FloatOps> RowScale for CscMatrix<M> {
    type Item = M;

    fn scale_rows(&self, thresh: M) -> anyhow::Result<Array2<M>> {
        let (means, sds) = self.row_means_sds()?;
        self.scale_rows_with_stats(&means, &sds, thresh)
    }

    fn scale_rows_with_stats(&self, means: &[M], sds: &[M], thresh: M) -> anyhow::Result<Array2<M>> {
        if means.len() != self.nrows() || sds.len() != self.nrows() {
            bail!(
                "Expected {} row means and SDs, got {} and {}",
                self.nrows(),
                means.len(),
                sds.len()
            );
        }
        if !(thresh > M::zero()) {
            bail!("Clip threshold must be positive, got {}", thresh);
        }

        let mut dense = to_dense(self);
        Zip::from(dense.rows_mut())
            .and(ArrayView1::from(means))
            .and(ArrayView1::from(sds))
            .par_for_each(|mut row, &mean, &sd| {
                row.mapv_inplace(|value| clip((value - mean) / sd, thresh));
            });

        debug!(
            "Scaled {} x {} matrix with clip threshold {}",
            self.nrows(),
            self.ncols(),
            thresh
        );
        Ok(dense)
    }
}

impl<M: FloatOps> ClrNormalize for CscMatrix<M> {
    type Item = M;

    fn clr_values(&self, direction: &Direction) -> anyhow::Result<Vec<M>> {
        let values = self.values();
        let mut result = Vec::with_capacity(values.len());

        match direction {
            Direction::ROW => {
                let ncols: M = count_as(self.ncols())?;
                let mut geo_mean = vec![M::zero(); self.nrows()];
                for (&row, &value) in self.row_indices().iter().zip(values) {
                    geo_mean[row] += value.ln_1p();
                }
                for g in geo_mean.iter_mut() {
                    *g = (*g / ncols).exp();
                }

                result.extend(
                    self.row_indices()
                        .iter()
                        .zip(values)
                        .map(|(&row, &value)| (value / geo_mean[row]).ln_1p()),
                );
            }
            Direction::COLUMN => {
                let nrows: M = count_as(self.nrows())?;
                for column in self.col_iter() {
                    let log_sum: M = column.values().iter().map(|v| v.ln_1p()).sum();
                    let geo_mean = (log_sum / nrows).exp();
                    result.extend(column.values().iter().map(|&v| (v / geo_mean).ln_1p()));
                }
            }
        }

        Ok(result)
    }

    fn clr_normalize(&mut self, direction: &Direction) -> anyhow::Result<()> {
        let normalized = self.clr_values(direction)?;
        self.values_mut().copy_from_slice(&normalized);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use nalgebra_sparse::CooMatrix;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use statrs::statistics::Statistics;

    fn create_test_matrix() -> CscMatrix<f64> {
        // [1 0 2]
        // [0 0 0]
        // [3 4 0]
        // [0 5 6]
        let values = vec![1.0, 3.0, 4.0, 5.0, 2.0, 6.0];
        let row_indices = vec![0, 2, 2, 3, 0, 3];
        let col_ptrs = vec![0, 2, 4, 6];

        CscMatrix::try_from_csc_data(4, 3, col_ptrs, row_indices, values).unwrap()
    }

    fn random_matrix(nrows: usize, ncols: usize, density: f64, seed: u64) -> CscMatrix<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut coo = CooMatrix::new(nrows, ncols);
        for col in 0..ncols {
            for row in 0..nrows {
                if rng.random::<f64>() < density {
                    coo.push(row, col, rng.random_range(0.1..5.0));
                }
            }
        }
        CscMatrix::from(&coo)
    }

    #[test]
    fn test_nonzero_and_sum() {
        let matrix = create_test_matrix();
        assert_eq!(matrix.nonzero_col::<u32>().unwrap(), vec![2, 2, 2]);
        assert_eq!(matrix.nonzero_row::<usize>().unwrap(), vec![2, 0, 2, 2]);
        assert_eq!(matrix.sum_row().unwrap(), vec![3.0, 0.0, 7.0, 11.0]);

        let empty: CscMatrix<f64> = CscMatrix::zeros(0, 0);
        assert!(empty.nonzero_col::<u32>().unwrap().is_empty());
        assert!(empty.nonzero_row::<u32>().unwrap().is_empty());
    }

    #[test]
    fn test_to_dense() {
        let dense = to_dense(&create_test_matrix());
        assert_eq!(
            dense,
            ndarray::array![
                [1.0, 0.0, 2.0],
                [0.0, 0.0, 0.0],
                [3.0, 4.0, 0.0],
                [0.0, 5.0, 6.0]
            ]
        );
    }

    #[test]
    fn test_group_exp_mean_single_group() {
        // nrow=2, ncol=3, entries (0,0)=1, (1,1)=2, (0,2)=3
        let matrix =
            CscMatrix::try_from_csc_data(2, 3, vec![0, 1, 2, 3], vec![0, 1, 0], vec![1.0, 2.0, 3.0])
                .unwrap();
        let means = matrix.group_exp_mean(&Grouping::single(3)).unwrap();
        assert_eq!(means.dim(), (2, 1));
        assert_relative_eq!(means[[0, 0]], (1f64.exp_m1() + 3f64.exp_m1()) / 3.0);
        assert_relative_eq!(means[[1, 0]], 2f64.exp_m1() / 3.0);
    }

    #[test]
    fn test_group_exp_mean_matches_dense_mean() {
        let matrix = random_matrix(30, 40, 0.2, 7);
        let means = matrix.group_exp_mean(&Grouping::single(40)).unwrap();
        let dense = to_dense(&matrix).mapv(f64::exp_m1);
        for row in 0..30 {
            let expected = dense.row(row).sum() / 40.0;
            assert_relative_eq!(means[[row, 0]], expected, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_group_exp_mean_two_groups() {
        let matrix = create_test_matrix();
        let grouping = Grouping::new(vec![0, 1, 0], vec![2, 1]).unwrap();
        let means = matrix.group_exp_mean(&grouping).unwrap();
        assert_eq!(means.dim(), (4, 2));
        assert_relative_eq!(means[[0, 0]], (1f64.exp_m1() + 2f64.exp_m1()) / 2.0);
        assert_relative_eq!(means[[0, 1]], 0.0);
        assert_relative_eq!(means[[2, 0]], 3f64.exp_m1() / 2.0);
        assert_relative_eq!(means[[3, 1]], 5f64.exp_m1());
        assert_relative_eq!(means[[1, 0]], 0.0);

        let wrong = Grouping::single(4);
        assert!(matrix.group_exp_mean(&wrong).is_err());
    }

    #[test]
    fn test_group_log_vmr_matches_dense() {
        let matrix = random_matrix(12, 20, 0.4, 11);
        let grouping = Grouping::from_labels((0..20).map(|c| c % 3).collect(), 3).unwrap();
        let means = matrix.group_exp_mean(&grouping).unwrap();
        let vmr = matrix.group_log_vmr(means.view(), &grouping).unwrap();
        let dense = to_dense(&matrix).mapv(f64::exp_m1);

        for g in 0..3 {
            let cols: Vec<usize> = (0..20).filter(|c| c % 3 == g).collect();
            for row in 0..12 {
                let data: Vec<f64> = cols.iter().map(|&c| dense[[row, c]]).collect();
                let mean = data.iter().sum::<f64>() / data.len() as f64;
                if mean == 0.0 {
                    assert_eq!(vmr[[row, g]], 0.0);
                    continue;
                }
                let var = data.iter().map(|x| (x - mean).powi(2)).sum::<f64>()
                    / (data.len() as f64 - 1.0);
                assert_abs_diff_eq!(vmr[[row, g]], (var / mean).ln(), epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_group_log_vmr_zeroes_nan() {
        let matrix = create_test_matrix();
        let grouping = Grouping::single(3);
        let means = matrix.group_exp_mean(&grouping).unwrap();
        let vmr = matrix.group_log_vmr(means.view(), &grouping).unwrap();
        // Row 1 has no stored entries: 0 / 0 inside the log.
        assert_eq!(vmr[[1, 0]], 0.0);
        assert!(vmr.iter().all(|v| !v.is_nan()));

        assert!(matrix
            .group_log_vmr(Array2::zeros((4, 2)).view(), &grouping)
            .is_err());
    }

    #[test]
    fn test_group_log_vmr_keeps_inf() {
        let matrix = create_test_matrix();

        // Zero means under stored entries: positive variance over zero.
        let grouping = Grouping::single(3);
        let vmr = matrix
            .group_log_vmr(Array2::zeros((4, 1)).view(), &grouping)
            .unwrap();
        assert_eq!(vmr[[0, 0]], f64::INFINITY);
        assert_eq!(vmr[[3, 0]], f64::INFINITY);
        assert_eq!(vmr[[1, 0]], 0.0);

        // A single-column group divides by size - 1 = 0.
        let grouping = Grouping::new(vec![0, 1, 1], vec![1, 2]).unwrap();
        let mut means = matrix.group_exp_mean(&grouping).unwrap();
        let vmr = matrix.group_log_vmr(means.view(), &grouping).unwrap();
        assert_eq!(vmr[[0, 0]], 0.0);
        means[[0, 0]] = 1.0;
        means[[2, 0]] = 1.0;
        let vmr = matrix.group_log_vmr(means.view(), &grouping).unwrap();
        assert_eq!(vmr[[0, 0]], f64::INFINITY);
        assert_eq!(vmr[[2, 0]], f64::INFINITY);
        assert_eq!(vmr[[1, 0]], 0.0);
        assert!(vmr.column(1).iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_row_sds_dense_matches_sample_sd() {
        let values: Vec<f64> = (1..=12).map(|v| v as f64 * 0.7).collect();
        let matrix = CscMatrix::try_from_csc_data(
            3,
            4,
            vec![0, 3, 6, 9, 12],
            vec![0, 1, 2, 0, 1, 2, 0, 1, 2, 0, 1, 2],
            values,
        )
        .unwrap();
        let dense = to_dense(&matrix);
        let (means, sds) = matrix.row_means_sds().unwrap();

        for row in 0..3 {
            let data: Vec<f64> = dense.row(row).to_vec();
            assert_relative_eq!(means[row], data.clone().mean(), max_relative = 1e-12);
            assert_relative_eq!(sds[row], data.std_dev(), max_relative = 1e-9);
        }
    }

    #[test]
    fn test_row_sds_counts_implicit_zeros() {
        let matrix = random_matrix(25, 30, 0.15, 3);
        let dense = to_dense(&matrix);
        let means = matrix.row_means().unwrap();
        let sds = matrix.row_sds(&means).unwrap();
        for row in 0..25 {
            let data: Vec<f64> = dense.row(row).to_vec();
            assert_abs_diff_eq!(sds[row], data.std_dev(), epsilon = 1e-9);
        }
        assert!(matrix.row_sds(&means[..3]).is_err());
    }

    #[test]
    fn test_scale_rows_variants_agree() {
        let matrix = random_matrix(20, 15, 0.3, 5);
        let (means, sds) = matrix.row_means_sds().unwrap();
        let computed = matrix.scale_rows(10.0).unwrap();
        let given = matrix.scale_rows_with_stats(&means, &sds, 10.0).unwrap();
        assert_eq!(computed.dim(), (20, 15));
        for (a, b) in computed.iter().zip(given.iter()) {
            assert!(a == b || (a.is_nan() && b.is_nan()));
        }
    }

    #[test]
    fn test_scale_rows_clips() {
        let matrix = random_matrix(40, 50, 0.05, 9);
        for &thresh in &[0.5, 1.0, 2.5] {
            let scaled = matrix.scale_rows(thresh).unwrap();
            assert!(scaled
                .iter()
                .filter(|v| !v.is_nan())
                .all(|&v| (-thresh..=thresh).contains(&v)));
        }
        assert!(matrix.scale_rows(0.0).is_err());
    }

    #[test]
    fn test_scale_rows_with_stats_values() {
        let matrix = create_test_matrix();
        let scaled = matrix
            .scale_rows_with_stats(&[1.0, 0.0, 1.0, 2.0], &[2.0, 1.0, 1.0, 1.0], 2.0)
            .unwrap();
        assert_relative_eq!(scaled[[0, 0]], 0.0);
        assert_relative_eq!(scaled[[0, 1]], -0.5);
        assert_relative_eq!(scaled[[0, 2]], 0.5);
        assert_relative_eq!(scaled[[1, 1]], 0.0);
        assert_relative_eq!(scaled[[2, 0]], 2.0);
        assert_relative_eq!(scaled[[2, 1]], 2.0);
        assert_relative_eq!(scaled[[3, 0]], -2.0);
        assert_relative_eq!(scaled[[3, 2]], 2.0);

        assert!(matrix.scale_rows_with_stats(&[0.0; 3], &[1.0; 4], 1.0).is_err());
    }

    #[test]
    fn test_clr_rows() {
        let mut matrix = create_test_matrix();
        let values = matrix.clr_values(&Direction::ROW).unwrap();

        let geo_row0 = ((1f64.ln_1p() + 2f64.ln_1p()) / 3.0).exp();
        let geo_row2 = ((3f64.ln_1p() + 4f64.ln_1p()) / 3.0).exp();
        let geo_row3 = ((5f64.ln_1p() + 6f64.ln_1p()) / 3.0).exp();
        let expected = [
            (1.0 / geo_row0).ln_1p(),
            (3.0 / geo_row2).ln_1p(),
            (4.0 / geo_row2).ln_1p(),
            (5.0 / geo_row3).ln_1p(),
            (2.0 / geo_row0).ln_1p(),
            (6.0 / geo_row3).ln_1p(),
        ];
        for (v, e) in values.iter().zip(expected.iter()) {
            assert_relative_eq!(v, e, max_relative = 1e-12);
        }

        matrix.clr_normalize(&Direction::ROW).unwrap();
        assert_eq!(matrix.values(), values.as_slice());
        assert_eq!(matrix.row_indices(), &[0, 2, 2, 3, 0, 3]);
    }

    #[test]
    fn test_clr_columns() {
        let matrix = create_test_matrix();
        let values = matrix.clr_values(&Direction::COLUMN).unwrap();

        let geo_col0 = ((1f64.ln_1p() + 3f64.ln_1p()) / 4.0).exp();
        let geo_col2 = ((2f64.ln_1p() + 6f64.ln_1p()) / 4.0).exp();
        assert_relative_eq!(values[0], (1.0 / geo_col0).ln_1p(), max_relative = 1e-12);
        assert_relative_eq!(values[1], (3.0 / geo_col0).ln_1p(), max_relative = 1e-12);
        assert_relative_eq!(values[5], (6.0 / geo_col2).ln_1p(), max_relative = 1e-12);
        assert_eq!(values.len(), 6);
    }
}
