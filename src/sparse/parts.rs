use anyhow::{anyhow, bail};
use log::debug;
use nalgebra_sparse::CscMatrix;
use ndarray::{Array2, ArrayView2};

use crate::{Direction, FloatOps};

use super::{ClrNormalize, GroupStatistics, Grouping, RowScale, RowStatistics};

/// Borrowed compressed-sparse-column triple as handed over by a host runtime
/// (e.g. the `x`, `p` and `i` slots of a `dgCMatrix`).
///
/// Every operation validates the triple before computing, so inconsistent
/// column pointers, out-of-range row indices and unsorted or duplicated rows
/// within a column surface as errors instead of undefined results.
#[derive(Debug, Clone, Copy)]
pub struct CscParts<'a, T> {
    pub values: &'a [T],
    pub col_ptr: &'a [usize],
    pub row_idx: &'a [usize],
    pub nrow: usize,
    pub ncol: usize,
}

impl<'a, T: FloatOps> CscParts<'a, T> {
    pub fn new(
        values: &'a [T],
        col_ptr: &'a [usize],
        row_idx: &'a [usize],
        nrow: usize,
        ncol: usize,
    ) -> Self {
        Self {
            values,
            col_ptr,
            row_idx,
            nrow,
            ncol,
        }
    }

    pub fn to_matrix(&self) -> anyhow::Result<CscMatrix<T>> {
        if self.values.len() != self.row_idx.len() {
            bail!(
                "{} values but {} row indices",
                self.values.len(),
                self.row_idx.len()
            );
        }
        let matrix = CscMatrix::try_from_csc_data(
            self.nrow,
            self.ncol,
            self.col_ptr.to_vec(),
            self.row_idx.to_vec(),
            self.values.to_vec(),
        )
        .map_err(|e| anyhow!("Invalid CSC data for a {} x {} matrix: {}", self.nrow, self.ncol, e))?;
        debug!(
            "Validated {} x {} CSC matrix with {} stored entries",
            self.nrow,
            self.ncol,
            matrix.nnz()
        );
        Ok(matrix)
    }

    /// `nrow × ngroups` means of `expm1(x)`, see [`GroupStatistics::group_exp_mean`].
    pub fn exp_mean(&self, grouping: &Grouping) -> anyhow::Result<Array2<T>> {
        self.to_matrix()?.group_exp_mean(grouping)
    }

    pub fn log_vmr(&self, means: ArrayView2<T>, grouping: &Grouping) -> anyhow::Result<Array2<T>> {
        self.to_matrix()?.group_log_vmr(means, grouping)
    }

    /// CLR-normalized values in the order of `values`; the pattern is unchanged.
    pub fn normalize_clr(&self, direction: &Direction) -> anyhow::Result<Vec<T>> {
        self.to_matrix()?.clr_values(direction)
    }

    pub fn scale_rows(&self, thresh: T) -> anyhow::Result<Array2<T>> {
        self.to_matrix()?.scale_rows(thresh)
    }

    pub fn scale_rows_with_stats(
        &self,
        means: &[T],
        sds: &[T],
        thresh: T,
    ) -> anyhow::Result<Array2<T>> {
        self.to_matrix()?.scale_rows_with_stats(means, sds, thresh)
    }

    pub fn row_sds(&self, means: &[T]) -> anyhow::Result<Vec<T>> {
        self.to_matrix()?.row_sds(means)
    }
}
