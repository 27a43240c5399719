use std::ops::AddAssign;

use ndarray::{Array2, ArrayView2};
use num_traits::{PrimInt, Unsigned, Zero};

use crate::Direction;

pub mod csc;
mod grouping;
mod parts;

pub use csc::to_dense;
pub use grouping::Grouping;
pub use parts::CscParts;

pub trait MatrixNonZero {
    fn nonzero_col<T>(&self) -> anyhow::Result<Vec<T>>
    where
        T: PrimInt + Unsigned + Zero + AddAssign;

    fn nonzero_row<T>(&self) -> anyhow::Result<Vec<T>>
    where
        T: PrimInt + Unsigned + Zero + AddAssign;
}

pub trait MatrixSum {
    type Item;

    /// Sum of the stored entries of every row.
    fn sum_row(&self) -> anyhow::Result<Vec<Self::Item>>;
}

/// Row moments in which every unstored entry counts as an exact zero.
pub trait RowStatistics {
    type Item;

    /// Row sums divided by the number of columns.
    fn row_means(&self) -> anyhow::Result<Vec<Self::Item>>;

    /// Sample (Bessel-corrected) standard deviation of every row around the given means.
    ///
    /// The squared deviations of the stored entries are accumulated first; each
    /// row then receives `(ncol - stored) * mean²` for its implicit zeros before
    /// dividing by `ncol - 1`.
    fn row_sds(&self, means: &[Self::Item]) -> anyhow::Result<Vec<Self::Item>>;

    fn row_means_sds(&self) -> anyhow::Result<(Vec<Self::Item>, Vec<Self::Item>)> {
        let means = self.row_means()?;
        let sds = self.row_sds(&means)?;
        Ok((means, sds))
    }
}

/// Per-row statistics within column groups (batches) of log-scale expression data.
pub trait GroupStatistics {
    type Item;

    /// Mean of `expm1(x)` for every row within every group, returned as an
    /// `nrow × ngroups` matrix. Implicit zeros add nothing to the sum but count
    /// towards the group size in the denominator.
    fn group_exp_mean(&self, grouping: &Grouping) -> anyhow::Result<Array2<Self::Item>>;

    /// `log(variance / mean)` of `expm1(x)` for every row within every group.
    ///
    /// `means` must be the `nrow × ngroups` output of [`GroupStatistics::group_exp_mean`].
    /// Any `NaN` in the result is replaced with zero; infinities are kept.
    fn group_log_vmr(
        &self,
        means: ArrayView2<Self::Item>,
        grouping: &Grouping,
    ) -> anyhow::Result<Array2<Self::Item>>;
}

/// Densifying z-score of rows, clipped to `[-thresh, thresh]`.
pub trait RowScale {
    type Item;

    fn scale_rows(&self, thresh: Self::Item) -> anyhow::Result<Array2<Self::Item>>;

    fn scale_rows_with_stats(
        &self,
        means: &[Self::Item],
        sds: &[Self::Item],
        thresh: Self::Item,
    ) -> anyhow::Result<Array2<Self::Item>>;
}

/// Centered log-ratio style normalization against the geometric mean of each row or column.
///
/// The geometric mean of an axis is `exp(sum(log1p(x)) / n)` where `n` is the
/// full axis length, so implicit zeros lower it without being stored. Every
/// stored value `x` becomes `log1p(x / geometric_mean)`; the sparsity pattern
/// is unchanged.
pub trait ClrNormalize {
    type Item;

    fn clr_values(&self, direction: &Direction) -> anyhow::Result<Vec<Self::Item>>;

    fn clr_normalize(&mut self, direction: &Direction) -> anyhow::Result<()>;
}
