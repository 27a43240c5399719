use log::warn;
use ndarray::{Array2, ArrayView2, Axis};
use rayon::prelude::*;

use crate::{Direction, FloatOps};

/// In-place L2 (cosine) normalization of every row or every column.
///
/// Lanes whose norm is zero are left untouched, all other lanes end up with
/// unit norm. Non-finite inputs propagate.
pub trait CosineNormalize {
    /// Returns the number of all-zero lanes that could not be normalized.
    fn cosine_normalize_inplace(&mut self, direction: &Direction) -> usize;
}

impl<T: FloatOps> CosineNormalize for Array2<T> {
    fn cosine_normalize_inplace(&mut self, direction: &Direction) -> usize {
        let axis = match direction {
            Direction::ROW => Axis(0),
            Direction::COLUMN => Axis(1),
        };

        self.axis_iter_mut(axis)
            .into_par_iter()
            .map(|mut lane| {
                let norm = lane.iter().map(|&x| x * x).sum::<T>().sqrt();
                if norm == T::zero() {
                    true
                } else {
                    lane.mapv_inplace(|x| x / norm);
                    false
                }
            })
            .filter(|&degenerate| degenerate)
            .count()
    }
}

/// Copying variant of [`CosineNormalize::cosine_normalize_inplace`].
pub fn cosine_normalize<T: FloatOps>(matrix: ArrayView2<T>, direction: &Direction) -> Array2<T> {
    let mut normalized = matrix.to_owned();
    let zero_lanes = normalized.cosine_normalize_inplace(direction);
    if zero_lanes > 0 {
        warn!(
            "{} all-zero {:?} vectors left unnormalized",
            zero_lanes, direction
        );
    }
    normalized
}
