//! Temperature-scaled soft k-means step on the unit sphere.
//!
//! Observations and centroids are columns. Each iteration computes, for every
//! observation, a softmax over `-2 (1 - cos) / sigma` across the centroids and
//! replaces the observation with the L2-normalized responsibility-weighted sum
//! of centroids. The loop runs a fixed number of iterations, so the output is
//! fully determined by `(Y, Z, max_iter, sigma)`.

use anyhow::bail;
use log::{debug, log_enabled, trace, Level};
use ndarray::{Array2, ArrayView2, Axis};
use rayon::prelude::*;

use crate::dense::cosine_normalize;
use crate::{Direction, FloatOps, NanPolicy};

pub struct SoftKMeansBuilder<T: FloatOps> {
    max_iter: usize,
    sigma: T,
    nan_policy: NanPolicy,
}

impl<T: FloatOps> SoftKMeansBuilder<T> {
    pub fn new() -> Self {
        SoftKMeansBuilder {
            max_iter: 10,
            sigma: T::from_f64(0.1).unwrap_or_else(T::one),
            nan_policy: NanPolicy::default(),
        }
    }

    /// Exact number of iterations to run.
    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Softmax temperature; smaller values give harder assignments.
    pub fn sigma(mut self, sigma: T) -> Self {
        self.sigma = sigma;
        self
    }

    pub fn nan_policy(mut self, nan_policy: NanPolicy) -> Self {
        self.nan_policy = nan_policy;
        self
    }

    pub fn build(self) -> SoftKMeans<T> {
        SoftKMeans {
            max_iter: self.max_iter,
            sigma: self.sigma,
            nan_policy: self.nan_policy,
        }
    }
}

impl<T: FloatOps> Default for SoftKMeansBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SoftKMeans<T: FloatOps> {
    max_iter: usize,
    sigma: T,
    nan_policy: NanPolicy,
}

#[derive(Debug, Clone)]
pub struct SoftKMeansResult<T> {
    /// Responsibilities, `clusters × observations`; every column sums to one.
    pub r: Array2<T>,
    /// Updated unit-norm embeddings, `dims × observations`.
    pub y: Array2<T>,
}

impl<T: FloatOps> SoftKMeans<T> {
    pub fn builder() -> SoftKMeansBuilder<T> {
        SoftKMeansBuilder::new()
    }

    pub fn max_iter(&self) -> usize {
        self.max_iter
    }

    pub fn sigma(&self) -> T {
        self.sigma
    }

    /// Runs the iteration from embeddings `y` (`dims × observations`) and
    /// centroids `z` (`dims × clusters`).
    pub fn fit(&self, y: ArrayView2<T>, z: ArrayView2<T>) -> anyhow::Result<SoftKMeansResult<T>> {
        if y.nrows() != z.nrows() {
            bail!(
                "Embeddings have {} dimensions but centroids have {}",
                y.nrows(),
                z.nrows()
            );
        }
        if z.ncols() == 0 {
            bail!("At least one centroid is required");
        }
        if self.max_iter == 0 {
            bail!("max_iter must be at least 1");
        }
        if !(self.sigma > T::zero()) {
            bail!("sigma must be positive, got {}", self.sigma);
        }

        debug!(
            "Soft k-means on {} observations x {} clusters in {} dimensions, sigma = {}, {} iterations",
            y.ncols(),
            z.ncols(),
            y.nrows(),
            self.sigma,
            self.max_iter
        );

        let mut y = cosine_normalize(y, &Direction::COLUMN);
        let z = cosine_normalize(z, &Direction::COLUMN);
        let minus_two = -(T::one() + T::one());
        let mut r = Array2::<T>::zeros((z.ncols(), y.ncols()));

        for iter in 0..self.max_iter {
            r = z.t().dot(&y);
            r.mapv_inplace(|cos| minus_two * (T::one() - cos) / self.sigma);
            softmax_columns(&mut r);
            y = cosine_normalize(z.dot(&r).view(), &Direction::COLUMN);

            if log_enabled!(Level::Trace) {
                let sharpness = r
                    .axis_iter(Axis(1))
                    .map(|col| col.iter().fold(T::zero(), |a, &b| a.max(b)))
                    .sum::<T>()
                    / T::from_usize(r.ncols().max(1)).unwrap_or_else(T::one);
                trace!("iteration {}: mean max responsibility {}", iter + 1, sharpness);
            }
        }

        self.nan_policy.check(r.iter(), "Responsibility matrix")?;
        self.nan_policy.check(y.iter(), "Updated embeddings")?;
        Ok(SoftKMeansResult { r, y })
    }
}

/// Column-wise softmax with max subtraction.
fn softmax_columns<T: FloatOps>(r: &mut Array2<T>) {
    r.axis_iter_mut(Axis(1))
        .into_par_iter()
        .for_each(|mut col| {
            let max = col.iter().fold(T::neg_infinity(), |a, &b| a.max(b));
            col.mapv_inplace(|d| (d - max).exp());
            let total = col.sum();
            col.mapv_inplace(|p| p / total);
        });
}

/// One-shot form of [`SoftKMeans::fit`].
pub fn soft_kmeans<T: FloatOps>(
    y: ArrayView2<T>,
    z: ArrayView2<T>,
    max_iter: usize,
    sigma: T,
) -> anyhow::Result<SoftKMeansResult<T>> {
    SoftKMeans::builder()
        .max_iter(max_iter)
        .sigma(sigma)
        .build()
        .fit(y, z)
}
