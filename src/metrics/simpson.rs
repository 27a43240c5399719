use anyhow::{anyhow, bail};
use log::{debug, warn};
use ndarray::{Array1, ArrayView1, ArrayView2};
use rayon::prelude::*;

use crate::FloatOps;

/// Calibration of the neighbour weights used by [`simpson_index`].
#[derive(Debug, Clone, Copy)]
pub struct SimpsonConfig {
    /// Effective number of neighbours each observation should weigh.
    pub perplexity: f64,
    /// Accepted gap between the entropy and `ln(perplexity)`.
    pub tolerance: f64,
    /// Bisection steps before settling for the current precision.
    pub max_tries: usize,
}

impl Default for SimpsonConfig {
    fn default() -> Self {
        Self {
            perplexity: 15.0,
            tolerance: 1e-5,
            max_tries: 50,
        }
    }
}

/// Simpson's index of batch labels in every observation's kNN neighbourhood.
///
/// `distances` and `knn_idx` are `k × n`: column `i` holds the distances to,
/// and indices of, the `k` neighbours of observation `i`. Neighbours are
/// weighted by `exp(-d * beta)` with `beta` tuned so that the weight entropy
/// matches `ln(perplexity)`; the index is the sum over batches of the squared
/// batch weight. Its inverse is the LISI score. Observations whose weights
/// collapse (entropy exactly zero) get `-1`.
pub fn simpson_index<T: FloatOps>(
    distances: ArrayView2<T>,
    knn_idx: ArrayView2<usize>,
    batch_labels: &[usize],
    n_batches: usize,
    config: &SimpsonConfig,
) -> anyhow::Result<Array1<T>> {
    if distances.dim() != knn_idx.dim() {
        bail!(
            "Distance matrix {:?} and neighbour index matrix {:?} differ in shape",
            distances.dim(),
            knn_idx.dim()
        );
    }
    if let Some(&bad) = knn_idx.iter().find(|&&j| j >= batch_labels.len()) {
        bail!(
            "Neighbour index {} out of range for {} labelled observations",
            bad,
            batch_labels.len()
        );
    }
    if let Some(&bad) = batch_labels.iter().find(|&&b| b >= n_batches) {
        bail!("Batch label {} out of range for {} batches", bad, n_batches);
    }
    if !(config.perplexity > 0.0) {
        bail!("Perplexity must be positive, got {}", config.perplexity);
    }

    let to_t = |v: f64| T::from_f64(v).ok_or_else(|| anyhow!("Failed to convert {} to target type", v));
    let log_u = to_t(config.perplexity.ln())?;
    let tol = to_t(config.tolerance)?;

    let n = distances.ncols();
    debug!(
        "Simpson index for {} observations with {} neighbours, perplexity {}",
        n,
        distances.nrows(),
        config.perplexity
    );

    let scores: Vec<T> = (0..n)
        .into_par_iter()
        .map(|i| {
            let weights = calibrated_weights(distances.column(i), log_u, tol, config.max_tries);
            match weights {
                None => -T::one(),
                Some(p) => {
                    let mut mass = vec![T::zero(); n_batches];
                    for (&j, &w) in knn_idx.column(i).iter().zip(&p) {
                        mass[batch_labels[j]] += w;
                    }
                    mass.iter().map(|&m| m * m).sum()
                }
            }
        })
        .collect();

    let collapsed = scores.iter().filter(|&&s| s < T::zero()).count();
    if collapsed > 0 {
        warn!("{} observations have degenerate neighbour weights", collapsed);
    }
    Ok(Array1::from(scores))
}

/// Entropy of the normalized Gaussian weights at precision `beta`, leaving the
/// weights in `p`. Zero total weight yields zero entropy and zero weights.
fn entropy<T: FloatOps>(d: ArrayView1<T>, beta: T, p: &mut Vec<T>) -> T {
    p.clear();
    p.extend(d.iter().map(|&x| (-x * beta).exp()));
    let total: T = p.iter().copied().sum();
    if total == T::zero() {
        p.iter_mut().for_each(|w| *w = T::zero());
        return T::zero();
    }
    let weighted: T = d.iter().zip(p.iter()).map(|(&x, &w)| x * w).sum();
    p.iter_mut().for_each(|w| *w /= total);
    total.ln() + beta * weighted / total
}

fn calibrated_weights<T: FloatOps>(d: ArrayView1<T>, log_u: T, tol: T, max_tries: usize) -> Option<Vec<T>> {
    let two = T::one() + T::one();
    let mut p = Vec::with_capacity(d.len());
    let mut beta = T::one();
    let mut beta_min = T::neg_infinity();
    let mut beta_max = T::infinity();

    let mut h = entropy(d, beta, &mut p);
    let mut diff = h - log_u;
    let mut tries = 0;
    while diff.abs() > tol && tries < max_tries {
        if diff > T::zero() {
            beta_min = beta;
            beta = if beta_max.is_finite() { (beta + beta_max) / two } else { beta * two };
        } else {
            beta_max = beta;
            beta = if beta_min.is_finite() { (beta + beta_min) / two } else { beta / two };
        }
        h = entropy(d, beta, &mut p);
        diff = h - log_u;
        tries += 1;
    }

    if h == T::zero() {
        None
    } else {
        Some(p)
    }
}
