use anyhow::bail;
use log::{debug, trace};
use ndarray::{Array2, ArrayView2};
use petgraph::unionfind::UnionFind;

use crate::similarity::{row_similarities, PearsonSimilarity, SimilarityMeasure};
use crate::FloatOps;

/// How pairs of correlated clusters are combined into equivalence classes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MergeMode {
    /// Disjoint-set union over all correlated pairs; chains such as
    /// `a ~ b`, `b ~ c` always end up in one class.
    #[default]
    Transitive,
    /// Single sweep over pairs `(i, j)`, `i < j`, relabelling both to the
    /// smaller of their current labels. Order dependent and may leave chains
    /// split; kept for parity with existing results.
    SinglePass,
}

#[derive(Debug, Clone, Copy)]
pub struct MergeConfig<T> {
    /// Pairs whose correlation is strictly greater than this are merged.
    pub threshold: T,
    pub mode: MergeMode,
}

impl<T: FloatOps> Default for MergeConfig<T> {
    fn default() -> Self {
        Self {
            threshold: T::from_f64(0.8).unwrap_or_else(T::one),
            mode: MergeMode::default(),
        }
    }
}

/// Assigns every cluster the label of its equivalence class, where a class is
/// labelled by its smallest member index.
pub fn equivalence_classes<T: FloatOps>(
    similarities: ArrayView2<T>,
    threshold: T,
    mode: MergeMode,
) -> anyhow::Result<Vec<usize>> {
    if similarities.nrows() != similarities.ncols() {
        bail!(
            "Similarity matrix must be square, got {:?}",
            similarities.dim()
        );
    }
    let k = similarities.nrows();
    let classes = match mode {
        MergeMode::SinglePass => {
            let mut classes: Vec<usize> = (0..k).collect();
            for i in 0..k.saturating_sub(1) {
                for j in (i + 1)..k {
                    if similarities[[i, j]] > threshold {
                        let label = classes[i].min(classes[j]);
                        trace!("merging clusters {} and {} into class {}", i, j, label);
                        classes[i] = label;
                        classes[j] = label;
                    }
                }
            }
            classes
        }
        MergeMode::Transitive => {
            let mut sets = UnionFind::<usize>::new(k);
            for i in 0..k.saturating_sub(1) {
                for j in (i + 1)..k {
                    if similarities[[i, j]] > threshold && sets.union(i, j) {
                        trace!("joined clusters {} and {}", i, j);
                    }
                }
            }

            let mut smallest = vec![usize::MAX; k];
            let roots: Vec<usize> = (0..k).map(|i| sets.find_mut(i)).collect();
            for (i, &root) in roots.iter().enumerate() {
                smallest[root] = smallest[root].min(i);
            }
            roots.iter().map(|&root| smallest[root]).collect()
        }
    };
    Ok(classes)
}

/// Sums the rows of `r` (`clusters × observations`) that fall into the same
/// equivalence class. Output rows follow the sorted class labels.
pub fn sum_classes<T: FloatOps>(r: ArrayView2<T>, classes: &[usize]) -> anyhow::Result<Array2<T>> {
    if classes.len() != r.nrows() {
        bail!(
            "{} class labels given for {} clusters",
            classes.len(),
            r.nrows()
        );
    }

    let mut labels = classes.to_vec();
    labels.sort_unstable();
    labels.dedup();

    let mut merged = Array2::<T>::zeros((labels.len(), r.ncols()));
    for (cluster, label) in classes.iter().enumerate() {
        let Ok(target) = labels.binary_search(label) else {
            bail!("Class label {} disappeared while merging", label);
        };
        let mut row = merged.row_mut(target);
        row += &r.row(cluster);
    }
    Ok(merged)
}

/// Merges clusters whose responsibility profiles correlate above the threshold.
pub fn merge_redundant_clusters<T: FloatOps>(
    r: ArrayView2<T>,
    config: &MergeConfig<T>,
) -> anyhow::Result<Array2<T>> {
    merge_redundant_clusters_by(r, config, &PearsonSimilarity)
}

/// [`merge_redundant_clusters`] with a caller-chosen similarity between cluster rows.
pub fn merge_redundant_clusters_by<T, S>(
    r: ArrayView2<T>,
    config: &MergeConfig<T>,
    measure: &S,
) -> anyhow::Result<Array2<T>>
where
    T: FloatOps,
    S: SimilarityMeasure,
{
    if config.threshold.is_nan() {
        bail!("Merge threshold must not be NaN");
    }

    let similarities = row_similarities(r, measure);
    let classes = equivalence_classes(similarities.view(), config.threshold, config.mode)?;
    let merged = sum_classes(r, &classes)?;

    debug!(
        "Merged {} clusters into {} ({:?}, threshold {})",
        r.nrows(),
        merged.nrows(),
        config.mode,
        config.threshold
    );
    Ok(merged)
}
