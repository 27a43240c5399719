use std::collections::HashMap;

use anyhow::bail;

use crate::BatchIdentifier;

/// Assignment of every column to one of `ngroups` disjoint groups (batches).
///
/// Invariant: `group_sizes[g]` equals the number of columns labelled `g`, so
/// the sizes sum to the number of columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grouping {
    groups: Vec<usize>,
    group_sizes: Vec<usize>,
}

impl Grouping {
    /// Builds a grouping from column labels and the caller's per-group counts,
    /// rejecting labels outside `0..group_sizes.len()` and counts that disagree
    /// with the labels.
    pub fn new(groups: Vec<usize>, group_sizes: Vec<usize>) -> anyhow::Result<Self> {
        let ngroups = group_sizes.len();
        let mut counts = vec![0usize; ngroups];
        for (col, &g) in groups.iter().enumerate() {
            if g >= ngroups {
                bail!(
                    "Column {} is assigned to group {} but only {} groups exist",
                    col,
                    g,
                    ngroups
                );
            }
            counts[g] += 1;
        }

        if let Some(g) = (0..ngroups).find(|&g| counts[g] != group_sizes[g]) {
            bail!(
                "Group {} has {} columns but its size is given as {}",
                g,
                counts[g],
                group_sizes[g]
            );
        }

        Ok(Self {
            groups,
            group_sizes,
        })
    }

    /// Counts group sizes from the labels. Groups without columns get size zero.
    pub fn from_labels(groups: Vec<usize>, ngroups: usize) -> anyhow::Result<Self> {
        let mut group_sizes = vec![0usize; ngroups];
        for (col, &g) in groups.iter().enumerate() {
            if g >= ngroups {
                bail!(
                    "Column {} is assigned to group {} but only {} groups exist",
                    col,
                    g,
                    ngroups
                );
            }
            group_sizes[g] += 1;
        }
        Ok(Self {
            groups,
            group_sizes,
        })
    }

    /// Numbers arbitrary batch identifiers in order of first appearance.
    pub fn from_batches<B: BatchIdentifier>(batches: &[B]) -> Self {
        let mut ids: HashMap<&B, usize> = HashMap::new();
        let mut groups = Vec::with_capacity(batches.len());
        let mut group_sizes = Vec::new();
        for batch in batches {
            let next = ids.len();
            let g = *ids.entry(batch).or_insert(next);
            if g == group_sizes.len() {
                group_sizes.push(0);
            }
            group_sizes[g] += 1;
            groups.push(g);
        }
        Self {
            groups,
            group_sizes,
        }
    }

    /// Every column in group 0.
    pub fn single(ncols: usize) -> Self {
        Self {
            groups: vec![0; ncols],
            group_sizes: vec![ncols],
        }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn ngroups(&self) -> usize {
        self.group_sizes.len()
    }

    pub fn groups(&self) -> &[usize] {
        &self.groups
    }

    pub fn group_sizes(&self) -> &[usize] {
        &self.group_sizes
    }

    #[inline]
    pub fn group_of(&self, col: usize) -> usize {
        self.groups[col]
    }

    pub(crate) fn ensure_columns(&self, ncols: usize) -> anyhow::Result<()> {
        if self.groups.len() != ncols {
            bail!(
                "Grouping covers {} columns but the matrix has {}",
                self.groups.len(),
                ncols
            );
        }
        Ok(())
    }
}
