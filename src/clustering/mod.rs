//! Soft clustering used by Harmony-style integration: an annealed soft k-means
//! step over cosine-normalized embeddings and a post-hoc merge of clusters
//! whose responsibility profiles are redundant.

mod merge;
mod soft_kmeans;

pub use merge::{
    equivalence_classes, merge_redundant_clusters, merge_redundant_clusters_by, sum_classes,
    MergeConfig, MergeMode,
};
pub use soft_kmeans::{soft_kmeans, SoftKMeans, SoftKMeansBuilder, SoftKMeansResult};
