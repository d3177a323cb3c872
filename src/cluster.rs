//! Greedy threshold clustering.
//!
//! Each pass takes the lowest remaining id as a seed, pulls every remaining
//! image scoring below the threshold against it out of a working copy of
//! the store, and emits seed plus matches as one cluster. Images join the
//! first cluster whose seed accepts them, so the partition depends on seed
//! order and is not the transitive closure of the similarity relation.

use log::debug;

use crate::index::SimilarityIndex;
use crate::weights::SketchMode;

pub struct ClusterBuilder<'a> {
    index: &'a SimilarityIndex,
    mode: SketchMode,
}

impl<'a> ClusterBuilder<'a> {
    pub fn new(index: &'a SimilarityIndex) -> ClusterBuilder<'a> {
        ClusterBuilder {
            index,
            mode: SketchMode::Photo,
        }
    }

    pub fn mode(mut self, mode: SketchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Partition the index into clusters of mutually similar images.
    /// Images that match nothing but themselves are left out. With `fast`
    /// only the channel averages are compared.
    pub fn build(&self, threshold: f64, fast: bool) -> Vec<Vec<i64>> {
        let mut working = self.index.signatures();
        let mut clusters = Vec::new();

        while working.len() > 1 {
            let seed = match working.values().next() {
                Some(sig) => sig.clone(),
                None => break,
            };
            let matches = if fast {
                SimilarityIndex::query_by_threshold_average_only(&mut working, &seed, threshold, self.mode)
            } else {
                self.index
                    .query_by_threshold(&mut working, &seed, threshold, self.mode)
            };
            working.remove(&seed.id);

            let mut cluster: Vec<i64> = matches.into_iter().filter(|&id| id != seed.id).collect();
            if cluster.is_empty() {
                continue;
            }
            cluster.insert(0, seed.id);
            clusters.push(cluster);
        }

        debug!(
            "Clustered {} images into {} groups at threshold {}",
            self.index.len(),
            clusters.len(),
            threshold
        );
        clusters
    }
}

impl SimilarityIndex {
    pub fn cluster_by_similarity(&self, threshold: f64, fast: bool) -> Vec<Vec<i64>> {
        ClusterBuilder::new(self).build(threshold, fast)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::tests::synthetic;
    use std::collections::HashSet;

    fn index_with(d_id: i64) -> SimilarityIndex {
        let mut index = SimilarityIndex::new();
        for id in 1..=3 {
            index.insert(synthetic(id, [1000, 1000, 1000], [0.5, 0.0, 0.0])).unwrap();
        }
        index.insert(synthetic(d_id, [5000, 5000, 5000], [0.1, 0.2, 0.3])).unwrap();
        index
    }

    fn as_set(cluster: &[i64]) -> HashSet<i64> {
        cluster.iter().copied().collect()
    }

    #[test]
    fn test_similar_images_form_one_cluster() {
        for &d_id in &[0, 4] {
            let clusters = index_with(d_id).cluster_by_similarity(-10.0, false);
            assert_eq!(clusters.len(), 1, "outlier id {}", d_id);
            assert_eq!(as_set(&clusters[0]), [1, 2, 3].iter().copied().collect());
            assert_eq!(clusters[0][0], 1);
        }
    }

    #[test]
    fn test_fast_mode_uses_averages() {
        let clusters = index_with(4).cluster_by_similarity(1.0, true);
        assert_eq!(clusters.len(), 1);
        assert_eq!(as_set(&clusters[0]), [1, 2, 3].iter().copied().collect());
    }

    #[test]
    fn test_nothing_similar_yields_no_clusters() {
        let mut index = SimilarityIndex::new();
        index.insert(synthetic(1, [1000, 1000, 1000], [0.5, 0.0, 0.0])).unwrap();
        index.insert(synthetic(2, [5000, 5000, 5000], [0.1, 0.2, 0.3])).unwrap();
        assert!(index.cluster_by_similarity(-10.0, false).is_empty());
        assert!(SimilarityIndex::new().cluster_by_similarity(-10.0, false).is_empty());
    }

    #[test]
    fn test_clustering_leaves_index_untouched() {
        let index = index_with(4);
        let before = index.signatures();
        let clusters = ClusterBuilder::new(&index)
            .mode(SketchMode::Sketch)
            .build(-10.0, false);
        assert_eq!(clusters.len(), 1);
        assert_eq!(index.signatures(), before);
    }
}
