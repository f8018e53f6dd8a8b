//! k-nearest-neighbour search over document embeddings.
//!
//! Similarity is cosine throughout. Every embedding is L2-normalized before
//! it goes into an index, so an inner product is a cosine.

use anyhow::{bail, Result};
use serde::Serialize;
use tracing::info;

use crate::config::{IndexBackend, ReprintConfig};
use crate::TARGET_INDEX;

pub mod exact;
pub mod forest;
pub mod similarity;

pub use exact::ExactIndex;
pub use forest::AngularForest;
pub use similarity::{angular_distance, cosine_from_angular, dot, normalize};

/// One search hit: the neighbour's position in the indexed slice and its
/// cosine similarity to the query item.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Neighbor {
    pub index: usize,
    pub similarity: f32,
}

/// A k-NN index over a fixed set of items.
pub trait SimilarityIndex {
    fn backend(&self) -> IndexBackend;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Up to `k` most similar items to `item`, best first, never `item` itself.
    fn neighbors(&self, item: usize, k: usize) -> Vec<Neighbor>;
}

/// Builds the index chosen by `config.backend`.
///
/// An empty embedding set yields an empty index rather than an error.
pub fn build_index(
    embeddings: &[Vec<f32>],
    config: &ReprintConfig,
) -> Result<Box<dyn SimilarityIndex>> {
    if let Some(first) = embeddings.first() {
        let dim = first.len();
        if let Some(bad) = embeddings.iter().position(|v| v.len() != dim) {
            bail!(
                "Vector dimensions don't match: item 0 has {}, item {} has {}",
                dim,
                bad,
                embeddings[bad].len()
            );
        }
    }

    let index: Box<dyn SimilarityIndex> = match config.backend {
        IndexBackend::Exact => Box::new(ExactIndex::new(embeddings)),
        IndexBackend::Forest => Box::new(AngularForest::build(
            embeddings,
            config.forest_trees,
            (config.neighbors + 1).max(forest::MIN_LEAF_SIZE),
            config.forest_seed,
        )),
    };
    info!(
        target: TARGET_INDEX,
        "Built {} index over {} embeddings",
        index.backend(),
        index.len()
    );
    Ok(index)
}

/// Runs `neighbors(i, k)` for every indexed item.
pub fn search_all(index: &dyn SimilarityIndex, k: usize) -> Vec<Vec<Neighbor>> {
    (0..index.len()).map(|i| index.neighbors(i, k)).collect()
}

/// Orders hits best first with a stable tie-break on index, then keeps `k`.
pub(crate) fn rank_neighbors(mut hits: Vec<Neighbor>, k: usize) -> Vec<Neighbor> {
    hits.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| a.index.cmp(&b.index))
    });
    hits.truncate(k);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embeddings() -> Vec<Vec<f32>> {
        vec![
            vec![1.0, 0.0, 0.0],
            vec![0.9, 0.1, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.0, 1.0],
            vec![0.0, 0.0, 0.0],
        ]
    }

    #[test]
    fn test_backends_agree_on_small_sets() {
        let mut config = ReprintConfig::default();
        let exact = build_index(&embeddings(), &config).unwrap();
        config.backend = IndexBackend::Forest;
        let forest = build_index(&embeddings(), &config).unwrap();

        for i in 0..exact.len() {
            let a = exact.neighbors(i, 3);
            let b = forest.neighbors(i, 3);
            assert_eq!(a.len(), b.len());
            for (x, y) in a.iter().zip(b.iter()) {
                assert_eq!(x.index, y.index);
                assert!((x.similarity - y.similarity).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_empty_input_gives_empty_index() {
        let index = build_index(&[], &ReprintConfig::default()).unwrap();
        assert!(index.is_empty());
        assert!(search_all(index.as_ref(), 50).is_empty());
    }

    #[test]
    fn test_mixed_dimensions_rejected() {
        let vectors = vec![vec![1.0, 0.0], vec![1.0]];
        assert!(build_index(&vectors, &ReprintConfig::default()).is_err());
    }
}
