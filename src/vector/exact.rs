use super::similarity::{dot, normalize};
use super::{rank_neighbors, Neighbor, SimilarityIndex};
use crate::config::IndexBackend;

/// Brute-force inner-product index. Exact, `O(n)` per query.
pub struct ExactIndex {
    vectors: Vec<Vec<f32>>,
}

impl ExactIndex {
    pub fn new(embeddings: &[Vec<f32>]) -> Self {
        Self {
            vectors: embeddings.iter().map(|v| normalize(v)).collect(),
        }
    }
}

impl SimilarityIndex for ExactIndex {
    fn backend(&self) -> IndexBackend {
        IndexBackend::Exact
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn neighbors(&self, item: usize, k: usize) -> Vec<Neighbor> {
        let Some(query) = self.vectors.get(item) else {
            return Vec::new();
        };
        let hits = self
            .vectors
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != item)
            .map(|(j, v)| Neighbor {
                index: j,
                similarity: dot(query, v),
            })
            .collect();
        rank_neighbors(hits, k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excludes_self_and_orders_by_similarity() {
        let index = ExactIndex::new(&[
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![1.0, 1.0],
            vec![2.0, 0.1],
        ]);
        let hits = index.neighbors(0, 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].index, 3);
        assert_eq!(hits[1].index, 2);
        assert!(hits.iter().all(|n| n.index != 0));
        assert!((hits[1].similarity - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-5);
    }

    #[test]
    fn test_k_larger_than_set() {
        let index = ExactIndex::new(&[vec![1.0], vec![1.0]]);
        assert_eq!(index.neighbors(0, 50).len(), 1);
        assert!(index.neighbors(7, 5).is_empty());
    }

    #[test]
    fn test_scale_invariance() {
        let index = ExactIndex::new(&[vec![1.0, 2.0], vec![10.0, 20.0]]);
        assert!((index.neighbors(0, 1)[0].similarity - 1.0).abs() < 1e-6);
    }
}
