use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use tracing::debug;

use super::similarity::{angular_distance, cosine_from_angular, dot, normalize};
use super::{rank_neighbors, Neighbor, SimilarityIndex};
use crate::config::IndexBackend;
use crate::TARGET_INDEX;

/// Smallest leaf a tree will split down to.
pub const MIN_LEAF_SIZE: usize = 16;

/// Attempts at drawing two items that define a usable hyperplane.
const SPLIT_ATTEMPTS: usize = 5;

/// One random-projection tree, flattened to its leaves.
struct Tree {
    /// `leaf_of[item]` is the leaf holding `item`.
    leaf_of: Vec<usize>,
    leaves: Vec<Vec<usize>>,
}

/// Approximate index: a forest of random-projection trees over angular
/// distance.
///
/// Every tree recursively splits the items by the hyperplane halfway between
/// two randomly drawn items, until leaves hold at most `leaf_size` items.
/// A query's candidates are the items sharing a leaf with it in any tree;
/// those are ranked by angular distance and reported back as cosine via
/// `cos = 1 - d / 2`. The seed makes builds reproducible.
pub struct AngularForest {
    vectors: Vec<Vec<f32>>,
    trees: Vec<Tree>,
}

impl AngularForest {
    pub fn build(embeddings: &[Vec<f32>], n_trees: usize, leaf_size: usize, seed: u64) -> Self {
        let vectors: Vec<Vec<f32>> = embeddings.iter().map(|v| normalize(v)).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        let leaf_size = leaf_size.max(2);

        let trees = (0..n_trees.max(1))
            .map(|_| {
                let mut tree = Tree {
                    leaf_of: vec![0; vectors.len()],
                    leaves: Vec::new(),
                };
                let items: Vec<usize> = (0..vectors.len()).collect();
                split(&vectors, items, leaf_size, &mut rng, &mut tree);
                tree
            })
            .collect::<Vec<_>>();

        debug!(
            target: TARGET_INDEX,
            "Angular forest: {} trees, {} leaves in first tree",
            trees.len(),
            trees.first().map_or(0, |t| t.leaves.len())
        );

        Self { vectors, trees }
    }
}

fn split(
    vectors: &[Vec<f32>],
    items: Vec<usize>,
    leaf_size: usize,
    rng: &mut StdRng,
    tree: &mut Tree,
) {
    if items.len() <= leaf_size {
        let leaf_id = tree.leaves.len();
        for &i in &items {
            tree.leaf_of[i] = leaf_id;
        }
        tree.leaves.push(items);
        return;
    }

    let (left, right) = match hyperplane(vectors, &items, rng) {
        Some(normal) => {
            let mut left = Vec::new();
            let mut right = Vec::new();
            for &i in &items {
                let margin = dot(&vectors[i], &normal);
                let goes_right = if margin == 0.0 {
                    rng.random_bool(0.5)
                } else {
                    margin > 0.0
                };
                if goes_right {
                    right.push(i);
                } else {
                    left.push(i);
                }
            }
            (left, right)
        }
        None => (Vec::new(), Vec::new()),
    };

    // Degenerate split (duplicates, zero vectors): fall back to a random halving.
    let (left, right) = if left.is_empty() || right.is_empty() {
        let mut shuffled = items;
        shuffled.shuffle(rng);
        let right = shuffled.split_off(shuffled.len() / 2);
        (shuffled, right)
    } else {
        (left, right)
    };

    split(vectors, left, leaf_size, rng, tree);
    split(vectors, right, leaf_size, rng, tree);
}

/// Normal of the hyperplane equidistant from two random distinct items.
fn hyperplane(vectors: &[Vec<f32>], items: &[usize], rng: &mut StdRng) -> Option<Vec<f32>> {
    for _ in 0..SPLIT_ATTEMPTS {
        let p = items[rng.random_range(0..items.len())];
        let q = items[rng.random_range(0..items.len())];
        if p == q {
            continue;
        }
        let normal: Vec<f32> = vectors[p]
            .iter()
            .zip(vectors[q].iter())
            .map(|(a, b)| a - b)
            .collect();
        if normal.iter().any(|x| *x != 0.0) {
            return Some(normal);
        }
    }
    None
}

impl SimilarityIndex for AngularForest {
    fn backend(&self) -> IndexBackend {
        IndexBackend::Forest
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn neighbors(&self, item: usize, k: usize) -> Vec<Neighbor> {
        let Some(query) = self.vectors.get(item) else {
            return Vec::new();
        };

        let mut candidates = BTreeSet::new();
        for tree in &self.trees {
            candidates.extend(tree.leaves[tree.leaf_of[item]].iter().copied());
        }
        candidates.remove(&item);

        let hits = candidates
            .into_iter()
            .map(|j| {
                let distance = angular_distance(dot(query, &self.vectors[j]));
                Neighbor {
                    index: j,
                    similarity: cosine_from_angular(distance),
                }
            })
            .collect();
        rank_neighbors(hits, k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::ExactIndex;

    /// Two tight bundles of directions far apart from each other.
    fn bundles(per_bundle: usize) -> Vec<Vec<f32>> {
        let mut out = Vec::new();
        for i in 0..per_bundle {
            let jitter = i as f32 * 0.001;
            out.push(vec![1.0, jitter, 0.0, 0.0]);
            out.push(vec![0.0, 0.0, 1.0, jitter]);
        }
        out
    }

    #[test]
    fn test_build_is_deterministic() {
        let vectors = bundles(40);
        let a = AngularForest::build(&vectors, 5, 8, 7);
        let b = AngularForest::build(&vectors, 5, 8, 7);
        for i in 0..vectors.len() {
            assert_eq!(a.neighbors(i, 5), b.neighbors(i, 5));
        }
    }

    #[test]
    fn test_finds_bundle_mates() {
        let vectors = bundles(40);
        let forest = AngularForest::build(&vectors, 20, 16, 42);
        let exact = ExactIndex::new(&vectors);
        // Item 0 lives in the first bundle: every returned neighbour must too.
        let hits = forest.neighbors(0, 5);
        assert_eq!(hits.len(), 5);
        assert!(hits.iter().all(|n| n.index % 2 == 0));
        assert!(hits.iter().all(|n| n.similarity > 0.99));
        assert!(exact.neighbors(0, 5).iter().all(|n| n.index % 2 == 0));
    }

    #[test]
    fn test_duplicates_do_not_recurse_forever() {
        let vectors = vec![vec![1.0, 0.0]; 100];
        let forest = AngularForest::build(&vectors, 3, 8, 1);
        let hits = forest.neighbors(10, 3);
        assert_eq!(hits.len(), 3);
        assert!(hits.iter().all(|n| (n.similarity - 1.0).abs() < 1e-6));
    }
}
