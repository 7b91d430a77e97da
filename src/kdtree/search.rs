//! Branch-and-bound KNN traversal.
//!
//! Search is best-first: subtree candidates sit in a min-heap keyed by the
//! bounding-box lower-bound distance to the query, so the nearer child of a
//! split is always expanded first and a candidate whose lower bound cannot
//! beat the current K-th best prunes every candidate behind it.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::error::{KdIndexError, Result};
use crate::kdtree::index::KDTreeIndex;
use crate::kdtree::node::{LeafNode, Node};
use crate::matrix::PointView;
use crate::r#type::IndexableNum;

/// Configuration for one search call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchParams {
    /// Maximum number of leaves to visit. `-1` searches exhaustively
    /// (exact results); a non-negative budget trades recall for latency and
    /// is clamped to at least one leaf.
    pub checks: i32,
    /// Relative slack for branch pruning: a subtree is skipped when its
    /// lower-bound distance exceeds `(1 + eps)` times the current K-th best.
    pub eps: f32,
    /// Return results ordered by ascending distance.
    pub sorted: bool,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            checks: -1,
            eps: 0.0,
            sorted: true,
        }
    }
}

/// One search result: a point identifier and its squared distance to the
/// query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor<N: IndexableNum> {
    /// Identifier of the matched point.
    pub id: u32,
    /// Squared distance from the query to the matched point.
    pub dist: N,
}

impl<N: IndexableNum> Eq for Neighbor<N> {}

impl<N: IndexableNum> Ord for Neighbor<N> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // We don't allow NaN. This should only panic on NaN
        self.dist.partial_cmp(&other.dist).unwrap()
    }
}

impl<N: IndexableNum> PartialOrd for Neighbor<N> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A deferred subtree candidate keyed by its bounding-box lower bound.
#[derive(Debug, Clone, Copy, PartialEq)]
struct BranchEntry<N: IndexableNum> {
    mindist: N,
    node: u32,
}

impl<N: IndexableNum> Eq for BranchEntry<N> {}

impl<N: IndexableNum> Ord for BranchEntry<N> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.mindist.partial_cmp(&other.mindist).unwrap()
    }
}

impl<N: IndexableNum> PartialOrd for BranchEntry<N> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A result set bounded to the K nearest entries, backed by a max-heap so the
/// current worst entry is evicted in O(log k).
struct KnnResultSet<N: IndexableNum> {
    k: usize,
    heap: BinaryHeap<Neighbor<N>>,
}

impl<N: IndexableNum> KnnResultSet<N> {
    fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    #[inline]
    fn is_full(&self) -> bool {
        self.heap.len() >= self.k
    }

    /// The current K-th best distance, or the maximum representable distance
    /// while fewer than K entries have been accepted.
    #[inline]
    fn worst(&self) -> N {
        if self.is_full() {
            self.heap.peek().map(|n| n.dist).unwrap_or_else(N::max_value)
        } else {
            N::max_value()
        }
    }

    #[inline]
    fn offer(&mut self, id: u32, dist: N) {
        if self.heap.len() < self.k {
            self.heap.push(Neighbor { id, dist });
        } else if let Some(worst) = self.heap.peek() {
            if dist < worst.dist {
                self.heap.pop();
                self.heap.push(Neighbor { id, dist });
            }
        }
    }

    fn into_sorted_vec(self) -> Vec<Neighbor<N>> {
        self.heap.into_sorted_vec()
    }

    fn into_vec(self) -> Vec<Neighbor<N>> {
        self.heap.into_vec()
    }
}

/// Skip a branch whose lower bound cannot improve on `worst`, widened by the
/// `(1 + eps)` approximation slack.
#[inline]
fn prune_branch<N: IndexableNum>(mindist: N, worst: N, eps: f32) -> bool {
    if eps == 0.0 {
        mindist > worst
    } else {
        mindist.to_f64().unwrap() > worst.to_f64().unwrap() * (1.0 + eps as f64)
    }
}

#[inline]
pub(crate) fn sq_dist<N: IndexableNum>(a: &[N], b: &[N]) -> N {
    let mut dist = N::zero();
    for (&ai, &bi) in a.iter().zip(b) {
        let d = ai - bi;
        dist = dist + d * d;
    }
    dist
}

impl<'a, N: IndexableNum> KDTreeIndex<'a, N> {
    /// Find the `k` nearest live points to each query row, by squared
    /// Euclidean distance.
    ///
    /// Each result row holds up to `k` neighbors; when fewer than `k` live
    /// points exist, the row is short rather than padded. With
    /// `checks = -1` the results are exact; a non-negative budget bounds the
    /// number of leaves visited per query.
    ///
    /// Fails with [`KdIndexError::NotBuilt`] before any tree exists, and with
    /// [`KdIndexError::InvalidInput`] when the query dimensionality differs
    /// from the index.
    pub fn knn_search(
        &self,
        queries: &PointView<'_, N>,
        k: usize,
        params: &SearchParams,
    ) -> Result<Vec<Vec<Neighbor<N>>>> {
        self.check_query_shape(queries)?;

        #[cfg(feature = "rayon")]
        {
            use rayon::prelude::*;
            Ok((0..queries.rows())
                .into_par_iter()
                .map(|i| self.knn_one(queries.row(i), k, params))
                .collect())
        }
        #[cfg(not(feature = "rayon"))]
        {
            Ok(queries
                .iter_rows()
                .map(|q| self.knn_one(q, k, params))
                .collect())
        }
    }

    /// Find every live point within `radius_sq` (squared distance, inclusive)
    /// of each query row.
    ///
    /// The `checks` budget and `eps` slack apply as in [`Self::knn_search`];
    /// `sorted` orders each row by ascending distance.
    pub fn radius_search(
        &self,
        queries: &PointView<'_, N>,
        radius_sq: N,
        params: &SearchParams,
    ) -> Result<Vec<Vec<Neighbor<N>>>> {
        self.check_query_shape(queries)?;
        Ok(queries
            .iter_rows()
            .map(|q| self.radius_one(q, radius_sq, params))
            .collect())
    }

    fn check_query_shape(&self, queries: &PointView<'_, N>) -> Result<()> {
        if self.root.is_none() {
            return Err(KdIndexError::NotBuilt);
        }
        if queries.cols() != self.dim {
            return Err(KdIndexError::InvalidInput(format!(
                "Query dimensionality {} does not match index dimensionality {}.",
                queries.cols(),
                self.dim
            )));
        }
        Ok(())
    }

    fn knn_one(&self, query: &[N], k: usize, params: &SearchParams) -> Vec<Neighbor<N>> {
        if k == 0 {
            return vec![];
        }
        // shape check in the public entry points guarantees a root here
        let root = match self.root {
            Some(root) => root,
            None => return vec![],
        };

        let max_leaves = if params.checks < 0 {
            usize::MAX
        } else {
            (params.checks as usize).max(1)
        };

        let mut results = KnnResultSet::new(k);
        let mut branches = BinaryHeap::new();
        branches.push(Reverse(BranchEntry {
            mindist: self.arena.get(root).bounds().min_dist_sq(query),
            node: root,
        }));

        let mut visited = 0_usize;
        while let Some(Reverse(entry)) = branches.pop() {
            // min-heap order: once the best remaining bound prunes, all do
            if results.is_full() && prune_branch(entry.mindist, results.worst(), params.eps) {
                break;
            }
            match self.arena.get(entry.node) {
                Node::Leaf(leaf) => {
                    self.scan_leaf(leaf, query, |id, dist| results.offer(id, dist));
                    visited += 1;
                    if visited >= max_leaves {
                        break;
                    }
                }
                Node::Split(split) => {
                    for child in [split.left, split.right] {
                        let mindist = self.arena.get(child).bounds().min_dist_sq(query);
                        if !(results.is_full()
                            && prune_branch(mindist, results.worst(), params.eps))
                        {
                            branches.push(Reverse(BranchEntry {
                                mindist,
                                node: child,
                            }));
                        }
                    }
                }
            }
        }

        if params.sorted {
            results.into_sorted_vec()
        } else {
            results.into_vec()
        }
    }

    fn radius_one(&self, query: &[N], radius_sq: N, params: &SearchParams) -> Vec<Neighbor<N>> {
        let root = match self.root {
            Some(root) => root,
            None => return vec![],
        };

        let max_leaves = if params.checks < 0 {
            usize::MAX
        } else {
            (params.checks as usize).max(1)
        };

        let mut results: Vec<Neighbor<N>> = vec![];
        let mut branches = BinaryHeap::new();
        branches.push(Reverse(BranchEntry {
            mindist: self.arena.get(root).bounds().min_dist_sq(query),
            node: root,
        }));

        let mut visited = 0_usize;
        while let Some(Reverse(entry)) = branches.pop() {
            if prune_branch(entry.mindist, radius_sq, params.eps) {
                break;
            }
            match self.arena.get(entry.node) {
                Node::Leaf(leaf) => {
                    self.scan_leaf(leaf, query, |id, dist| {
                        if dist <= radius_sq {
                            results.push(Neighbor { id, dist });
                        }
                    });
                    visited += 1;
                    if visited >= max_leaves {
                        break;
                    }
                }
                Node::Split(split) => {
                    for child in [split.left, split.right] {
                        let mindist = self.arena.get(child).bounds().min_dist_sq(query);
                        if !prune_branch(mindist, radius_sq, params.eps) {
                            branches.push(Reverse(BranchEntry {
                                mindist,
                                node: child,
                            }));
                        }
                    }
                }
            }
        }

        if params.sorted {
            results.sort_unstable();
        }
        results
    }

    /// Offer every live member of a leaf to `offer`, reading coordinates out
    /// of the reordered buffer for the prefix built in traversal order.
    fn scan_leaf<F: FnMut(u32, N)>(&self, leaf: &LeafNode<N>, query: &[N], mut offer: F) {
        for (j, &id) in leaf.ids.iter().enumerate() {
            if !self.removed.is_live(id) {
                continue;
            }
            let coords = self.leaf_coords(leaf, j, id);
            offer(id, sq_dist(query, coords));
        }
    }

    #[inline]
    fn leaf_coords(&self, leaf: &LeafNode<N>, j: usize, id: u32) -> &[N] {
        if (j as u32) < leaf.reorder_len {
            // reorder_len is only non-zero when the reordered buffer exists
            let buf = self.reordered.as_deref().unwrap();
            let start = (leaf.reorder_base as usize + j) * self.dim;
            &buf[start..start + self.dim]
        } else {
            self.points[id as usize]
        }
    }
}
