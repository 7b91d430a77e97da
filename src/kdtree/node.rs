//! The arena-backed node model of the kd-tree.
//!
//! Nodes reference their children by arena index, never by pointer, so the
//! whole tree can be bulk-cloned and serialized as a flat node stream.

use crate::r#type::IndexableNum;

/// An axis-aligned bounding box with one `(min, max)` pair per dimension.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BoundingBox<N: IndexableNum> {
    pub(crate) min: Vec<N>,
    pub(crate) max: Vec<N>,
}

impl<N: IndexableNum> BoundingBox<N> {
    /// A degenerate box at the origin. Used for leaves that cover no points.
    pub(crate) fn zeroed(dim: usize) -> Self {
        Self {
            min: vec![N::zero(); dim],
            max: vec![N::zero(); dim],
        }
    }

    /// The tight box around one point.
    pub(crate) fn from_point(point: &[N]) -> Self {
        Self {
            min: point.to_vec(),
            max: point.to_vec(),
        }
    }

    pub(crate) fn dim(&self) -> usize {
        self.min.len()
    }

    /// Grow the box to cover `point`.
    pub(crate) fn extend(&mut self, point: &[N]) {
        for (j, &c) in point.iter().enumerate() {
            if c < self.min[j] {
                self.min[j] = c;
            }
            if c > self.max[j] {
                self.max[j] = c;
            }
        }
    }

    /// The dimension with the largest extent, and that extent.
    pub(crate) fn widest_dim(&self) -> (usize, N) {
        let mut best = 0;
        let mut best_extent = self.max[0] - self.min[0];
        for j in 1..self.dim() {
            let extent = self.max[j] - self.min[j];
            if extent > best_extent {
                best = j;
                best_extent = extent;
            }
        }
        (best, best_extent)
    }

    /// Squared distance from `point` to the nearest face of the box; zero if
    /// the point is inside. This is the lower bound on the distance to any
    /// point the box covers, used to prune search branches.
    #[inline]
    pub(crate) fn min_dist_sq(&self, point: &[N]) -> N {
        let mut dist = N::zero();
        for (j, &c) in point.iter().enumerate() {
            if c < self.min[j] {
                let d = self.min[j] - c;
                dist = dist + d * d;
            } else if c > self.max[j] {
                let d = c - self.max[j];
                dist = dist + d * d;
            }
        }
        dist
    }
}

/// A leaf node: the point identifiers it covers plus a cached bounding box.
///
/// `reorder_base` / `reorder_len` describe the prefix of `ids` whose
/// coordinates live in the index's reordered buffer (starting at row
/// `reorder_base`). Entries appended after the last build sit beyond that
/// prefix and are read through the identifier table instead.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LeafNode<N: IndexableNum> {
    pub(crate) ids: Vec<u32>,
    pub(crate) reorder_base: u32,
    pub(crate) reorder_len: u32,
    pub(crate) bounds: BoundingBox<N>,
}

/// An internal node: splitting dimension and value, two child arena indices,
/// and the subtree's bounding box.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SplitNode<N: IndexableNum> {
    pub(crate) cut_dim: u32,
    pub(crate) cut_val: N,
    pub(crate) left: u32,
    pub(crate) right: u32,
    pub(crate) bounds: BoundingBox<N>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node<N: IndexableNum> {
    Leaf(LeafNode<N>),
    Split(SplitNode<N>),
}

impl<N: IndexableNum> Node<N> {
    pub(crate) fn bounds(&self) -> &BoundingBox<N> {
        match self {
            Node::Leaf(leaf) => &leaf.bounds,
            Node::Split(split) => &split.bounds,
        }
    }
}

/// Contiguous owner of all tree nodes, addressed by `u32` index.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct NodeArena<N: IndexableNum> {
    nodes: Vec<Node<N>>,
}

impl<N: IndexableNum> NodeArena<N> {
    pub(crate) fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
        }
    }

    /// Append a node, returning its arena index.
    pub(crate) fn push(&mut self, node: Node<N>) -> u32 {
        let id = self.nodes.len();
        assert!(id <= u32::MAX as usize);
        self.nodes.push(node);
        id as u32
    }

    #[inline]
    pub(crate) fn get(&self, id: u32) -> &Node<N> {
        &self.nodes[id as usize]
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, id: u32) -> &mut Node<N> {
        &mut self.nodes[id as usize]
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Node<N>> {
        self.nodes.iter()
    }
}
