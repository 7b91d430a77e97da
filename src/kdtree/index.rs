//! The kd-tree index façade.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use tinyvec::TinyVec;

use crate::error::{KdIndexError, Result};
use crate::kdtree::build;
use crate::kdtree::constants::DEFAULT_LEAF_SIZE;
use crate::kdtree::node::{Node, NodeArena};
use crate::kdtree::removed::DeletionTracker;
use crate::kdtree::serialize;
use crate::matrix::PointView;
use crate::r#type::IndexableNum;

/// Build configuration for a [`KDTreeIndex`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KDTreeParams {
    /// Maximum number of points a leaf may hold before it is split.
    pub leaf_size: usize,
    /// Keep a private copy of point coordinates rearranged into leaf
    /// traversal order for cache locality during search.
    pub reorder: bool,
}

impl Default for KDTreeParams {
    fn default() -> Self {
        Self {
            leaf_size: DEFAULT_LEAF_SIZE,
            reorder: false,
        }
    }
}

/// A single kd-tree over a borrowed point matrix.
///
/// The index never owns the caller's coordinate data; it holds one borrowed
/// coordinate slice per point identifier (plus a private reordered copy when
/// [`KDTreeParams::reorder`] is set). Identifiers are positions in
/// registration order, stable across removal, and never reused.
///
/// `Clone` produces a fully independent index: the node arena, deletion
/// tracker and reordered buffer are deep-copied while the caller-owned
/// coordinate data stays shared read-only. Mutating a clone never affects the
/// original.
#[derive(Debug, Clone)]
pub struct KDTreeIndex<'a, N: IndexableNum> {
    /// Coordinate slice of each registered point, indexed by identifier.
    pub(super) points: Vec<&'a [N]>,
    pub(super) dim: usize,
    pub(super) leaf_size: usize,
    pub(super) reorder: bool,
    pub(super) arena: NodeArena<N>,
    pub(super) root: Option<u32>,
    pub(super) removed: DeletionTracker,
    /// Coordinates rearranged into leaf traversal order; rebuilt by
    /// [`Self::build_index`] when `reorder` is set.
    pub(super) reordered: Option<Vec<N>>,
    /// Number of live (non-removed) points.
    pub(super) size: usize,
}

impl<'a, N: IndexableNum> KDTreeIndex<'a, N> {
    /// Create an index over `data` without building a tree.
    ///
    /// Call [`Self::build_index`] (or [`Self::add_points`]) before searching.
    ///
    /// Panics if `params.leaf_size` is zero or exceeds `u16::MAX`.
    pub fn new(data: PointView<'a, N>, params: KDTreeParams) -> Self {
        assert!((1..=65535).contains(&params.leaf_size));

        let points: Vec<&'a [N]> = data.iter_rows().collect();
        let size = points.len();
        let removed = DeletionTracker::new(size);
        Self {
            points,
            dim: data.cols(),
            leaf_size: params.leaf_size,
            reorder: params.reorder,
            arena: NodeArena::new(),
            root: None,
            removed,
            reordered: None,
            size,
        }
    }

    /// Build (or rebuild) the tree over all currently live points.
    ///
    /// A rebuild discards the previous arena, re-derives the permutation from
    /// live identifiers, retires every tombstone and restores tight bounding
    /// boxes. On failure the previous tree (if any) is left untouched.
    pub fn build_index(&mut self) -> Result<()> {
        if self.dim == 0 {
            return Err(KdIndexError::InvalidInput(
                "Dimensionality must be non-zero.".to_string(),
            ));
        }
        if self.points.is_empty() {
            return Err(KdIndexError::InvalidInput(
                "Cannot build an index over zero points.".to_string(),
            ));
        }

        let mut ids = self.removed.live_ids();
        let live = ids.len();
        let mut arena = NodeArena::with_capacity(2 * live / self.leaf_size.max(1) + 1);
        let root = build::build_tree(&mut arena, &self.points, &mut ids, self.leaf_size, self.dim);

        self.arena = arena;
        self.root = Some(root);
        self.removed.retire_tombstones();
        self.size = live;
        if self.reorder {
            self.rebuild_reordered();
        } else {
            self.reordered = None;
        }
        Ok(())
    }

    /// Register a block of new points and grow the tree incrementally.
    ///
    /// Each new point descends from the root along its split tests, expanding
    /// bounding boxes on the way, and lands in a leaf; a leaf pushed past the
    /// size threshold is resplit in place over its local points. Incremental
    /// growth does not guarantee the balance of a from-scratch build; rebuild
    /// with [`Self::build_index`] when optimal balance matters.
    ///
    /// If no tree exists yet, this builds one over all registered points.
    pub fn add_points(&mut self, new_points: PointView<'a, N>) -> Result<()> {
        if new_points.cols() != self.dim {
            return Err(KdIndexError::InvalidInput(format!(
                "New block has dimensionality {}, index has {}.",
                new_points.cols(),
                self.dim
            )));
        }
        if new_points.rows() == 0 {
            return Ok(());
        }

        let first_id = self.points.len() as u32;
        self.points.extend(new_points.iter_rows());
        self.removed.grow(new_points.rows());
        self.size += new_points.rows();

        if self.root.is_none() {
            return self.build_index();
        }
        for id in first_id..first_id + new_points.rows() as u32 {
            self.insert_one(id);
        }
        Ok(())
    }

    fn insert_one(&mut self, id: u32) {
        let point = self.points[id as usize];
        // root checked by the caller
        let mut node = self.root.unwrap();
        loop {
            let next = match self.arena.get_mut(node) {
                Node::Split(split) => {
                    split.bounds.extend(point);
                    if point[split.cut_dim as usize] < split.cut_val {
                        Some(split.left)
                    } else {
                        Some(split.right)
                    }
                }
                Node::Leaf(leaf) => {
                    leaf.bounds.extend(point);
                    leaf.ids.push(id);
                    None
                }
            };
            match next {
                Some(child) => node = child,
                None => break,
            }
        }

        let overflow = match self.arena.get(node) {
            Node::Leaf(leaf) => leaf.ids.len() > self.leaf_size,
            Node::Split(_) => false,
        };
        if overflow {
            // resplit in place; the leaf's reordered prefix mapping is
            // dropped with it and identifier-based access takes over until
            // the next rebuild
            let mut ids = match self.arena.get_mut(node) {
                Node::Leaf(leaf) => std::mem::take(&mut leaf.ids),
                Node::Split(_) => unreachable!(),
            };
            build::resplit_leaf(
                &mut self.arena,
                node,
                &self.points,
                &mut ids,
                self.leaf_size,
                self.dim,
            );
        }
    }

    /// Mark a point as removed.
    ///
    /// The tree topology and bounding boxes are untouched (boxes stay valid
    /// supersets, so pruning remains correct); searches simply stop returning
    /// the identifier. Fails with [`KdIndexError::OutOfRange`] for an unknown
    /// identifier and [`KdIndexError::AlreadyRemoved`] for a repeated
    /// removal.
    pub fn remove_point(&mut self, id: u32) -> Result<()> {
        self.removed.remove(id)?;
        self.size -= 1;
        Ok(())
    }

    /// Regenerate the reordered coordinate buffer in leaf traversal order and
    /// stamp each leaf with its slot range.
    fn rebuild_reordered(&mut self) {
        let root = match self.root {
            Some(root) => root,
            None => {
                self.reordered = None;
                return;
            }
        };

        let arena = &mut self.arena;
        let points = &self.points;
        let dim = self.dim;

        let mut buf: Vec<N> = Vec::with_capacity(self.size * dim);
        let mut stack: TinyVec<[u32; 32]> = TinyVec::new();
        stack.push(root);
        while let Some(node) = stack.pop() {
            match arena.get_mut(node) {
                Node::Split(split) => {
                    stack.push(split.right);
                    stack.push(split.left);
                }
                Node::Leaf(leaf) => {
                    leaf.reorder_base = (buf.len() / dim) as u32;
                    leaf.reorder_len = leaf.ids.len() as u32;
                    for &id in &leaf.ids {
                        buf.extend_from_slice(points[id as usize]);
                    }
                }
            }
        }
        self.reordered = Some(buf);
    }

    /// Persist the tree topology and configuration to `writer`.
    ///
    /// Fails with [`KdIndexError::NotBuilt`] before any build.
    pub fn save<W: Write>(&self, writer: &mut W) -> Result<()> {
        serialize::save(self, writer)
    }

    /// Persist to a file at `path`.
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.save(&mut writer)
    }

    /// Reconstruct a saved index, binding it to `data`.
    ///
    /// `data` must be the same logical dataset the index was saved over:
    /// identifiers are positional, so the dimensionality and row count must
    /// match the persisted header.
    pub fn load<R: Read>(data: PointView<'a, N>, reader: &mut R) -> Result<Self> {
        serialize::load(data, reader)
    }

    /// Reconstruct a saved index from a file at `path`.
    pub fn load_from_path<P: AsRef<Path>>(data: PointView<'a, N>, path: P) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        Self::load(data, &mut reader)
    }

    /// The number of live (non-removed) points.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The total number of registered identifiers, removed ones included.
    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    /// The dimensionality of the indexed points.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// The configured leaf-size threshold.
    pub fn leaf_size(&self) -> usize {
        self.leaf_size
    }

    /// Whether the reordered coordinate copy is enabled.
    pub fn reorder(&self) -> bool {
        self.reorder
    }

    /// The number of tombstoned points since the last rebuild.
    pub fn removed_count(&self) -> usize {
        self.removed.tombstone_count()
    }

    /// Whether a tree exists (built or incrementally populated).
    pub fn is_built(&self) -> bool {
        self.root.is_some()
    }
}
