//! Flat binary persistence of the tree.
//!
//! The encoding is a versioned header, the node records in arena order with
//! explicit child indices, the per-identifier liveness table, and (when the
//! index keeps a reordered coordinate copy) the reordered block. Scalars are
//! written in native byte order; the format deliberately targets a single
//! machine family rather than cross-endianness canonicalization.

use std::io::{Read, Write};

use bytemuck::{AnyBitPattern, NoUninit};

use crate::error::{KdIndexError, Result};
use crate::kdtree::constants::{KDINDEX_MAGIC, KDINDEX_VERSION, NODE_TAG_LEAF, NODE_TAG_SPLIT};
use crate::kdtree::index::KDTreeIndex;
use crate::kdtree::node::{BoundingBox, LeafNode, Node, NodeArena, SplitNode};
use crate::kdtree::removed::{DeletionTracker, PointState};
use crate::matrix::PointView;
use crate::r#type::IndexableNum;

/// Encode `index` and write the buffer to `writer`.
pub(crate) fn save<N: IndexableNum, W: Write>(
    index: &KDTreeIndex<'_, N>,
    writer: &mut W,
) -> Result<()> {
    let root = index.root.ok_or(KdIndexError::NotBuilt)?;

    let mut buf: Vec<u8> = Vec::new();
    buf.push(KDINDEX_MAGIC);
    buf.push((KDINDEX_VERSION << 4) + N::TYPE_INDEX);
    push_pod(&mut buf, &(index.leaf_size as u16));
    buf.push(index.reorder as u8);
    push_pod(&mut buf, &(index.dim as u32));
    push_pod(&mut buf, &(index.points.len() as u64));
    push_pod(&mut buf, &(index.arena.len() as u32));
    push_pod(&mut buf, &root);

    for node in index.arena.iter() {
        match node {
            Node::Leaf(leaf) => {
                buf.push(NODE_TAG_LEAF);
                push_pod(&mut buf, &(leaf.ids.len() as u32));
                push_pod(&mut buf, &leaf.reorder_base);
                push_pod(&mut buf, &leaf.reorder_len);
                push_slice(&mut buf, &leaf.ids);
                push_slice(&mut buf, &leaf.bounds.min);
                push_slice(&mut buf, &leaf.bounds.max);
            }
            Node::Split(split) => {
                buf.push(NODE_TAG_SPLIT);
                push_pod(&mut buf, &split.cut_dim);
                push_pod(&mut buf, &split.cut_val);
                push_pod(&mut buf, &split.left);
                push_pod(&mut buf, &split.right);
                push_slice(&mut buf, &split.bounds.min);
                push_slice(&mut buf, &split.bounds.max);
            }
        }
    }

    let states: Vec<u8> = index.removed.states().iter().map(|&s| s as u8).collect();
    buf.extend_from_slice(&states);

    if index.reorder {
        let reordered = index.reordered.as_deref().unwrap_or(&[]);
        push_pod(&mut buf, &((reordered.len() / index.dim) as u64));
        push_slice(&mut buf, reordered);
    }

    writer.write_all(&buf)?;
    Ok(())
}

/// Decode an index from `reader` and bind it to `data`.
pub(crate) fn load<'a, N: IndexableNum, R: Read>(
    data: PointView<'a, N>,
    reader: &mut R,
) -> Result<KDTreeIndex<'a, N>> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    let mut reader = ByteReader::new(&buf);

    let magic: u8 = reader.read("magic")?;
    if magic != KDINDEX_MAGIC {
        return Err(KdIndexError::FormatError(
            "Data not in kd-index format.".to_string(),
        ));
    }
    let version_and_type: u8 = reader.read("version")?;
    let version = version_and_type >> 4;
    if version != KDINDEX_VERSION {
        return Err(KdIndexError::FormatError(format!(
            "Got v{} data when expected v{}.",
            version, KDINDEX_VERSION
        )));
    }
    let type_ = version_and_type & 0x0f;
    if type_ != N::TYPE_INDEX {
        return Err(KdIndexError::FormatError(format!(
            "Got type {} data when expected type {}.",
            type_,
            N::TYPE_INDEX
        )));
    }

    let leaf_size: u16 = reader.read("leaf size")?;
    if leaf_size == 0 {
        return Err(KdIndexError::FormatError(
            "Leaf size of zero.".to_string(),
        ));
    }
    let reorder = match reader.read::<u8>("reorder flag")? {
        0 => false,
        1 => true,
        other => {
            return Err(KdIndexError::FormatError(format!(
                "Bad reorder flag {}.",
                other
            )))
        }
    };
    let dim = reader.read::<u32>("dimensionality")? as usize;
    if dim != data.cols() {
        return Err(KdIndexError::DimensionMismatch {
            expected: dim,
            actual: data.cols(),
        });
    }
    let num_points = reader.read::<u64>("point count")? as usize;
    if num_points != data.rows() {
        return Err(KdIndexError::InvalidInput(format!(
            "Data has {} rows, saved index expects {}.",
            data.rows(),
            num_points
        )));
    }
    let num_nodes = reader.read::<u32>("node count")? as usize;
    if num_nodes == 0 {
        return Err(KdIndexError::FormatError("Empty node arena.".to_string()));
    }
    let root: u32 = reader.read("root index")?;
    if root as usize >= num_nodes {
        return Err(KdIndexError::FormatError(format!(
            "Root index {} out of bounds.",
            root
        )));
    }

    let mut arena = NodeArena::with_capacity(num_nodes);
    for i in 0..num_nodes {
        let node = read_node(&mut reader, i, num_nodes, num_points, dim)?;
        arena.push(node);
    }

    let state_bytes: Vec<u8> = reader.read_vec(num_points, "liveness table")?;
    let mut states = Vec::with_capacity(num_points);
    for byte in state_bytes {
        states.push(match byte {
            0 => PointState::Live,
            1 => PointState::Tombstoned,
            2 => PointState::Retired,
            other => {
                return Err(KdIndexError::FormatError(format!(
                    "Bad liveness state {}.",
                    other
                )))
            }
        });
    }

    let reordered = if reorder {
        let rows = reader.read::<u64>("reordered row count")? as usize;
        let coords: Vec<N> = reader.read_vec(rows * dim, "reordered coordinates")?;
        Some(coords)
    } else {
        None
    };

    if !reader.is_at_end() {
        return Err(KdIndexError::FormatError(
            "Trailing bytes after index data.".to_string(),
        ));
    }

    // leaf reorder ranges must land inside the reordered block
    let reordered_rows = reordered.as_ref().map(|r| r.len() / dim).unwrap_or(0);
    for node in arena.iter() {
        if let Node::Leaf(leaf) = node {
            let end = leaf.reorder_base as usize + leaf.reorder_len as usize;
            if leaf.reorder_len > 0 && end > reordered_rows {
                return Err(KdIndexError::FormatError(format!(
                    "Leaf reorder range {}..{} exceeds {} reordered rows.",
                    leaf.reorder_base, end, reordered_rows
                )));
            }
        }
    }

    let removed = DeletionTracker::from_states(states);
    let size = removed.live_ids().len();

    Ok(KDTreeIndex {
        points: data.iter_rows().collect(),
        dim,
        leaf_size: leaf_size as usize,
        reorder,
        arena,
        root: Some(root),
        removed,
        reordered,
        size,
    })
}

fn read_node<N: IndexableNum>(
    reader: &mut ByteReader<'_>,
    index: usize,
    num_nodes: usize,
    num_points: usize,
    dim: usize,
) -> Result<Node<N>> {
    let tag: u8 = reader.read("node tag")?;
    match tag {
        NODE_TAG_LEAF => {
            let count = reader.read::<u32>("leaf point count")? as usize;
            if count > num_points {
                return Err(KdIndexError::FormatError(format!(
                    "Leaf claims {} points, index has {}.",
                    count, num_points
                )));
            }
            let reorder_base: u32 = reader.read("leaf reorder base")?;
            let reorder_len: u32 = reader.read("leaf reorder length")?;
            let ids: Vec<u32> = reader.read_vec(count, "leaf ids")?;
            for &id in &ids {
                if id as usize >= num_points {
                    return Err(KdIndexError::FormatError(format!(
                        "Leaf id {} out of bounds.",
                        id
                    )));
                }
            }
            let bounds = read_bounds(reader, dim)?;
            Ok(Node::Leaf(LeafNode {
                ids,
                reorder_base,
                reorder_len,
                bounds,
            }))
        }
        NODE_TAG_SPLIT => {
            let cut_dim: u32 = reader.read("split dimension")?;
            if cut_dim as usize >= dim {
                return Err(KdIndexError::FormatError(format!(
                    "Split dimension {} out of bounds.",
                    cut_dim
                )));
            }
            let cut_val: N = reader.read("split value")?;
            let left: u32 = reader.read("left child")?;
            let right: u32 = reader.read("right child")?;
            // the builder always allocates children after their parent, so
            // forward-only references also rule out cycles
            for child in [left, right] {
                if child as usize >= num_nodes || child as usize <= index {
                    return Err(KdIndexError::FormatError(format!(
                        "Child index {} invalid for node {}.",
                        child, index
                    )));
                }
            }
            let bounds = read_bounds(reader, dim)?;
            Ok(Node::Split(SplitNode {
                cut_dim,
                cut_val,
                left,
                right,
                bounds,
            }))
        }
        other => Err(KdIndexError::FormatError(format!(
            "Unknown node tag {}.",
            other
        ))),
    }
}

fn read_bounds<N: IndexableNum>(
    reader: &mut ByteReader<'_>,
    dim: usize,
) -> Result<BoundingBox<N>> {
    let min: Vec<N> = reader.read_vec(dim, "bounding box min")?;
    let max: Vec<N> = reader.read_vec(dim, "bounding box max")?;
    Ok(BoundingBox { min, max })
}

#[inline]
fn push_pod<T: NoUninit>(buf: &mut Vec<u8>, value: &T) {
    buf.extend_from_slice(bytemuck::bytes_of(value));
}

#[inline]
fn push_slice<T: NoUninit>(buf: &mut Vec<u8>, slice: &[T]) {
    buf.extend_from_slice(bytemuck::cast_slice(slice));
}

/// Position-tracking reader over the raw encoded buffer. Reads are unaligned
/// since node records have no fixed stride.
struct ByteReader<'b> {
    buf: &'b [u8],
    pos: usize,
}

impl<'b> ByteReader<'b> {
    fn new(buf: &'b [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn read<T: AnyBitPattern>(&mut self, what: &str) -> Result<T> {
        let size = std::mem::size_of::<T>();
        let end = self.pos + size;
        if end > self.buf.len() {
            return Err(KdIndexError::Truncated(format!(
                "Unexpected end of data reading {}.",
                what
            )));
        }
        let value = bytemuck::pod_read_unaligned(&self.buf[self.pos..end]);
        self.pos = end;
        Ok(value)
    }

    fn read_vec<T: NoUninit + AnyBitPattern>(&mut self, len: usize, what: &str) -> Result<Vec<T>> {
        let byte_len = len * std::mem::size_of::<T>();
        let end = self.pos.checked_add(byte_len).filter(|&e| e <= self.buf.len());
        let end = match end {
            Some(end) => end,
            None => {
                return Err(KdIndexError::Truncated(format!(
                    "Unexpected end of data reading {}.",
                    what
                )))
            }
        };
        let values = bytemuck::pod_collect_to_vec(&self.buf[self.pos..end]);
        self.pos = end;
        Ok(values)
    }

    fn is_at_end(&self) -> bool {
        self.pos == self.buf.len()
    }
}
