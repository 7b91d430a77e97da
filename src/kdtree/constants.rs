//! Constants shared between the kd-tree builder, index and serializer.

/// First byte of every persisted kd-index buffer.
pub const KDINDEX_MAGIC: u8 = 0xd7;

/// Version of the persisted format. Bump on any layout change.
pub const KDINDEX_VERSION: u8 = 1;

/// Default maximum number of points a leaf may hold before it is split.
pub const DEFAULT_LEAF_SIZE: usize = 16;

/// Recursion cap for the partitioner. A balanced build over `u32::MAX` points
/// is nowhere near this deep; exceeding it means pathological splits, and the
/// builder terminates the offending branch as an oversized leaf.
pub const MAX_TREE_DEPTH: usize = 512;

/// Node record tags in the persisted format.
pub const NODE_TAG_LEAF: u8 = 0;
pub const NODE_TAG_SPLIT: u8 = 1;
