//! A single-tree kd-tree index for exact and approximate k-nearest-neighbor
//! search.

#![warn(missing_docs)]

mod build;
pub(crate) mod constants;
mod index;
mod node;
mod removed;
mod search;
mod serialize;

pub use index::{KDTreeIndex, KDTreeParams};
pub use search::{Neighbor, SearchParams};
