#![doc = include_str!("../README.md")]

mod error;
pub mod kdtree;
mod matrix;
mod r#type;

pub use error::{KdIndexError, Result};
pub use matrix::PointView;
pub use r#type::{CoordType, IndexableNum};
