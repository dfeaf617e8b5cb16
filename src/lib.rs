//! # SG Tree: a concurrent scapegoat-style cover tree
//!
//! In-memory spatial index over points in a real-valued vector space
//! under the Euclidean metric. Points are arranged in a leveled hierarchy
//! whose covering and separation invariants let every query discard whole
//! subtrees with a triangle-inequality bound.
//!
//! ## Operations
//! - dynamic insertion from many threads (per-node reader/writer locks;
//!   the global lock is only taken exclusively to seed or lift the root)
//! - exact nearest and k-nearest neighbour search
//! - beam-limited approximate k-nearest search
//! - range search and furthest-neighbour search
//! - flat-buffer serialization for same-architecture round-trips
//!
//! ## Usage
//!
//! ```
//! use sg_tree::{Point, SGTree};
//!
//! let tree = SGTree::default();
//! tree.insert(Point::new(vec![0.0, 0.0]), 0);
//! tree.insert(Point::new(vec![1.0, 0.0]), 1);
//! tree.calc_maxdist();
//!
//! let (node, dist) = tree.nearest(&Point::new(vec![0.9, 0.0])).unwrap();
//! assert_eq!(node.uid(), 1);
//! assert!((dist - 0.1).abs() < 1e-12);
//! ```
//!
//! After a batch of inserts, run [`SGTree::calc_maxdist`] to tighten the
//! cached descendant bounds queries prune with.

pub mod errors;
pub mod node;
pub mod powtable;
mod query;
mod serialize;
pub mod stats;
pub mod tree;
pub mod vector;

pub use errors::{Result, SgTreeError};
pub use node::Node;
pub use powtable::PowTable;
pub use stats::{LevelStats, TreeStats};
pub use tree::{SGTree, SgTreeConfig, DEFAULT_BASE};
pub use vector::Point;
