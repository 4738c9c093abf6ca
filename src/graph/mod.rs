//! The computation graph: vertex storage and dependency tracking.
//!
//! A graph is a `StableDiGraph` of named [`vertex::Vertex`] values where
//! an edge from `a` to `b` means "`b` declares `a` as a dependency".
//! This module provides the building blocks for constructing,
//! mutating, and querying the model's structure; calculation itself
//! lives in [`crate::calculation`].

pub mod dag;
pub mod vertex;

pub use dag::{Graph, MergePolicy};
pub use vertex::{NodeId, Vertex};
