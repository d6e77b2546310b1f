//! Composition tree: hierarchical, orderable UI contribution points.

pub mod ordering;
pub mod tree;
