//! Flat `(host, outlet)` extension points, ordered by priority.

pub mod points;
