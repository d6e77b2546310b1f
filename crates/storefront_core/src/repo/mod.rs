//! Persistence contracts and their SQLite implementations.
//!
//! SQL stays inside this layer; callers see domain types only.

pub mod settings_repo;
