//! Module discovery and activation.
//!
//! A module is an independently toggleable directory carrying a `module.json`
//! descriptor and, optionally, a `registration.json` declaring which other
//! modules it needs at activation time.

pub mod descriptor;
pub mod registry;
pub mod settings;
