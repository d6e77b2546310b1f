//! Storefront extensibility core.
//!
//! Discovers feature modules, resolves which of them are active and in what
//! order they load, lets each one register contributions into request-scoped
//! registries, and flattens the result into a serializable artifact.

pub mod cache;
pub mod components;
pub mod composition;
pub mod config;
pub mod db;
pub mod extension;
pub mod loader;
pub mod logging;
pub mod module;
pub mod repo;
pub mod session;
pub mod validate;

pub use cache::TtlCache;
pub use components::{
    ComponentRegistration, ComponentResolver, ComponentTable, StrategyRegistration, StrategyTable,
};
pub use composition::ordering::OrderingHint;
pub use composition::tree::{
    CompositionSnapshot, CompositionTree, Contribution, DirectComponent, RegionEntry, RegionMap,
};
pub use config::{ConfigError, StorefrontConfig};
pub use extension::points::{Extension, ExtensionEntry, ExtensionMap, ExtensionPoints};
pub use loader::capability::{Capabilities, Capability};
pub use loader::declarative::FileRegistrationSource;
pub use loader::runner::{LoadReport, RegistrationLoader, DEFAULT_CONTEXT};
pub use loader::source::{CompositeSource, Registration, RegistrationSource, StaticRegistrations};
pub use loader::RegistrationError;
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use module::registry::{discover, Discovery, DiscoveryOptions, ModuleRecord, ModuleRoot};
pub use module::settings::ModuleSettings;
pub use repo::settings_repo::{SettingsRepository, SqliteSettingsRepository};
pub use session::{ComposedArtifact, CompositionSession, SessionError, Storefront};
pub use validate::{validate_artifact, Issue, IssueKind, Severity};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
