//! Request-scoped composition and the cached compose pipeline.
//!
//! # Responsibility
//! - Own every mutable registry for one request or navigation.
//! - Run discover, load, build, flatten and validate in that order.
//! - Cache finished artifacts per context with request coalescing.
//!
//! # Invariants
//! - No registry outlives its session; nothing is process global.
//! - A cached artifact is immutable and shared behind `Arc`.

use crate::cache::TtlCache;
use crate::components::{ComponentRegistration, ComponentTable, StrategyRegistration, StrategyTable};
use crate::composition::tree::{CompositionTree, OrderConflict, RegionMap};
use crate::config::StorefrontConfig;
use crate::extension::points::{ExtensionMap, ExtensionPoints};
use crate::loader::capability::Capabilities;
use crate::loader::runner::{is_valid_context, LoadReport, RegistrationLoader};
use crate::loader::source::RegistrationSource;
use crate::module::registry::{resolve_candidates, scan_roots, Discovery, ModuleCandidate, ModuleRecord};
use crate::module::settings::ModuleSettings;
use crate::validate::{validate_artifact, Issue};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    InvalidContext(String),
}

pub type SessionResult<T> = Result<T, SessionError>;

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidContext(context) => write!(f, "invalid context name: {context:?}"),
        }
    }
}

impl Error for SessionError {}

/// Per-module outcome of discovery, as carried in an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSummary {
    pub name: String,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_dependencies: Vec<String>,
}

impl From<&ModuleRecord> for ModuleSummary {
    fn from(record: &ModuleRecord) -> Self {
        Self {
            name: record.name.clone(),
            enabled: record.enabled,
            missing_dependencies: record.missing_dependencies.clone(),
        }
    }
}

/// Serializable view of one registration failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureSummary {
    pub module: String,
    pub file: String,
    pub context: String,
    pub message: String,
}

/// Flattened, serializable result of one composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposedArtifact {
    pub request_id: Uuid,
    pub context: String,
    /// Enabled modules in load order, then disabled ones.
    pub modules: Vec<ModuleSummary>,
    pub regions: RegionMap,
    pub extensions: ExtensionMap,
    pub components: BTreeMap<String, ComponentRegistration>,
    pub strategies: BTreeMap<String, StrategyRegistration>,
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub registration_failures: Vec<FailureSummary>,
    #[serde(default)]
    pub order_conflicts: Vec<OrderConflict>,
    #[serde(default)]
    pub dependency_cycles: Vec<Vec<String>>,
}

impl ComposedArtifact {
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn enabled_modules(&self) -> Vec<&str> {
        self.modules
            .iter()
            .filter(|module| module.enabled)
            .map(|module| module.name.as_str())
            .collect()
    }
}

/// Registries for one request or navigation.
#[derive(Debug)]
pub struct CompositionSession {
    request_id: Uuid,
    context: String,
    components: ComponentTable,
    strategies: StrategyTable,
    tree: CompositionTree,
    extensions: ExtensionPoints,
}

impl CompositionSession {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            context: context.into(),
            components: ComponentTable::new(),
            strategies: StrategyTable::new(),
            tree: CompositionTree::new(),
            extensions: ExtensionPoints::new(),
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    /// Full capability set borrowing this session's registries.
    pub fn capabilities(&mut self) -> Capabilities<'_> {
        Capabilities::new()
            .with_components(&mut self.components)
            .with_layout(&mut self.tree)
            .with_extensions(&mut self.extensions)
            .with_strategies(&mut self.strategies)
    }

    /// Runs both registration phases for the enabled `modules`.
    pub fn load(&mut self, source: &dyn RegistrationSource, modules: &[ModuleRecord]) -> LoadReport {
        let context = self.context.clone();
        let mut capabilities = self.capabilities();
        RegistrationLoader::new(source).run(&context, modules, &mut capabilities, None)
    }

    pub fn components(&self) -> &ComponentTable {
        &self.components
    }

    pub fn strategies(&self) -> &StrategyTable {
        &self.strategies
    }

    pub fn tree(&self) -> &CompositionTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut CompositionTree {
        &mut self.tree
    }

    pub fn extensions(&self) -> &ExtensionPoints {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut ExtensionPoints {
        &mut self.extensions
    }

    /// Builds, flattens and validates the current registry state.
    pub fn artifact(
        &self,
        discovery: &Discovery,
        report: &LoadReport,
        known_regions: Option<&BTreeSet<String>>,
    ) -> ComposedArtifact {
        let snapshot = self.tree.build();
        let regions = snapshot.regions();
        let extensions = self.extensions.snapshot_sorted();
        let issues = validate_artifact(
            &regions,
            &extensions,
            |name| self.components.contains(name),
            known_regions,
        );

        ComposedArtifact {
            request_id: self.request_id,
            context: self.context.clone(),
            modules: discovery.modules.iter().map(ModuleSummary::from).collect(),
            regions,
            extensions,
            components: self.components.to_map(),
            strategies: self.strategies.to_map(),
            issues,
            registration_failures: report
                .failures
                .iter()
                .map(|failure| FailureSummary {
                    module: failure.module.clone(),
                    file: failure.file.clone(),
                    context: failure.context.clone(),
                    message: failure.error.to_string(),
                })
                .collect(),
            order_conflicts: snapshot.conflicts,
            dependency_cycles: discovery.cycles.clone(),
        }
    }
}

/// Configured pipeline producing cached artifacts per context.
pub struct Storefront {
    config: StorefrontConfig,
    persisted: Option<ModuleSettings>,
    builtin: Vec<ModuleCandidate>,
    source: Arc<dyn RegistrationSource>,
    cache: TtlCache<String, Arc<ComposedArtifact>, SessionError>,
}

impl Storefront {
    pub fn new(config: StorefrontConfig, source: Arc<dyn RegistrationSource>) -> Self {
        let cache = TtlCache::new(config.cache.ttl(), config.cache.max_entries);
        Self {
            config,
            persisted: None,
            builtin: Vec::new(),
            source,
            cache,
        }
    }

    /// Persisted enable map layered over the configuration file's map.
    pub fn with_settings(mut self, settings: ModuleSettings) -> Self {
        self.persisted = Some(settings);
        self
    }

    /// In-process modules discovered after every filesystem root.
    pub fn with_builtin_modules(mut self, candidates: Vec<ModuleCandidate>) -> Self {
        self.builtin = candidates;
        self
    }

    pub fn config(&self) -> &StorefrontConfig {
        &self.config
    }

    /// Runs discovery with optional per-call overrides.
    pub fn discover(&self, overrides: BTreeMap<String, bool>) -> Discovery {
        let options = self
            .config
            .discovery_options(self.persisted.as_ref(), overrides);
        let mut candidates = scan_roots(&options.roots);
        candidates.extend(self.builtin.iter().cloned());
        resolve_candidates(candidates, &options.overrides, &options.settings)
    }

    /// Composes `context` without consulting the cache.
    pub fn compose_uncached(&self, context: &str) -> SessionResult<ComposedArtifact> {
        let context = self.normalize_context(context)?;
        let started_at = Instant::now();
        let discovery = self.discover(BTreeMap::new());

        let mut session = CompositionSession::new(context.clone());
        let report = session.load(self.source.as_ref(), &discovery.modules);
        let artifact = session.artifact(&discovery, &report, self.config.known_regions.as_ref());

        info!(
            "event=compose module=session status=ok request_id={} context={} modules={} regions={} issues={} failures={} duration_ms={}",
            artifact.request_id,
            context,
            artifact.enabled_modules().len(),
            artifact.regions.len(),
            artifact.issues.len(),
            artifact.registration_failures.len(),
            started_at.elapsed().as_millis()
        );
        Ok(artifact)
    }

    /// Composes `context`, reusing a live cached artifact when present.
    pub fn compose(&self, context: &str) -> SessionResult<Arc<ComposedArtifact>> {
        let context = self.normalize_context(context)?;
        self.cache.get_or_set(context.clone(), || {
            self.compose_uncached(&context).map(Arc::new)
        })
    }

    /// Drops every cached artifact; the next compose re-runs discovery.
    pub fn invalidate(&self) {
        self.cache.clear();
        info!("event=compose_cache_cleared module=session status=ok");
    }

    fn normalize_context(&self, context: &str) -> SessionResult<String> {
        let context = context.trim();
        let context = if context.is_empty() {
            self.config.context.trim()
        } else {
            context
        };
        if !is_valid_context(context) {
            return Err(SessionError::InvalidContext(context.to_string()));
        }
        Ok(context.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::{CompositionSession, SessionError, Storefront};
    use crate::config::StorefrontConfig;
    use crate::loader::runner::{LoadReport, DEFAULT_CONTEXT};
    use crate::loader::source::StaticRegistrations;
    use crate::module::registry::{Discovery, ModuleCandidate};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn storefront_with(registrations: StaticRegistrations, modules: &[&str]) -> Storefront {
        let mut config = StorefrontConfig::default();
        for name in modules {
            config.modules.set(*name, true);
        }
        let candidates = modules
            .iter()
            .map(|name| ModuleCandidate::standalone(*name, *name))
            .collect();
        Storefront::new(config, Arc::new(registrations)).with_builtin_modules(candidates)
    }

    #[test]
    fn session_artifact_reflects_registrations() {
        let mut session = CompositionSession::new(DEFAULT_CONTEXT);
        {
            let mut capabilities = session.capabilities();
            capabilities
                .register_component("Logo", None)
                .expect("register logo");
            capabilities
                .layout()
                .expect("layout capability")
                .at("header")
                .add("Logo", "logo");
        }
        let artifact = session.artifact(&Discovery::default(), &LoadReport::default(), None);
        assert_eq!(artifact.regions["header"][0].id, "logo");
        assert!(artifact.issues.is_empty());
        assert_eq!(artifact.request_id, session.request_id());
    }

    #[test]
    fn compose_runs_registrations_of_enabled_modules() {
        let mut registrations = StaticRegistrations::new();
        registrations
            .register("theme", DEFAULT_CONTEXT, "theme/default", |capabilities, _| {
                capabilities.register_component("Logo", None)?;
                capabilities.layout()?.at("header").add("Logo", "logo");
                Ok(())
            })
            .register("theme", "checkout", "theme/checkout", |capabilities, _| {
                capabilities.layout()?.at("header").remove("logo");
                Ok(())
            });
        let storefront = storefront_with(registrations, &["theme"]);

        let home = storefront.compose("default").expect("compose default");
        assert_eq!(home.enabled_modules(), vec!["theme"]);
        assert_eq!(home.regions["header"].len(), 1);

        let checkout = storefront.compose("checkout").expect("compose checkout");
        assert!(!checkout.regions.contains_key("header"));
    }

    #[test]
    fn compose_caches_per_context_until_invalidated() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut registrations = StaticRegistrations::new();
        registrations.register("theme", DEFAULT_CONTEXT, "theme/default", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let storefront = storefront_with(registrations, &["theme"]);

        let first = storefront.compose("default").expect("first compose");
        let second = storefront.compose("").expect("empty context uses config default");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        storefront.invalidate();
        storefront.compose("default").expect("recompose");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn compose_rejects_invalid_context_names() {
        let storefront = storefront_with(StaticRegistrations::new(), &[]);
        let err = storefront
            .compose("../admin")
            .expect_err("invalid context");
        assert_eq!(err, SessionError::InvalidContext("../admin".to_string()));
    }

    #[test]
    fn artifact_round_trips_through_json() {
        let mut registrations = StaticRegistrations::new();
        registrations.register("theme", DEFAULT_CONTEXT, "theme/default", |capabilities, _| {
            capabilities.register_component("Nav", Some("theme/Nav"))?;
            capabilities.layout()?.at("header").add("Nav", "nav");
            Ok(())
        });
        let storefront = storefront_with(registrations, &["theme"]);
        let artifact = storefront.compose_uncached("default").expect("compose");

        let encoded = artifact.to_json_pretty().expect("encode artifact");
        let decoded: super::ComposedArtifact =
            serde_json::from_str(&encoded).expect("decode artifact");
        assert_eq!(decoded, artifact);
    }
}
