//! Registration lookup seams.
//!
//! A [`RegistrationSource`] answers "which registrations does this module
//! have for this context". Sources never run anything; the runner decides
//! when and in which phase each registration executes.

use crate::loader::capability::Capabilities;
use crate::loader::RegistrationResult;
use crate::module::registry::ModuleRecord;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// One executable registration (one "file").
pub trait Registration: Send + Sync {
    /// Stable label reported as the file of this registration.
    fn label(&self) -> &str;

    /// Contributes to the shared registries. Mutations made before an error
    /// is returned are kept.
    fn register(&self, capabilities: &mut Capabilities<'_>, context: &str) -> RegistrationResult<()>;
}

/// Locates registrations for one module and context.
pub trait RegistrationSource: Send + Sync {
    /// Registrations in execution order. Missing registrations yield an
    /// empty list, never an error.
    fn locate(&self, module: &ModuleRecord, context: &str) -> Vec<Arc<dyn Registration>>;
}

/// Registration backed by an in-process callback.
pub struct FnRegistration<F> {
    label: String,
    callback: F,
}

impl<F> FnRegistration<F>
where
    F: Fn(&mut Capabilities<'_>, &str) -> RegistrationResult<()> + Send + Sync,
{
    pub fn new(label: impl Into<String>, callback: F) -> Self {
        Self {
            label: label.into(),
            callback,
        }
    }
}

impl<F> Registration for FnRegistration<F>
where
    F: Fn(&mut Capabilities<'_>, &str) -> RegistrationResult<()> + Send + Sync,
{
    fn label(&self) -> &str {
        &self.label
    }

    fn register(&self, capabilities: &mut Capabilities<'_>, context: &str) -> RegistrationResult<()> {
        (self.callback)(capabilities, context)
    }
}

/// In-process registrations keyed by `(module, context)`.
#[derive(Default, Clone)]
pub struct StaticRegistrations {
    entries: BTreeMap<(String, String), Vec<Arc<dyn Registration>>>,
}

impl StaticRegistrations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a callback registration for `module` under `context`.
    pub fn register<F>(&mut self, module: &str, context: &str, label: &str, callback: F) -> &mut Self
    where
        F: Fn(&mut Capabilities<'_>, &str) -> RegistrationResult<()> + Send + Sync + 'static,
    {
        self.add(module, context, Arc::new(FnRegistration::new(label, callback)))
    }

    pub fn add(&mut self, module: &str, context: &str, registration: Arc<dyn Registration>) -> &mut Self {
        self.entries
            .entry((module.to_string(), context.to_string()))
            .or_default()
            .push(registration);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Debug for StaticRegistrations {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let labels: BTreeMap<String, Vec<&str>> = self
            .entries
            .iter()
            .map(|((module, context), registrations)| {
                (
                    format!("{module}/{context}"),
                    registrations.iter().map(|entry| entry.label()).collect(),
                )
            })
            .collect();
        f.debug_struct("StaticRegistrations")
            .field("entries", &labels)
            .finish()
    }
}

impl RegistrationSource for StaticRegistrations {
    fn locate(&self, module: &ModuleRecord, context: &str) -> Vec<Arc<dyn Registration>> {
        self.entries
            .get(&(module.name.clone(), context.to_string()))
            .cloned()
            .unwrap_or_default()
    }
}

/// Concatenates several sources; earlier sources run first.
#[derive(Default, Clone)]
pub struct CompositeSource {
    sources: Vec<Arc<dyn RegistrationSource>>,
}

impl CompositeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: Arc<dyn RegistrationSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl RegistrationSource for CompositeSource {
    fn locate(&self, module: &ModuleRecord, context: &str) -> Vec<Arc<dyn Registration>> {
        self.sources
            .iter()
            .flat_map(|source| source.locate(module, context))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{CompositeSource, RegistrationSource, StaticRegistrations};
    use crate::module::descriptor::ModuleOrigin;
    use crate::module::registry::ModuleRecord;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn record(name: &str) -> ModuleRecord {
        ModuleRecord {
            name: name.to_string(),
            location: PathBuf::from(name),
            origin: ModuleOrigin::Local,
            enabled: true,
            declared_dependencies: Vec::new(),
            has_registration_descriptor: false,
            missing_dependencies: Vec::new(),
        }
    }

    fn labels(source: &dyn RegistrationSource, module: &str, context: &str) -> Vec<String> {
        source
            .locate(&record(module), context)
            .iter()
            .map(|registration| registration.label().to_string())
            .collect()
    }

    #[test]
    fn static_registrations_are_keyed_by_module_and_context() {
        let mut registrations = StaticRegistrations::new();
        registrations
            .register("theme", "default", "theme/default", |_, _| Ok(()))
            .register("theme", "default", "theme/default-2", |_, _| Ok(()))
            .register("theme", "checkout", "theme/checkout", |_, _| Ok(()));

        assert_eq!(registrations.len(), 3);
        assert_eq!(
            labels(&registrations, "theme", "default"),
            vec!["theme/default", "theme/default-2"]
        );
        assert_eq!(labels(&registrations, "theme", "checkout"), vec!["theme/checkout"]);
        assert!(labels(&registrations, "theme", "cart").is_empty());
        assert!(labels(&registrations, "other", "default").is_empty());
    }

    #[test]
    fn composite_source_concatenates_in_order() {
        let mut first = StaticRegistrations::new();
        first.register("theme", "default", "first", |_, _| Ok(()));
        let mut second = StaticRegistrations::new();
        second.register("theme", "default", "second", |_, _| Ok(()));

        let composite = CompositeSource::new()
            .with(Arc::new(first))
            .with(Arc::new(second));
        assert_eq!(composite.len(), 2);
        assert_eq!(labels(&composite, "theme", "default"), vec!["first", "second"]);
    }
}
