//! Named component and product-type strategy tables.
//!
//! Registrations store names and import paths only, so both tables serialize
//! unchanged across the server/client boundary. Turning an entry into
//! something renderable is the rendering layer's job, via
//! [`ComponentResolver`].

use crate::composition::tree::RegionEntry;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One registered component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentRegistration {
    pub name: String,
    /// Import path or asset handle understood by the rendering layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Module that registered it, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
}

/// Name to component registration. Later registrations override earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentTable {
    entries: BTreeMap<String, ComponentRegistration>,
}

impl ComponentTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a component, returning the registration it replaced.
    pub fn register(&mut self, registration: ComponentRegistration) -> Option<ComponentRegistration> {
        let previous = self
            .entries
            .insert(registration.name.clone(), registration);
        if let Some(replaced) = &previous {
            debug!(
                "event=component_overridden module=components status=ok name={} previous_module={}",
                replaced.name,
                replaced.module.as_deref().unwrap_or("-")
            );
        }
        previous
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ComponentRegistration> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn to_map(&self) -> BTreeMap<String, ComponentRegistration> {
        self.entries.clone()
    }

    /// Resolves region entries in order, skipping entries whose component is
    /// unregistered or that the resolver declines.
    pub fn resolve_region<R>(
        &self,
        entries: &[RegionEntry],
        resolver: &R,
    ) -> Vec<(String, R::Output)>
    where
        R: ComponentResolver,
    {
        entries
            .iter()
            .filter_map(|entry| {
                let registration = self.get(entry.component_name()?)?;
                let rendered = resolver.resolve(registration)?;
                Some((entry.id.clone(), rendered))
            })
            .collect()
    }
}

/// Rendering-layer hook turning a registration into something renderable.
pub trait ComponentResolver {
    type Output;

    fn resolve(&self, registration: &ComponentRegistration) -> Option<Self::Output>;
}

/// Component strategy selected for one product type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyRegistration {
    pub product_type: String,
    pub component: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
}

/// Product type to strategy. Later registrations override earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StrategyTable {
    entries: BTreeMap<String, StrategyRegistration>,
}

impl StrategyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, registration: StrategyRegistration) -> Option<StrategyRegistration> {
        self.entries
            .insert(registration.product_type.clone(), registration)
    }

    pub fn get(&self, product_type: &str) -> Option<&StrategyRegistration> {
        self.entries.get(product_type)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_map(&self) -> BTreeMap<String, StrategyRegistration> {
        self.entries.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ComponentRegistration, ComponentResolver, ComponentTable, StrategyRegistration,
        StrategyTable,
    };
    use crate::composition::ordering::OrderingHint;
    use crate::composition::tree::{ComponentRef, RegionEntry};

    fn component(name: &str, module: &str) -> ComponentRegistration {
        ComponentRegistration {
            name: name.to_string(),
            path: Some(format!("{module}/{name}")),
            module: Some(module.to_string()),
        }
    }

    struct PathResolver;

    impl ComponentResolver for PathResolver {
        type Output = String;

        fn resolve(&self, registration: &ComponentRegistration) -> Option<String> {
            registration.path.clone()
        }
    }

    #[test]
    fn later_registration_overrides_earlier() {
        let mut table = ComponentTable::new();
        assert!(table.register(component("Logo", "theme")).is_none());
        let replaced = table
            .register(component("Logo", "branding"))
            .expect("previous registration");
        assert_eq!(replaced.module.as_deref(), Some("theme"));
        assert_eq!(
            table.get("Logo").and_then(|entry| entry.module.as_deref()),
            Some("branding")
        );
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn resolves_region_entries_through_resolver() {
        let mut table = ComponentTable::new();
        table.register(component("Logo", "theme"));
        let entries = vec![
            RegionEntry {
                id: "logo".to_string(),
                path: "page.header.logo".to_string(),
                component: ComponentRef::named("Logo"),
                ordering_hint: OrderingHint::default(),
                props: None,
                meta: None,
            },
            RegionEntry {
                id: "ghost".to_string(),
                path: "page.header.ghost".to_string(),
                component: ComponentRef::named("Ghost"),
                ordering_hint: OrderingHint::default(),
                props: None,
                meta: None,
            },
        ];

        let resolved = table.resolve_region(&entries, &PathResolver);
        assert_eq!(resolved, vec![("logo".to_string(), "theme/Logo".to_string())]);
    }

    #[test]
    fn strategies_are_keyed_by_product_type() {
        let mut strategies = StrategyTable::new();
        strategies.register(StrategyRegistration {
            product_type: "configurable".to_string(),
            component: "ConfigurableOptions".to_string(),
            module: None,
        });
        assert_eq!(
            strategies
                .get("configurable")
                .map(|entry| entry.component.as_str()),
            Some("ConfigurableOptions")
        );
        assert!(strategies.get("simple").is_none());
    }
}
