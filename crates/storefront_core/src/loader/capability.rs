//! Capability set handed to registration callbacks.
//!
//! # Responsibility
//! - Expose the request-scoped registries a callback may mutate.
//! - Make each capability optional so hosts can hand out a reduced set.
//!
//! # Invariants
//! - Accessing an absent capability is a `RegistrationError`, never a panic.
//! - Registrations made through helpers are attributed to the module whose
//!   callback is running.

use crate::components::{
    ComponentRegistration, ComponentTable, StrategyRegistration, StrategyTable,
};
use crate::composition::tree::CompositionTree;
use crate::extension::points::ExtensionPoints;
use crate::loader::RegistrationError;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// One capability a callback can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    Components,
    Layout,
    Extensions,
    Strategies,
}

impl Capability {
    /// Stable string id used in registration files.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Components => CAPABILITY_COMPONENTS,
            Self::Layout => CAPABILITY_LAYOUT,
            Self::Extensions => CAPABILITY_EXTENSIONS,
            Self::Strategies => CAPABILITY_STRATEGIES,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Components => "Register named components for rendering.",
            Self::Layout => "Add, reorder and remove nodes of the composition tree.",
            Self::Extensions => "Contribute entries to host/outlet extension points.",
            Self::Strategies => "Select component strategies per product type.",
        }
    }
}

pub const CAPABILITY_COMPONENTS: &str = "components";
pub const CAPABILITY_LAYOUT: &str = "layout";
pub const CAPABILITY_EXTENSIONS: &str = "extensions";
pub const CAPABILITY_STRATEGIES: &str = "strategies";

const SUPPORTED_CAPABILITY_STRINGS: &[&str] = &[
    CAPABILITY_COMPONENTS,
    CAPABILITY_LAYOUT,
    CAPABILITY_EXTENSIONS,
    CAPABILITY_STRATEGIES,
];

pub fn supported_capability_strings() -> &'static [&'static str] {
    SUPPORTED_CAPABILITY_STRINGS
}

/// Parses one capability id. Matching is exact and lowercase.
pub fn parse_capability(value: &str) -> Result<Capability, CapabilityParseError> {
    let normalized = value.trim();
    if normalized.is_empty() {
        return Err(CapabilityParseError::Empty);
    }
    match normalized {
        CAPABILITY_COMPONENTS => Ok(Capability::Components),
        CAPABILITY_LAYOUT => Ok(Capability::Layout),
        CAPABILITY_EXTENSIONS => Ok(Capability::Extensions),
        CAPABILITY_STRATEGIES => Ok(Capability::Strategies),
        other => Err(CapabilityParseError::Unsupported(other.to_string())),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityParseError {
    Empty,
    Unsupported(String),
}

impl Display for CapabilityParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "capability value must not be empty"),
            Self::Unsupported(value) => write!(f, "capability is unsupported: {value}"),
        }
    }
}

impl Error for CapabilityParseError {}

/// Registries available to one registration pass.
#[derive(Default)]
pub struct Capabilities<'a> {
    components: Option<&'a mut ComponentTable>,
    layout: Option<&'a mut CompositionTree>,
    extensions: Option<&'a mut ExtensionPoints>,
    strategies: Option<&'a mut StrategyTable>,
    current_module: Option<String>,
}

impl<'a> Capabilities<'a> {
    /// Empty capability set.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_components(mut self, components: &'a mut ComponentTable) -> Self {
        self.components = Some(components);
        self
    }

    pub fn with_layout(mut self, layout: &'a mut CompositionTree) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn with_extensions(mut self, extensions: &'a mut ExtensionPoints) -> Self {
        self.extensions = Some(extensions);
        self
    }

    pub fn with_strategies(mut self, strategies: &'a mut StrategyTable) -> Self {
        self.strategies = Some(strategies);
        self
    }

    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::Components => self.components.is_some(),
            Capability::Layout => self.layout.is_some(),
            Capability::Extensions => self.extensions.is_some(),
            Capability::Strategies => self.strategies.is_some(),
        }
    }

    /// Fails with the first capability in `required` that is absent.
    pub fn require(&self, required: &[Capability]) -> Result<(), RegistrationError> {
        match required.iter().find(|capability| !self.has(**capability)) {
            Some(missing) => Err(RegistrationError::CapabilityUnavailable(*missing)),
            None => Ok(()),
        }
    }

    pub fn components(&mut self) -> Result<&mut ComponentTable, RegistrationError> {
        self.components
            .as_deref_mut()
            .ok_or(RegistrationError::CapabilityUnavailable(Capability::Components))
    }

    pub fn layout(&mut self) -> Result<&mut CompositionTree, RegistrationError> {
        self.layout
            .as_deref_mut()
            .ok_or(RegistrationError::CapabilityUnavailable(Capability::Layout))
    }

    pub fn extensions(&mut self) -> Result<&mut ExtensionPoints, RegistrationError> {
        self.extensions
            .as_deref_mut()
            .ok_or(RegistrationError::CapabilityUnavailable(Capability::Extensions))
    }

    pub fn strategies(&mut self) -> Result<&mut StrategyTable, RegistrationError> {
        self.strategies
            .as_deref_mut()
            .ok_or(RegistrationError::CapabilityUnavailable(Capability::Strategies))
    }

    /// Registers a component attributed to the running module.
    pub fn register_component(
        &mut self,
        name: &str,
        path: Option<&str>,
    ) -> Result<(), RegistrationError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RegistrationError::Invalid(
                "component name must not be empty".to_string(),
            ));
        }
        let module = self.current_module.clone();
        self.components()?.register(ComponentRegistration {
            name: name.to_string(),
            path: path.map(str::to_string),
            module,
        });
        Ok(())
    }

    /// Selects the component used for one product type.
    pub fn register_strategy(
        &mut self,
        product_type: &str,
        component: &str,
    ) -> Result<(), RegistrationError> {
        let product_type = product_type.trim();
        if product_type.is_empty() || component.trim().is_empty() {
            return Err(RegistrationError::Invalid(
                "strategy product type and component must not be empty".to_string(),
            ));
        }
        let module = self.current_module.clone();
        self.strategies()?.register(StrategyRegistration {
            product_type: product_type.to_string(),
            component: component.trim().to_string(),
            module,
        });
        Ok(())
    }

    /// Module whose callback is currently running.
    pub fn current_module(&self) -> Option<&str> {
        self.current_module.as_deref()
    }

    pub(crate) fn set_current_module(&mut self, module: Option<&str>) {
        self.current_module = module.map(str::to_string);
    }
}

#[cfg(test)]
mod tests {
    use super::{
        parse_capability, supported_capability_strings, Capabilities, Capability,
        CapabilityParseError,
    };
    use crate::components::ComponentTable;
    use crate::composition::tree::CompositionTree;
    use crate::loader::RegistrationError;

    #[test]
    fn parses_all_supported_capabilities() {
        for value in supported_capability_strings() {
            let capability = parse_capability(value).expect("supported capability");
            assert_eq!(capability.as_str(), *value);
            assert!(!capability.description().is_empty());
        }
    }

    #[test]
    fn rejects_empty_and_unknown_capabilities() {
        assert_eq!(parse_capability("  "), Err(CapabilityParseError::Empty));
        assert_eq!(
            parse_capability("Layout"),
            Err(CapabilityParseError::Unsupported("Layout".to_string()))
        );
    }

    #[test]
    fn absent_capability_is_an_error() {
        let mut capabilities = Capabilities::new();
        let err = capabilities
            .layout()
            .expect_err("layout was not provided");
        assert!(matches!(
            err,
            RegistrationError::CapabilityUnavailable(Capability::Layout)
        ));
        assert!(capabilities.require(&[Capability::Components]).is_err());
    }

    #[test]
    fn registrations_are_attributed_to_the_running_module() {
        let mut components = ComponentTable::new();
        let mut layout = CompositionTree::new();
        {
            let mut capabilities = Capabilities::new()
                .with_components(&mut components)
                .with_layout(&mut layout);
            assert!(capabilities
                .require(&[Capability::Components, Capability::Layout])
                .is_ok());
            capabilities.set_current_module(Some("theme"));
            capabilities
                .register_component("Logo", Some("theme/Logo"))
                .expect("register component");
            capabilities
                .layout()
                .expect("layout capability")
                .at("header")
                .add("Logo", "logo");
        }

        let logo = components.get("Logo").expect("registered logo");
        assert_eq!(logo.module.as_deref(), Some("theme"));
        assert!(layout.contains("page.header.logo"));
    }

    #[test]
    fn rejects_blank_component_names() {
        let mut components = ComponentTable::new();
        let mut capabilities = Capabilities::new().with_components(&mut components);
        let err = capabilities
            .register_component(" ", None)
            .expect_err("blank name must fail");
        assert!(matches!(err, RegistrationError::Invalid(_)));
    }
}
