//! File-backed declarative registrations.
//!
//! # Responsibility
//! - Locate `registrations/<context>.json` and `registrations/<context>/*.json`
//!   inside a module directory.
//! - Interpret each file as a list of mutations against the capability set.
//!
//! # Invariants
//! - Files are read when they execute, not when they are located, so a broken
//!   file fails only its own invocation.
//! - Mutations apply in document order: components, strategies, layout,
//!   removals, extensions. Mutations applied before a failing entry are kept.

use crate::composition::ordering::OrderingHint;
use crate::extension::points::Extension;
use crate::loader::capability::{parse_capability, Capabilities};
use crate::loader::runner::is_valid_context;
use crate::loader::source::{Registration, RegistrationSource};
use crate::loader::{RegistrationError, RegistrationResult};
use crate::module::registry::ModuleRecord;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Module-relative directory holding registration files.
pub const REGISTRATIONS_DIR: &str = "registrations";
const REGISTRATION_EXTENSION: &str = "json";

/// Parsed registration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistrationDocument {
    /// Capability ids that must be present before anything is applied.
    pub requires: Vec<String>,
    pub components: Vec<ComponentDecl>,
    pub strategies: Vec<StrategyDecl>,
    pub layout: Vec<LayoutDecl>,
    pub remove: Vec<RemoveDecl>,
    pub extensions: Vec<ExtensionDecl>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentDecl {
    pub name: String,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrategyDecl {
    pub product_type: String,
    pub component: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayoutDecl {
    /// Parent path, absolute (`page.header`) or root-relative (`header`).
    pub path: String,
    pub id: String,
    pub component: String,
    #[serde(default)]
    pub before: Option<String>,
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub props: Option<Value>,
    #[serde(default)]
    pub meta: Option<Value>,
}

impl LayoutDecl {
    fn hint(&self) -> RegistrationResult<OrderingHint> {
        match (&self.before, &self.after) {
            (Some(_), Some(_)) => Err(RegistrationError::Invalid(format!(
                "layout entry `{}` sets both `before` and `after`",
                self.id
            ))),
            (Some(target), None) => Ok(OrderingHint::before(target.as_str())),
            (None, Some(target)) => Ok(OrderingHint::after(target.as_str())),
            (None, None) => Ok(OrderingHint::default()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoveDecl {
    pub path: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtensionDecl {
    pub host: String,
    pub outlet: String,
    pub id: String,
    pub component: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub props: Option<Value>,
    #[serde(default)]
    pub meta: Option<Value>,
}

fn default_enabled() -> bool {
    true
}

fn require_non_empty(value: &str, what: &str) -> RegistrationResult<()> {
    if value.trim().is_empty() {
        return Err(RegistrationError::Invalid(format!("{what} must not be empty")));
    }
    Ok(())
}

impl RegistrationDocument {
    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Applies every declared mutation in order.
    pub fn apply(&self, capabilities: &mut Capabilities<'_>) -> RegistrationResult<()> {
        let required = self
            .requires
            .iter()
            .map(|value| parse_capability(value))
            .collect::<Result<Vec<_>, _>>()?;
        capabilities.require(&required)?;

        for component in &self.components {
            capabilities.register_component(&component.name, component.path.as_deref())?;
        }

        for strategy in &self.strategies {
            capabilities.register_strategy(&strategy.product_type, &strategy.component)?;
        }

        if !self.layout.is_empty() {
            let tree = capabilities.layout()?;
            for entry in &self.layout {
                require_non_empty(&entry.id, "layout id")?;
                require_non_empty(&entry.component, "layout component")?;
                let hint = entry.hint()?;
                let mut parent = tree.at(&entry.path);
                let mut child = parent.add_ordered(entry.component.trim(), &entry.id, hint);
                if let Some(props) = &entry.props {
                    child.set_props(props.clone());
                }
                if let Some(meta) = &entry.meta {
                    child.set_meta(meta.clone());
                }
            }
        }

        if !self.remove.is_empty() {
            let tree = capabilities.layout()?;
            for entry in &self.remove {
                let removed = tree.contains(&entry.path) && tree.at(&entry.path).remove(&entry.id);
                if !removed {
                    debug!(
                        "event=layout_remove_missing module=loader status=ok path={} id={}",
                        entry.path, entry.id
                    );
                }
            }
        }

        if !self.extensions.is_empty() {
            let points = capabilities.extensions()?;
            for entry in &self.extensions {
                require_non_empty(&entry.host, "extension host")?;
                require_non_empty(&entry.outlet, "extension outlet")?;
                require_non_empty(&entry.id, "extension id")?;
                require_non_empty(&entry.component, "extension component")?;
                let mut extension = Extension::new(entry.id.trim(), entry.component.trim())
                    .priority(entry.priority);
                if let Some(props) = &entry.props {
                    extension = extension.props(props.clone());
                }
                if let Some(meta) = &entry.meta {
                    extension = extension.meta(meta.clone());
                }
                let mut outlet = points.outlet(&entry.host, &entry.outlet);
                outlet.add(extension);
                if !entry.enabled {
                    outlet.disable(entry.id.trim());
                }
            }
        }

        Ok(())
    }
}

/// Registration read from one JSON file when it executes.
#[derive(Debug, Clone)]
pub struct DeclarativeRegistration {
    label: String,
    path: PathBuf,
}

impl DeclarativeRegistration {
    pub fn new(label: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> RegistrationResult<RegistrationDocument> {
        let raw = fs::read_to_string(&self.path).map_err(|source| RegistrationError::Io {
            path: self.path.clone(),
            source,
        })?;
        RegistrationDocument::from_json_str(&raw).map_err(|source| RegistrationError::Parse {
            path: self.path.clone(),
            source,
        })
    }
}

impl Registration for DeclarativeRegistration {
    fn label(&self) -> &str {
        &self.label
    }

    fn register(&self, capabilities: &mut Capabilities<'_>, _context: &str) -> RegistrationResult<()> {
        self.read_document()?.apply(capabilities)
    }
}

/// Finds declarative registration files inside module directories.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileRegistrationSource;

impl FileRegistrationSource {
    pub fn new() -> Self {
        Self
    }
}

impl RegistrationSource for FileRegistrationSource {
    fn locate(&self, module: &ModuleRecord, context: &str) -> Vec<Arc<dyn Registration>> {
        if !is_valid_context(context) {
            return Vec::new();
        }
        let base = module.location.join(REGISTRATIONS_DIR);
        let mut found: Vec<Arc<dyn Registration>> = Vec::new();

        let single_name = format!("{context}.{REGISTRATION_EXTENSION}");
        let single = base.join(&single_name);
        if single.is_file() {
            found.push(Arc::new(DeclarativeRegistration::new(
                format!("{REGISTRATIONS_DIR}/{single_name}"),
                single,
            )));
        }

        let nested = base.join(context);
        if nested.is_dir() {
            for file_name in sorted_json_files(&nested) {
                found.push(Arc::new(DeclarativeRegistration::new(
                    format!("{REGISTRATIONS_DIR}/{context}/{file_name}"),
                    nested.join(&file_name),
                )));
            }
        }

        found
    }
}

fn sorted_json_files(dir: &Path) -> Vec<String> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(
                "event=registration_dir_unreadable module=loader status=warn path={} error={err}",
                dir.display()
            );
            return Vec::new();
        }
    };
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| {
            Path::new(name)
                .extension()
                .is_some_and(|extension| extension == REGISTRATION_EXTENSION)
        })
        .collect();
    names.sort();
    names
}
