//! Module and registration descriptor files.
//!
//! # Responsibility
//! - Read `module.json` (identity plus ambient package metadata).
//! - Read `registration.json` (the only source of activation dependencies).
//!
//! # Invariants
//! - Ambient `dependencies` from `module.json` never become activation
//!   dependencies.
//! - Descriptor errors are returned to the caller, which degrades the record
//!   instead of aborting discovery.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// File name marking a directory as a module.
pub const MODULE_DESCRIPTOR_FILE: &str = "module.json";
/// File name of the registration descriptor declaring activation dependencies.
pub const REGISTRATION_DESCRIPTOR_FILE: &str = "registration.json";

static MODULE_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(@[a-z0-9][a-z0-9._-]*/)?[a-z0-9][a-z0-9._-]*$")
        .expect("valid module name regex")
});

/// Returns whether `value` is an acceptable module name (optionally `@scope/`d).
pub fn is_valid_module_name(value: &str) -> bool {
    MODULE_NAME_RE.is_match(value)
}

/// Where a module was discovered. Only affects discovery precedence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleOrigin {
    /// Application-local module directory.
    #[default]
    Local,
    /// Installed package directory.
    Package,
}

/// Parsed `module.json`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ModuleDescriptor {
    pub name: Option<String>,
    pub version: Option<String>,
    /// Ambient package dependencies. Informational only.
    #[serde(default)]
    pub dependencies: BTreeMap<String, Value>,
}

/// Parsed `registration.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationDescriptor {
    pub dependencies: Vec<String>,
}

#[derive(Deserialize)]
struct RawRegistrationDescriptor {
    #[serde(default)]
    dependencies: Option<Value>,
}

/// Descriptor read/parse failures.
#[derive(Debug)]
pub enum DescriptorError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    InvalidDependencies {
        path: PathBuf,
        message: String,
    },
}

impl Display for DescriptorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read descriptor `{}`: {source}", path.display())
            }
            Self::Parse { path, source } => {
                write!(f, "malformed descriptor `{}`: {source}", path.display())
            }
            Self::InvalidDependencies { path, message } => write!(
                f,
                "invalid dependencies in descriptor `{}`: {message}",
                path.display()
            ),
        }
    }
}

impl Error for DescriptorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::InvalidDependencies { .. } => None,
        }
    }
}

/// Returns whether `dir` carries a module descriptor.
pub fn has_module_descriptor(dir: &Path) -> bool {
    dir.join(MODULE_DESCRIPTOR_FILE).is_file()
}

/// Returns whether `dir` carries a registration descriptor.
pub fn has_registration_descriptor(dir: &Path) -> bool {
    dir.join(REGISTRATION_DESCRIPTOR_FILE).is_file()
}

/// Reads `module.json` under `dir`.
pub fn read_module_descriptor(dir: &Path) -> Result<ModuleDescriptor, DescriptorError> {
    let path = dir.join(MODULE_DESCRIPTOR_FILE);
    let raw = read_file(&path)?;
    serde_json::from_str(&raw).map_err(|source| DescriptorError::Parse { path, source })
}

/// Reads `registration.json` under `dir`.
pub fn read_registration_descriptor(dir: &Path) -> Result<RegistrationDescriptor, DescriptorError> {
    let path = dir.join(REGISTRATION_DESCRIPTOR_FILE);
    let raw = read_file(&path)?;
    parse_registration_descriptor(&raw).map_err(|err| match err {
        ParseFailure::Json(source) => DescriptorError::Parse { path, source },
        ParseFailure::Shape(message) => DescriptorError::InvalidDependencies { path, message },
    })
}

#[derive(Debug)]
enum ParseFailure {
    Json(serde_json::Error),
    Shape(String),
}

fn parse_registration_descriptor(raw: &str) -> Result<RegistrationDescriptor, ParseFailure> {
    let parsed: RawRegistrationDescriptor = serde_json::from_str(raw).map_err(ParseFailure::Json)?;
    let mut dependencies = Vec::new();
    match parsed.dependencies {
        None | Some(Value::Null) => {}
        Some(Value::Array(items)) => {
            for item in items {
                match item {
                    Value::String(name) => push_unique(&mut dependencies, name),
                    other => {
                        return Err(ParseFailure::Shape(format!(
                            "dependency entries must be strings, got `{other}`"
                        )))
                    }
                }
            }
        }
        Some(Value::Object(map)) => {
            for name in map.keys() {
                push_unique(&mut dependencies, name.clone());
            }
        }
        Some(other) => {
            return Err(ParseFailure::Shape(format!(
                "dependencies must be an array or object, got `{other}`"
            )))
        }
    }
    Ok(RegistrationDescriptor { dependencies })
}

fn push_unique(dependencies: &mut Vec<String>, name: String) {
    let trimmed = name.trim();
    if trimmed.is_empty() || dependencies.iter().any(|existing| existing == trimmed) {
        return;
    }
    dependencies.push(trimmed.to_string());
}

fn read_file(path: &Path) -> Result<String, DescriptorError> {
    std::fs::read_to_string(path).map_err(|source| DescriptorError::Io {
        path: path.to_path_buf(),
        source,
    })
}
