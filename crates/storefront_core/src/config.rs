//! Storefront configuration file.
//!
//! # Responsibility
//! - Parse the JSON configuration naming module roots, the enable map,
//!   cache limits and the known region allowlist.
//! - Resolve relative module roots against the configuration file location.
//!
//! # Invariants
//! - Missing fields fall back to defaults; an absent file is not required to
//!   start (`load_or_default`).
//! - Malformed enable-map values are ignored, leaving those modules disabled.

use crate::cache::{DEFAULT_MAX_ENTRIES, DEFAULT_TTL};
use crate::loader::runner::DEFAULT_CONTEXT;
use crate::module::registry::{DiscoveryOptions, ModuleRoot};
use crate::module::settings::ModuleSettings;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Artifact cache limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_ttl_ms() -> u64 {
    DEFAULT_TTL.as_millis() as u64
}

fn default_max_entries() -> usize {
    DEFAULT_MAX_ENTRIES
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_ttl_ms(),
            max_entries: default_max_entries(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

fn default_context() -> String {
    DEFAULT_CONTEXT.to_string()
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorefrontConfig {
    /// Scanned in order; earlier roots win name collisions.
    #[serde(default)]
    pub module_roots: Vec<ModuleRoot>,
    /// `module name -> enabled`.
    #[serde(default)]
    pub modules: ModuleSettings,
    #[serde(default)]
    pub cache: CacheConfig,
    /// Allowlist for the validator; `None` disables the unknown-region check.
    #[serde(default)]
    pub known_regions: Option<BTreeSet<String>>,
    /// Context used when a caller does not name one.
    #[serde(default = "default_context")]
    pub context: String,
}

impl Default for StorefrontConfig {
    fn default() -> Self {
        Self {
            module_roots: Vec::new(),
            modules: ModuleSettings::default(),
            cache: CacheConfig::default(),
            known_regions: None,
            context: default_context(),
        }
    }
}

impl StorefrontConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Reads a configuration file. Relative roots resolve against its directory.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_json_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some(base) = path.parent() {
            config.resolve_roots(base);
        }
        info!(
            "event=config_load module=config status=ok path={} roots={} modules={}",
            path.display(),
            config.module_roots.len(),
            config.modules.len()
        );
        Ok(config)
    }

    /// Like [`StorefrontConfig::load`], degrading to defaults on any failure.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path.as_ref()) {
            Ok(config) => config,
            Err(err) => {
                warn!(
                    "event=config_load module=config status=warn path={} fallback=default error={}",
                    path.as_ref().display(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Makes relative root paths absolute against `base`.
    pub fn resolve_roots(&mut self, base: &Path) {
        for root in &mut self.module_roots {
            if root.path.is_relative() {
                root.path = base.join(&root.path);
            }
        }
    }

    /// Discovery inputs with `persisted` settings layered over the file's map.
    pub fn discovery_options(
        &self,
        persisted: Option<&ModuleSettings>,
        overrides: BTreeMap<String, bool>,
    ) -> DiscoveryOptions {
        let settings = match persisted {
            Some(persisted) => persisted.layered_over(&self.modules),
            None => self.modules.clone(),
        };
        DiscoveryOptions {
            roots: self.module_roots.clone(),
            overrides,
            settings,
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse { path, source } => {
                write!(f, "malformed config `{}`: {source}", path.display())
            }
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
        }
    }
}
