//! Registration loading.
//!
//! Enabled modules contribute to request-scoped registries through
//! registrations located per `(module, context)`. Every default-context
//! registration across all modules runs before any registration of the
//! requested context.

pub mod capability;
pub mod declarative;
pub mod runner;
pub mod source;

use crate::loader::capability::{Capability, CapabilityParseError};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

/// Failure of one registration invocation.
///
/// These never abort a load pass; the runner reports them and continues.
#[derive(Debug)]
pub enum RegistrationError {
    /// The registration needs a capability the host did not provide.
    CapabilityUnavailable(Capability),
    /// A registration file names a capability that does not exist.
    UnsupportedCapability(CapabilityParseError),
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    /// Well-formed input with unusable values.
    Invalid(String),
    /// Error raised by an in-process callback.
    Callback(String),
}

pub type RegistrationResult<T> = Result<T, RegistrationError>;

impl Display for RegistrationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CapabilityUnavailable(capability) => {
                write!(f, "capability `{}` is not available", capability.as_str())
            }
            Self::UnsupportedCapability(err) => write!(f, "{err}"),
            Self::Io { path, source } => write!(
                f,
                "failed to read registration `{}`: {source}",
                path.display()
            ),
            Self::Parse { path, source } => write!(
                f,
                "malformed registration `{}`: {source}",
                path.display()
            ),
            Self::Invalid(message) => write!(f, "invalid registration: {message}"),
            Self::Callback(message) => write!(f, "registration callback failed: {message}"),
        }
    }
}

impl Error for RegistrationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::UnsupportedCapability(err) => Some(err),
            Self::Io { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::CapabilityUnavailable(_) | Self::Invalid(_) | Self::Callback(_) => None,
        }
    }
}

impl From<CapabilityParseError> for RegistrationError {
    fn from(value: CapabilityParseError) -> Self {
        Self::UnsupportedCapability(value)
    }
}
