//! Run-wide error taxonomy

use crate::config::{ConfigError, TemplateError};
use crate::runtime::ProcessError;
use crate::staging::{FetchError, StagingError};
use std::num::ParseIntError;

/// Any failure a setup or launch run can surface.
///
/// Failures tied to one sidecar are wrapped in [`LaunchError::Sidecar`] so
/// the originating sidecar's identity is never lost; only errors general to
/// the whole run (signal wiring, port parsing, profile-dir io) stay bare.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid port value '{value}' in SIDECAR_APP_PORT: {source}")]
    InvalidPort {
        value: String,
        #[source]
        source: ParseIntError,
    },

    #[error("sidecar '{name}': {source}")]
    Sidecar {
        name: String,
        #[source]
        source: Box<LaunchError>,
    },
}

impl LaunchError {
    /// Wrap an error with the identity of the sidecar it originated from
    pub fn for_sidecar(name: &str, err: impl Into<LaunchError>) -> Self {
        LaunchError::Sidecar {
            name: name.to_string(),
            source: Box::new(err.into()),
        }
    }

    /// Name of the sidecar this error originated from, if any
    pub fn sidecar_name(&self) -> Option<&str> {
        match self {
            LaunchError::Sidecar { name, .. } => Some(name),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sidecar_wrapping_keeps_identity() {
        let err = LaunchError::for_sidecar(
            "gobis",
            TemplateError::UnresolvedVariable("PORT".to_string()),
        );
        assert_eq!(err.sidecar_name(), Some("gobis"));
        let message = err.to_string();
        assert!(message.contains("gobis"));
        assert!(message.contains("PORT"));
    }
}
