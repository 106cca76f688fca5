//! Sidecar configuration file schema definitions

use crate::config::env_subst::EnvMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Root sidecars configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarsConfig {
    /// Base directory under which artifacts are staged
    pub dir: PathBuf,

    /// Fallback application port when no starter provides one
    #[serde(default)]
    pub app_port: u16,

    /// Disable the primary-application starter
    #[serde(default)]
    pub no_starter: bool,

    /// Primary-application starter definition (ignored when `no_starter`)
    #[serde(default)]
    pub starter: Option<StarterConfig>,

    /// Sidecar definitions. Order is significant: it fixes proxy port
    /// assignment and environment accumulation order.
    #[serde(default)]
    pub sidecars: Vec<SidecarSpec>,
}

/// Configuration of a single sidecar, immutable for the run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarSpec {
    /// Sidecar name, unique within a run
    pub name: String,

    /// Artifact to download; empty means the sidecar ships no artifact
    #[serde(default)]
    pub artifact_uri: String,

    /// Artifact archive kind: "tgz", "tar", "zip" or "file"
    #[serde(default)]
    pub artifact_type: String,

    /// Executable to launch, relative to the staged directory
    /// (or an absolute path)
    pub executable: PathBuf,

    /// Environment overrides for the sidecar process; values may be
    /// templates referencing the host environment
    #[serde(default)]
    pub env: EnvMap,

    /// Templates evaluated against the accumulated shared environment
    /// and merged back into it
    #[serde(default)]
    pub app_env: EnvMap,

    /// Shell snippet persisted as a profile script
    #[serde(default)]
    pub profile_d: String,

    /// Command run once after the artifact has been staged
    #[serde(default)]
    pub after_download: String,

    /// Whether this sidecar consumes one port in the reverse-proxy chain
    #[serde(default)]
    pub is_rproxy: bool,
}

/// Starter definition for the primary application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StarterConfig {
    /// Command line launching the application
    pub command: Vec<String>,

    /// Port the application listens on
    #[serde(default)]
    pub app_port: u16,

    /// Environment variable carrying the proxied port (defaults to PORT)
    #[serde(default = "default_proxy_env_key")]
    pub proxy_env_key: String,

    /// Diagnostic label for the hosting platform
    #[serde(default = "default_cloud_env")]
    pub cloud_env: String,
}

fn default_proxy_env_key() -> String {
    "PORT".to_string()
}

fn default_cloud_env() -> String {
    "local".to_string()
}

impl SidecarsConfig {
    /// Load the configuration from a YAML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_string(),
            source: e,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse the configuration from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: SidecarsConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for sidecar in &self.sidecars {
            if sidecar.name.is_empty() {
                return Err(ConfigError::Validation(
                    "sidecar with empty name".to_string(),
                ));
            }
            if !seen.insert(sidecar.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate sidecar name '{}'",
                    sidecar.name
                )));
            }
            if sidecar.executable.as_os_str().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "sidecar '{}': 'executable' must be set",
                    sidecar.name
                )));
            }
            if !sidecar.artifact_uri.is_empty() && sidecar.artifact_type.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "sidecar '{}': 'artifact_uri' requires 'artifact_type'",
                    sidecar.name
                )));
            }
        }

        if !self.no_starter {
            if let Some(starter) = &self.starter {
                if starter.command.is_empty() {
                    return Err(ConfigError::Validation(
                        "starter: 'command' must not be empty".to_string(),
                    ));
                }
            }
        }

        Ok(())
    }
}

impl SidecarSpec {
    /// Whether the sidecar ships a downloadable artifact
    pub fn has_artifact(&self) -> bool {
        !self.artifact_uri.is_empty()
    }
}

/// Errors that can occur when loading the configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_config() {
        let yaml = r#"
dir: /home/vcap/app
app_port: 8080
sidecars:
  - name: gobis
    artifact_uri: "https://example.org/gobis.tgz"
    artifact_type: tgz
    executable: gobis
    is_rproxy: true
  - name: local-agent
    executable: bin/agent
    env:
      AGENT_MODE: verbose
"#;
        let config = SidecarsConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.sidecars.len(), 2);
        assert!(config.sidecars[0].is_rproxy);
        assert!(config.sidecars[0].has_artifact());
        assert!(!config.sidecars[1].has_artifact());
        assert_eq!(config.sidecars[1].env["AGENT_MODE"], "verbose");
    }

    #[test]
    fn test_validation_duplicate_names() {
        let yaml = r#"
dir: /tmp
sidecars:
  - name: twin
    executable: a
  - name: twin
    executable: b
"#;
        assert!(matches!(
            SidecarsConfig::from_yaml(yaml),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_validation_artifact_requires_type() {
        let yaml = r#"
dir: /tmp
sidecars:
  - name: broken
    executable: bin/x
    artifact_uri: "https://example.org/x.tgz"
"#;
        assert!(SidecarsConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_validation_empty_starter_command() {
        let yaml = r#"
dir: /tmp
starter:
  command: []
"#;
        assert!(SidecarsConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_starter_defaults() {
        let yaml = r#"
dir: /tmp
starter:
  command: ["./app"]
  app_port: 9000
"#;
        let config = SidecarsConfig::from_yaml(yaml).unwrap();
        let starter = config.starter.unwrap();
        assert_eq!(starter.proxy_env_key, "PORT");
        assert_eq!(starter.cloud_env, "local");
    }
}
