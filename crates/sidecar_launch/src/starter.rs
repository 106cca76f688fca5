//! Primary-application starter abstraction

use crate::config::{shell_quote, EnvMap, StarterConfig};
use std::path::Path;

/// Platform-specific launcher of the primary application.
///
/// The launcher only ever talks to this interface; concrete starters know
/// how their hosting platform expects the application to be told about a
/// reverse-proxied port and how the final launch command is assembled.
pub trait Starter: Send + Sync {
    /// Port the application listens on (0 when unknown)
    fn app_port(&self) -> u16;

    /// Environment telling the platform about the proxied port
    fn proxy_env(&self, port: u16) -> EnvMap;

    /// Diagnostic label for the hosting platform
    fn cloud_env_name(&self) -> &str;

    /// Command line launching the application. The command must source the
    /// profile scripts in `profile_dir` (lexicographic order) before exec.
    fn launch_command(&self, profile_dir: &Path) -> Vec<String>;
}

/// Config-driven starter: launches a fixed command and communicates the
/// proxied port through a single environment variable.
pub struct CloudStarter {
    command: Vec<String>,
    app_port: u16,
    proxy_env_key: String,
    cloud_env: String,
}

impl CloudStarter {
    pub fn from_config(config: &StarterConfig) -> Self {
        Self {
            command: config.command.clone(),
            app_port: config.app_port,
            proxy_env_key: config.proxy_env_key.clone(),
            cloud_env: config.cloud_env.clone(),
        }
    }
}

impl Starter for CloudStarter {
    fn app_port(&self) -> u16 {
        self.app_port
    }

    fn proxy_env(&self, port: u16) -> EnvMap {
        let mut env = EnvMap::new();
        env.insert(self.proxy_env_key.clone(), port.to_string());
        env
    }

    fn cloud_env_name(&self) -> &str {
        &self.cloud_env
    }

    fn launch_command(&self, profile_dir: &Path) -> Vec<String> {
        let app_cmd = self
            .command
            .iter()
            .map(|part| shell_quote(part))
            .collect::<Vec<_>>()
            .join(" ");
        let script = format!(
            "for f in {}/*.sh; do [ -e \"$f\" ] && . \"$f\"; done; exec {}",
            shell_quote(&profile_dir.to_string_lossy()),
            app_cmd
        );
        vec!["sh".to_string(), "-c".to_string(), script]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn starter() -> CloudStarter {
        CloudStarter::from_config(&StarterConfig {
            command: vec!["./app".to_string(), "--flag".to_string()],
            app_port: 8080,
            proxy_env_key: "PORT".to_string(),
            cloud_env: "cloudfoundry".to_string(),
        })
    }

    #[test]
    fn test_proxy_env_uses_configured_key() {
        let env = starter().proxy_env(8082);
        assert_eq!(env.len(), 1);
        assert_eq!(env["PORT"], "8082");
    }

    #[test]
    fn test_launch_command_sources_profile_scripts() {
        let cmd = starter().launch_command(Path::new("/home/vcap/.profile.d"));
        assert_eq!(cmd[0], "sh");
        assert_eq!(cmd[1], "-c");
        assert!(cmd[2].contains("/home/vcap/.profile.d/*.sh"));
        assert!(cmd[2].contains("exec ./app --flag"));
    }
}
