//! Builds launchable processes from sidecar specs and the starter

use crate::config::{EnvMap, SidecarSpec};
use crate::error::LaunchError;
use crate::runtime::process::{Process, ProcessConfig, ProcessError};
use crate::staging::sidecar_exec_path;
use crate::starter::Starter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Name under which the starter process appears in logs and errors
pub const STARTER_PROCESS_NAME: &str = "starter";

/// Builds [`Process`] instances wired to the launcher's error channel
pub struct ProcessFactory {
    base_dir: PathBuf,
    starter: Option<Arc<dyn Starter>>,
    error_tx: mpsc::Sender<LaunchError>,
}

impl ProcessFactory {
    pub fn new(
        base_dir: PathBuf,
        starter: Option<Arc<dyn Starter>>,
        error_tx: mpsc::Sender<LaunchError>,
    ) -> Self {
        Self {
            base_dir,
            starter,
            error_tx,
        }
    }

    /// Build a process for a sidecar, bound to its staged executable with
    /// the executable's directory as working directory.
    pub fn from_sidecar(
        &self,
        spec: &SidecarSpec,
        env: EnvMap,
    ) -> Result<Arc<Process>, LaunchError> {
        let program = sidecar_exec_path(&self.base_dir, spec);
        if !program.is_file() {
            return Err(LaunchError::for_sidecar(
                &spec.name,
                ProcessError::ExecutableNotFound {
                    name: spec.name.clone(),
                    path: program,
                },
            ));
        }
        let working_dir = program.parent().map(Path::to_path_buf);

        Ok(Arc::new(Process::new(
            ProcessConfig {
                name: spec.name.clone(),
                program,
                args: vec![],
                env,
                working_dir,
            },
            self.error_tx.clone(),
        )))
    }

    /// Build the primary-application process from the starter's launch
    /// command, with the accumulated environment and the profile directory
    /// its command must source.
    pub fn from_starter(
        &self,
        env: &EnvMap,
        profile_dir: &Path,
    ) -> Result<Arc<Process>, LaunchError> {
        let starter = self.starter.as_ref().ok_or_else(|| {
            LaunchError::Process(ProcessError::EmptyCommand {
                name: STARTER_PROCESS_NAME.to_string(),
            })
        })?;

        let mut command = starter.launch_command(profile_dir);
        if command.is_empty() {
            return Err(LaunchError::Process(ProcessError::EmptyCommand {
                name: STARTER_PROCESS_NAME.to_string(),
            }));
        }
        let program = PathBuf::from(command.remove(0));

        Ok(Arc::new(Process::new(
            ProcessConfig {
                name: STARTER_PROCESS_NAME.to_string(),
                program,
                args: command,
                env: env.clone(),
                working_dir: None,
            },
            self.error_tx.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staging::sidecar_dir;
    use tempfile::TempDir;

    fn spec(name: &str) -> SidecarSpec {
        SidecarSpec {
            name: name.to_string(),
            artifact_uri: String::new(),
            artifact_type: String::new(),
            executable: PathBuf::from("run.sh"),
            env: Default::default(),
            app_env: Default::default(),
            profile_d: String::new(),
            after_download: String::new(),
            is_rproxy: false,
        }
    }

    fn stage_executable(base: &Path, name: &str) {
        let dir = sidecar_dir(base, name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("run.sh"), b"#!/bin/sh\nexit 0\n").unwrap();
    }

    #[test]
    fn test_from_sidecar_binds_staged_executable() {
        let base = TempDir::new().unwrap();
        stage_executable(base.path(), "agent");
        let (tx, _rx) = mpsc::channel(10);
        let factory = ProcessFactory::new(base.path().to_path_buf(), None, tx);

        let process = factory.from_sidecar(&spec("agent"), EnvMap::new()).unwrap();
        assert_eq!(process.name(), "agent");
        assert!(process.program().ends_with(".sidecars/agent/run.sh"));
    }

    #[test]
    fn test_from_sidecar_missing_executable_fails_with_identity() {
        let base = TempDir::new().unwrap();
        let (tx, _rx) = mpsc::channel(10);
        let factory = ProcessFactory::new(base.path().to_path_buf(), None, tx);

        let err = factory
            .from_sidecar(&spec("ghost"), EnvMap::new())
            .unwrap_err();
        assert_eq!(err.sidecar_name(), Some("ghost"));
    }

    #[test]
    fn test_from_starter_without_starter_fails() {
        let base = TempDir::new().unwrap();
        let (tx, _rx) = mpsc::channel(10);
        let factory = ProcessFactory::new(base.path().to_path_buf(), None, tx);
        assert!(factory
            .from_starter(&EnvMap::new(), Path::new("/tmp/profile.d"))
            .is_err());
    }
}
