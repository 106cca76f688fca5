//! Artifact staging: per-sidecar download directories and install hooks

mod fetcher;

pub use fetcher::*;

use crate::config::{os_env, override_env, SidecarSpec, TemplateError};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

/// Subdirectory of the base dir under which sidecar artifacts are staged
pub const SIDECARS_WORKDIR: &str = ".sidecars";

/// Checksum sentinel for sidecars without an artifact
pub const NO_ARTIFACT_CHECKSUM: &str = "-";

/// Staging directory for one sidecar
pub fn sidecar_dir(base_dir: &Path, sidecar_name: &str) -> PathBuf {
    base_dir.join(SIDECARS_WORKDIR).join(sidecar_name)
}

/// Path of a sidecar's executable inside its staging directory.
/// Absolute executables are taken as-is.
pub fn sidecar_exec_path(base_dir: &Path, spec: &SidecarSpec) -> PathBuf {
    if spec.executable.is_absolute() {
        return spec.executable.clone();
    }
    sidecar_dir(base_dir, &spec.name).join(&spec.executable)
}

/// Result of a staging attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// Artifact was downloaded and extracted
    Staged,
    /// Directory was already populated and `force` was not set
    AlreadyStaged,
}

/// Stages sidecar artifacts through a [`Fetcher`]
pub struct Stager {
    fetcher: Box<dyn Fetcher>,
}

impl Stager {
    pub fn new(fetcher: Box<dyn Fetcher>) -> Self {
        Self { fetcher }
    }

    /// Stager backed by the default HTTP/local-path fetcher
    pub fn http() -> Self {
        Self::new(Box::new(HttpFetcher))
    }

    /// Ensure the sidecar's artifact is present under
    /// `<base_dir>/.sidecars/<name>`.
    ///
    /// A non-empty directory short-circuits to [`StageOutcome::AlreadyStaged`]
    /// unless `force` is set, in which case the directory is wiped and the
    /// artifact downloaded again.
    pub fn stage(
        &self,
        base_dir: &Path,
        spec: &SidecarSpec,
        force: bool,
    ) -> Result<StageOutcome, StagingError> {
        let dir = sidecar_dir(base_dir, &spec.name);
        std::fs::create_dir_all(&dir).map_err(|e| StagingError::dir(&dir, e))?;

        let is_empty = dir
            .read_dir()
            .map_err(|e| StagingError::dir(&dir, e))?
            .next()
            .is_none();
        if !is_empty && !force {
            return Ok(StageOutcome::AlreadyStaged);
        }
        if !is_empty {
            std::fs::remove_dir_all(&dir).map_err(|e| StagingError::dir(&dir, e))?;
            std::fs::create_dir_all(&dir).map_err(|e| StagingError::dir(&dir, e))?;
        }

        log::info!(
            "[{}] Downloading artifact from {}",
            spec.name,
            spec.artifact_uri
        );
        self.fetcher
            .open(&spec.artifact_uri, &spec.artifact_type)?
            .download(&dir)?;
        Ok(StageOutcome::Staged)
    }

    /// Run the sidecar's after-download hook, if any.
    ///
    /// The hook runs through `sh -c` with the sidecar executable's directory
    /// as working directory and the OS environment overridden by the
    /// sidecar's own env map.
    pub fn run_after_download(
        &self,
        base_dir: &Path,
        spec: &SidecarSpec,
    ) -> Result<(), StagingError> {
        if spec.after_download.is_empty() {
            return Ok(());
        }

        log::info!("[{}] Running after-download hook", spec.name);
        let env = override_env(&os_env(), &spec.env)?;
        let exec_path = sidecar_exec_path(base_dir, spec);
        let workdir = exec_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| base_dir.to_path_buf());

        let status = Command::new("sh")
            .arg("-c")
            .arg(&spec.after_download)
            .current_dir(&workdir)
            .env_clear()
            .envs(&env)
            .status()
            .map_err(StagingError::HookSpawn)?;

        if !status.success() {
            return Err(StagingError::HookFailed(status));
        }
        log::info!("[{}] Finished after-download hook", spec.name);
        Ok(())
    }

    /// Content hash of the sidecar's artifact, or the `"-"` sentinel when
    /// it ships none. Never stages anything.
    pub fn checksum(&self, spec: &SidecarSpec) -> Result<String, StagingError> {
        if !spec.has_artifact() {
            return Ok(NO_ARTIFACT_CHECKSUM.to_string());
        }
        let checksum = self
            .fetcher
            .open(&spec.artifact_uri, &spec.artifact_type)?
            .checksum()?;
        Ok(checksum)
    }
}

/// Errors that can occur while staging a sidecar
#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("failed to prepare staging directory '{path}': {source}")]
    Dir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("failed to spawn after-download hook: {0}")]
    HookSpawn(#[source] std::io::Error),

    #[error("after-download hook failed: {0}")]
    HookFailed(ExitStatus),
}

impl StagingError {
    fn dir(path: &Path, source: std::io::Error) -> Self {
        StagingError::Dir {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn spec_with_artifact(name: &str, uri: &str) -> SidecarSpec {
        SidecarSpec {
            name: name.to_string(),
            artifact_uri: uri.to_string(),
            artifact_type: "file".to_string(),
            executable: PathBuf::from("agent"),
            env: Default::default(),
            app_env: Default::default(),
            profile_d: String::new(),
            after_download: String::new(),
            is_rproxy: false,
        }
    }

    fn local_artifact(dir: &Path, content: &[u8]) -> String {
        let path = dir.join("agent");
        std::fs::write(&path, content).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_sidecar_dir_layout() {
        let dir = sidecar_dir(Path::new("/home/vcap/app"), "gobis");
        assert_eq!(dir, PathBuf::from("/home/vcap/app/.sidecars/gobis"));
    }

    #[test]
    fn test_exec_path_absolute_passthrough() {
        let mut spec = spec_with_artifact("s", "");
        spec.executable = PathBuf::from("/usr/bin/env");
        assert_eq!(
            sidecar_exec_path(Path::new("/base"), &spec),
            PathBuf::from("/usr/bin/env")
        );
    }

    #[test]
    fn test_stage_downloads_then_skips() {
        let src = TempDir::new().unwrap();
        let base = TempDir::new().unwrap();
        let uri = local_artifact(src.path(), b"v1");
        let spec = spec_with_artifact("agent", &uri);
        let stager = Stager::http();

        let outcome = stager.stage(base.path(), &spec, false).unwrap();
        assert_eq!(outcome, StageOutcome::Staged);
        let staged = sidecar_dir(base.path(), "agent").join("agent");
        assert_eq!(std::fs::read(&staged).unwrap(), b"v1");

        // directory now populated: second run is a no-op
        std::fs::write(src.path().join("agent"), b"v2").unwrap();
        let outcome = stager.stage(base.path(), &spec, false).unwrap();
        assert_eq!(outcome, StageOutcome::AlreadyStaged);
        assert_eq!(std::fs::read(&staged).unwrap(), b"v1");
    }

    #[test]
    fn test_stage_force_redownloads() {
        let src = TempDir::new().unwrap();
        let base = TempDir::new().unwrap();
        let uri = local_artifact(src.path(), b"v1");
        let spec = spec_with_artifact("agent", &uri);
        let stager = Stager::http();

        stager.stage(base.path(), &spec, false).unwrap();
        std::fs::write(src.path().join("agent"), b"v2").unwrap();

        let outcome = stager.stage(base.path(), &spec, true).unwrap();
        assert_eq!(outcome, StageOutcome::Staged);
        let staged = sidecar_dir(base.path(), "agent").join("agent");
        assert_eq!(std::fs::read(&staged).unwrap(), b"v2");
    }

    #[test]
    fn test_checksum_sentinel_without_artifact() {
        let spec = spec_with_artifact("bare", "");
        let stager = Stager::http();
        assert_eq!(stager.checksum(&spec).unwrap(), NO_ARTIFACT_CHECKSUM);
    }

    #[cfg(unix)]
    #[test]
    fn test_after_download_hook_failure() {
        let src = TempDir::new().unwrap();
        let base = TempDir::new().unwrap();
        let uri = local_artifact(src.path(), b"bin");
        let mut spec = spec_with_artifact("agent", &uri);
        spec.after_download = "exit 3".to_string();
        let stager = Stager::http();

        stager.stage(base.path(), &spec, false).unwrap();
        let result = stager.run_after_download(base.path(), &spec);
        assert!(matches!(result, Err(StagingError::HookFailed(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_after_download_hook_env_and_cwd() {
        let src = TempDir::new().unwrap();
        let base = TempDir::new().unwrap();
        let uri = local_artifact(src.path(), b"bin");
        let mut spec = spec_with_artifact("agent", &uri);
        spec.env.insert("MARKER".to_string(), "ready".to_string());
        spec.after_download = "echo \"$MARKER\" > hook_ran".to_string();
        let stager = Stager::http();

        stager.stage(base.path(), &spec, false).unwrap();
        stager.run_after_download(base.path(), &spec).unwrap();

        let output = sidecar_dir(base.path(), "agent").join("hook_ran");
        assert_eq!(std::fs::read_to_string(output).unwrap().trim(), "ready");
    }
}
