//! Managed child process abstraction

use crate::config::EnvMap;
use crate::error::LaunchError;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Signal kinds forwarded to child processes during shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

#[cfg(unix)]
impl ShutdownSignal {
    fn as_nix(self) -> nix::sys::signal::Signal {
        match self {
            ShutdownSignal::Interrupt => nix::sys::signal::Signal::SIGINT,
            ShutdownSignal::Terminate => nix::sys::signal::Signal::SIGTERM,
        }
    }
}

/// Configuration for spawning a process
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Process name (for logging and error identity)
    pub name: String,
    /// Executable path
    pub program: PathBuf,
    /// Command line arguments
    pub args: Vec<String>,
    /// Full process environment (the OS environment is not inherited)
    pub env: EnvMap,
    /// Working directory
    pub working_dir: Option<PathBuf>,
}

/// A managed OS child process.
///
/// Created by the process factory, stored in the launcher's process table
/// and started exactly once. The live pid is published atomically so the
/// shutdown supervisor can deliver signals concurrently; 0 means the child
/// is not running.
#[derive(Debug)]
pub struct Process {
    config: ProcessConfig,
    pid: AtomicU32,
    /// Set by the shutdown supervisor before delivering a signal so the
    /// exit handler does not report the expected termination as an error
    suppress_exit_error: AtomicBool,
    /// Whether the child was started in its own process group, making
    /// group-wide signal delivery possible
    own_process_group: bool,
    error_tx: mpsc::Sender<LaunchError>,
}

impl Process {
    pub fn new(config: ProcessConfig, error_tx: mpsc::Sender<LaunchError>) -> Self {
        Self {
            config,
            pid: AtomicU32::new(0),
            suppress_exit_error: AtomicBool::new(false),
            own_process_group: cfg!(unix),
            error_tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn env(&self) -> &EnvMap {
        &self.config.env
    }

    pub fn program(&self) -> &PathBuf {
        &self.config.program
    }

    /// Live pid, or `None` when the child has not started or already exited
    pub fn pid(&self) -> Option<u32> {
        match self.pid.load(Ordering::Acquire) {
            0 => None,
            pid => Some(pid),
        }
    }

    /// Suppress error reporting for the upcoming signal-driven exit
    pub fn mark_signaled(&self) {
        self.suppress_exit_error.store(true, Ordering::Release);
    }

    /// Spawn the child and block until it exits, reporting any failure on
    /// the shared error channel. One task per process runs this.
    pub async fn run(self: Arc<Self>) {
        let mut cmd = tokio::process::Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .env_clear()
            .envs(&self.config.env)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }
        // own process group so shutdown signals reach the whole subtree
        #[cfg(unix)]
        cmd.process_group(0);

        log::info!(
            "[{}] Starting: {} {}",
            self.name(),
            self.config.program.display(),
            self.config.args.join(" ")
        );

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                log::error!("[{}] Failed to spawn: {}", self.name(), e);
                let _ = self.error_tx.try_send(
                    ProcessError::SpawnFailed {
                        name: self.name().to_string(),
                        source: e,
                    }
                    .into(),
                );
                return;
            }
        };

        if let Some(pid) = child.id() {
            self.pid.store(pid, Ordering::Release);
            log::info!("[{}] Started with pid {}", self.name(), pid);
        }

        let result = child.wait().await;
        self.pid.store(0, Ordering::Release);

        match result {
            Ok(status) if status.success() => {
                log::info!("[{}] Exited cleanly", self.name());
            }
            Ok(status) => {
                if self.suppress_exit_error.load(Ordering::Acquire) {
                    log::info!("[{}] Terminated by forwarded signal", self.name());
                } else {
                    log::error!("[{}] Exited with {}", self.name(), status);
                    let _ = self.error_tx.try_send(
                        ProcessError::RuntimeExit {
                            name: self.name().to_string(),
                            code: status.code(),
                        }
                        .into(),
                    );
                }
            }
            Err(e) => {
                log::error!("[{}] Wait failed: {}", self.name(), e);
                let _ = self.error_tx.try_send(
                    ProcessError::Wait {
                        name: self.name().to_string(),
                        source: e,
                    }
                    .into(),
                );
            }
        }
    }

    /// Deliver a shutdown signal to the child: group-wide when the child
    /// owns its process group, single-pid otherwise.
    pub fn deliver(&self, sig: ShutdownSignal) {
        let Some(pid) = self.pid() else { return };
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, killpg};
            use nix::unistd::Pid;

            let result = if self.own_process_group {
                killpg(Pid::from_raw(pid as i32), sig.as_nix())
            } else {
                kill(Pid::from_raw(pid as i32), sig.as_nix())
            };
            if let Err(e) = result {
                log::warn!("[{}] Signal delivery failed: {}", self.name(), e);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = (pid, sig);
            log::warn!(
                "[{}] Signal forwarding is not supported on this platform",
                self.name()
            );
        }
    }

    /// Unconditional kill, errors ignored
    pub fn force_kill(&self) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, killpg, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = self.pid() {
                let pid = Pid::from_raw(pid as i32);
                let _ = if self.own_process_group {
                    killpg(pid, Signal::SIGKILL)
                } else {
                    kill(pid, Signal::SIGKILL)
                };
            }
        }
    }
}

/// Errors that can occur with managed processes
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("process '{name}': executable not found at '{path}'")]
    ExecutableNotFound { name: String, path: PathBuf },

    #[error("process '{name}': empty launch command")]
    EmptyCommand { name: String },

    #[error("failed to spawn process '{name}': {source}")]
    SpawnFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("process '{name}' exited with failure (code {code:?})")]
    RuntimeExit { name: String, code: Option<i32> },

    #[error("failed to wait on process '{name}': {source}")]
    Wait {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LaunchError;

    fn sh_process(script: &str, tx: mpsc::Sender<LaunchError>) -> Arc<Process> {
        Arc::new(Process::new(
            ProcessConfig {
                name: "test".to_string(),
                program: PathBuf::from("sh"),
                args: vec!["-c".to_string(), script.to_string()],
                env: crate::config::os_env(),
                working_dir: None,
            },
            tx,
        ))
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_clean_exit_reports_no_error() {
        let (tx, mut rx) = mpsc::channel(10);
        sh_process("exit 0", tx).run().await;
        assert!(rx.try_recv().is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_exit_reports_runtime_error() {
        let (tx, mut rx) = mpsc::channel(10);
        sh_process("exit 3", tx).run().await;
        let err = rx.try_recv().unwrap();
        match err {
            LaunchError::Process(ProcessError::RuntimeExit { name, code }) => {
                assert_eq!(name, "test");
                assert_eq!(code, Some(3));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_suppressed_signal_exit_reports_no_error() {
        let (tx, mut rx) = mpsc::channel(10);
        let process = sh_process("sleep 30", tx);
        let task = tokio::spawn(process.clone().run());

        // wait for the pid to be published
        while process.pid().is_none() {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        process.mark_signaled();
        process.deliver(ShutdownSignal::Terminate);
        task.await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_spawn_failure_reports_error() {
        let (tx, mut rx) = mpsc::channel(10);
        let process = Arc::new(Process::new(
            ProcessConfig {
                name: "ghost".to_string(),
                program: PathBuf::from("/nonexistent/binary"),
                args: vec![],
                env: EnvMap::new(),
                working_dir: None,
            },
            tx,
        ));
        process.run().await;
        assert!(matches!(
            rx.try_recv().unwrap(),
            LaunchError::Process(ProcessError::SpawnFailed { .. })
        ));
    }
}
