//! Signal-driven graceful-then-forced shutdown

use crate::runtime::process::{Process, ShutdownSignal};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Grace window between forwarding a signal and force-killing everything
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(20);

/// Supervises shutdown of the whole process table.
///
/// Runs as its own task from before the first child exists. On receipt of a
/// termination signal it waits for the launcher to hand over the fully
/// populated process table, marks every live process as expectedly
/// terminating, forwards the signal, and after the grace period kills
/// whatever is still alive.
pub struct ShutdownSupervisor {
    grace_period: Duration,
}

impl Default for ShutdownSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSupervisor {
    pub fn new() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_grace_period(grace_period: Duration) -> Self {
        Self { grace_period }
    }

    pub async fn run(
        self,
        mut signals: mpsc::Receiver<ShutdownSignal>,
        table_rx: oneshot::Receiver<Vec<Arc<Process>>>,
    ) {
        let Some(sig) = signals.recv().await else {
            return;
        };
        log::info!("Shutdown signal received, forwarding to processes");

        // The signal may arrive while the launcher is still building the
        // process table; the rendezvous resolves once every slot is filled.
        let Ok(table) = table_rx.await else {
            return;
        };

        for process in &table {
            if process.pid().is_none() {
                continue;
            }
            process.mark_signaled();
            process.deliver(sig);
        }

        tokio::time::sleep(self.grace_period).await;

        log::warn!("Grace period elapsed, force-killing remaining processes");
        for process in &table {
            process.mark_signaled();
            process.force_kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::os_env;
    use crate::runtime::process::ProcessConfig;
    use std::path::PathBuf;
    use std::time::Instant;

    fn sh_process(
        script: &str,
        tx: mpsc::Sender<crate::error::LaunchError>,
    ) -> Arc<Process> {
        Arc::new(Process::new(
            ProcessConfig {
                name: "stubborn".to_string(),
                program: PathBuf::from("sh"),
                args: vec!["-c".to_string(), script.to_string()],
                env: os_env(),
                working_dir: None,
            },
            tx,
        ))
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_signal_ignoring_process_is_killed_after_grace() {
        let (error_tx, mut error_rx) = mpsc::channel(10);
        // ignores SIGTERM, only SIGKILL can take it down
        let process = sh_process("trap '' TERM; while :; do sleep 1; done", error_tx);
        let run_task = tokio::spawn(process.clone().run());
        while process.pid().is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let grace = Duration::from_millis(300);
        let (signal_tx, signal_rx) = mpsc::channel(4);
        let (table_tx, table_rx) = oneshot::channel();
        let supervisor_task =
            tokio::spawn(ShutdownSupervisor::with_grace_period(grace).run(signal_rx, table_rx));

        let start = Instant::now();
        signal_tx.send(ShutdownSignal::Terminate).await.unwrap();
        table_tx.send(vec![process.clone()]).unwrap();

        tokio::time::timeout(Duration::from_secs(10), run_task)
            .await
            .expect("process was not killed")
            .unwrap();
        assert!(start.elapsed() >= grace);

        supervisor_task.await.unwrap();
        // signal-driven termination is expected, not an error
        assert!(error_rx.try_recv().is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cooperative_process_exits_within_grace() {
        let (error_tx, mut error_rx) = mpsc::channel(10);
        let process = sh_process("sleep 30", error_tx);
        let run_task = tokio::spawn(process.clone().run());
        while process.pid().is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let (signal_tx, signal_rx) = mpsc::channel(4);
        let (table_tx, table_rx) = oneshot::channel();
        tokio::spawn(
            ShutdownSupervisor::with_grace_period(Duration::from_secs(20)).run(signal_rx, table_rx),
        );

        let start = Instant::now();
        signal_tx.send(ShutdownSignal::Terminate).await.unwrap();
        table_tx.send(vec![process.clone()]).unwrap();

        tokio::time::timeout(Duration::from_secs(5), run_task)
            .await
            .expect("process did not exit on SIGTERM")
            .unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(error_rx.try_recv().is_err());
    }
}
