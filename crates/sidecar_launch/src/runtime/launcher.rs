//! Launcher: drives setup (staging, profile scripts) and launch
//! (concurrent start, port negotiation, signal-driven shutdown)

use crate::config::{
    merge_env, os_env, override_env, shell_quote, templating_env, EnvMap, SidecarsConfig,
    TemplateError,
};
use crate::error::LaunchError;
use crate::runtime::factory::ProcessFactory;
use crate::runtime::process::{Process, ShutdownSignal};
use crate::runtime::supervisor::ShutdownSupervisor;
use crate::staging::{StageOutcome, Stager};
use crate::starter::Starter;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};

/// Variable communicating the current chain position to a reverse-proxy
/// sidecar
pub const PROXY_APP_PORT_ENV_KEY: &str = "PROXY_APP_PORT";

/// Canonical application port variable. Written to the starter profile by
/// setup and honored by launch when already present in the OS environment.
pub const APP_PORT_ENV_KEY: &str = "SIDECAR_APP_PORT";

// first error wins, the rest is best-effort
const ERROR_CHANNEL_CAPACITY: usize = 100;
const SIGNAL_CHANNEL_CAPACITY: usize = 16;

/// Orchestrates the full lifetime of the application and its sidecars
pub struct Launcher {
    config: SidecarsConfig,
    starter: Option<Arc<dyn Starter>>,
    stager: Stager,
    profile_dir: PathBuf,
    app_port: u16,
}

impl Launcher {
    /// The effective base app port is the starter's, falling back to the
    /// configured one, falling back to `default_app_port`.
    pub fn new(
        config: SidecarsConfig,
        starter: Option<Arc<dyn Starter>>,
        stager: Stager,
        profile_dir: PathBuf,
        default_app_port: u16,
    ) -> Self {
        let mut app_port = 0;
        if !config.no_starter {
            if let Some(s) = &starter {
                app_port = s.app_port();
            }
        }
        if app_port == 0 {
            app_port = config.app_port;
        }
        if app_port == 0 {
            app_port = default_app_port;
        }
        Self {
            config,
            starter,
            stager,
            profile_dir,
            app_port,
        }
    }

    fn active_starter(&self) -> Option<&Arc<dyn Starter>> {
        if self.config.no_starter {
            None
        } else {
            self.starter.as_ref()
        }
    }

    /// Stage artifacts, accumulate the shared environment and persist the
    /// profile scripts.
    pub fn setup(&self, force: bool) -> Result<(), LaunchError> {
        log::info!("Setting up sidecars");
        std::fs::create_dir_all(&self.profile_dir)?;
        self.download_artifacts(force)?;

        let mut app_env = EnvMap::new();
        let mut app_port = self.app_port;
        for (index, sidecar) in self.config.sidecars.iter().enumerate() {
            log::info!("[{}] Setup", sidecar.name);
            let expanded = templating_env(&app_env, &sidecar.app_env)
                .map_err(|e| LaunchError::for_sidecar(&sidecar.name, e))?;
            app_env = merge_env(&app_env, &expanded);
            if sidecar.is_rproxy {
                app_port += 1;
            }
            if !sidecar.profile_d.is_empty() {
                log::info!("[{}] Writing profile script", sidecar.name);
                self.write_profile_script(
                    &format!("{}_{}.sh", index + 1, sidecar.name),
                    &sidecar.profile_d,
                )?;
            }
        }
        log::info!("Finished setting up sidecars");

        let Some(starter) = self.active_starter() else {
            return Ok(());
        };
        if app_port != self.app_port {
            // the starter learns the final proxied port, the app keeps its
            // original one
            app_env = merge_env(&app_env, &starter.proxy_env(app_port));
            app_env.insert(APP_PORT_ENV_KEY.to_string(), self.app_port.to_string());
        }

        log::info!(
            "Writing starter profile for {}",
            starter.cloud_env_name()
        );
        let mut profile = String::new();
        for (key, value) in &app_env {
            profile.push_str(&format!("export {}={}\n", key, shell_quote(value)));
        }
        // the 0 prefix sorts before every sidecar-numbered script
        self.write_profile_script("0_starter.sh", &profile)?;
        Ok(())
    }

    fn write_profile_script(&self, file_name: &str, contents: &str) -> Result<(), LaunchError> {
        let path = self.profile_dir.join(file_name);
        std::fs::write(&path, contents)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        }
        Ok(())
    }

    /// Stage every sidecar artifact and run the after-download hooks.
    ///
    /// Compatibility quirk, preserved on purpose: when a sidecar's staging
    /// directory is already populated and `force` is false, the whole run
    /// is treated as staged and the remaining sidecars are skipped, not
    /// just the populated one.
    pub fn download_artifacts(&self, force: bool) -> Result<(), LaunchError> {
        log::info!("Downloading sidecar artifacts");
        for sidecar in self.config.sidecars.iter().filter(|s| s.has_artifact()) {
            let outcome = self
                .stager
                .stage(&self.config.dir, sidecar, force)
                .map_err(|e| LaunchError::for_sidecar(&sidecar.name, e))?;
            if outcome == StageOutcome::AlreadyStaged {
                log::info!(
                    "[{}] Directory not empty, assuming all sidecars already staged",
                    sidecar.name
                );
                return Ok(());
            }
            self.stager
                .run_after_download(&self.config.dir, sidecar)
                .map_err(|e| LaunchError::for_sidecar(&sidecar.name, e))?;
        }
        log::info!("Finished downloading sidecar artifacts");
        Ok(())
    }

    /// Render the sidecar-name/artifact-checksum listing
    pub fn show_checksums(&self, out: &mut dyn Write) -> Result<(), LaunchError> {
        let mut rows = Vec::new();
        for sidecar in &self.config.sidecars {
            let checksum = self
                .stager
                .checksum(sidecar)
                .map_err(|e| LaunchError::for_sidecar(&sidecar.name, e))?;
            rows.push((sidecar.name.clone(), checksum));
        }

        let header = "SIDECAR NAME";
        let name_width = rows
            .iter()
            .map(|(name, _)| name.len())
            .chain(std::iter::once(header.len()))
            .max()
            .unwrap_or(header.len());
        writeln!(out, "{header:<name_width$}  CHECKSUM")?;
        for (name, checksum) in &rows {
            writeln!(out, "{name:<name_width$}  {checksum}")?;
        }
        Ok(())
    }

    /// Start every sidecar plus the starter concurrently and supervise them
    /// until all have exited or a termination signal shuts them down.
    pub async fn launch(&self) -> Result<(), LaunchError> {
        let (error_tx, mut error_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);
        let signal_task = spawn_signal_listener(signal_tx);

        // the supervisor runs from before the first child exists; it gets
        // the process table through the rendezvous once building is done
        let (table_tx, table_rx) = oneshot::channel();
        let supervisor_task = tokio::spawn(ShutdownSupervisor::new().run(signal_rx, table_rx));

        let factory = ProcessFactory::new(
            self.config.dir.clone(),
            self.active_starter().cloned(),
            error_tx,
        );

        let result: Result<(), LaunchError> = async {
            let processes = self.build_processes(&factory)?;
            log::info!("Launching {} processes", processes.len());
            let _ = table_tx.send(processes.clone());

            let mut tasks = JoinSet::new();
            for process in &processes {
                tasks.spawn(Arc::clone(process).run());
            }
            // termination barrier: a panicking process task must not keep
            // its siblings from completing or reporting
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    if e.is_panic() {
                        log::error!("Process task panicked: {e}");
                    }
                }
            }
            Ok(())
        }
        .await;

        supervisor_task.abort();
        signal_task.abort();

        result?;
        match error_rx.try_recv() {
            Ok(err) => Err(err),
            Err(_) => Ok(()),
        }
    }

    /// Build the process table in configuration order, mirroring setup's
    /// environment accumulation and assigning proxy-chain ports.
    fn build_processes(&self, factory: &ProcessFactory) -> Result<Vec<Arc<Process>>, LaunchError> {
        let process_count =
            self.config.sidecars.len() + usize::from(self.active_starter().is_some());
        let mut processes = Vec::with_capacity(process_count);

        let mut app_env = os_env();
        let mut app_port = self.app_port;
        // setup may have fixed the port in a separate invocation
        if let Ok(value) = std::env::var(APP_PORT_ENV_KEY) {
            app_port = value
                .parse()
                .map_err(|source| LaunchError::InvalidPort { value, source })?;
        }

        for sidecar in &self.config.sidecars {
            let wrap = |e: TemplateError| LaunchError::for_sidecar(&sidecar.name, e);

            let mut env = override_env(&os_env(), &sidecar.env).map_err(wrap)?;
            if sidecar.is_rproxy {
                if let Some(starter) = self.active_starter() {
                    env = override_env(&env, &starter.proxy_env(app_port)).map_err(wrap)?;
                }
                app_port += 1;
                env.insert(PROXY_APP_PORT_ENV_KEY.to_string(), app_port.to_string());
            }

            let expanded = templating_env(&app_env, &sidecar.app_env).map_err(wrap)?;
            app_env = merge_env(&app_env, &expanded);

            processes.push(factory.from_sidecar(sidecar, env)?);
        }

        if let Some(starter) = self.active_starter() {
            if app_port != self.app_port {
                app_env = merge_env(&app_env, &starter.proxy_env(app_port));
                app_env.insert(APP_PORT_ENV_KEY.to_string(), self.app_port.to_string());
            }
            processes.push(factory.from_starter(&app_env, &self.profile_dir)?);
        }

        Ok(processes)
    }
}

/// Forward interrupt/termination signals from the OS into the supervisor's
/// channel. Non-Unix platforms only get Ctrl+C.
fn spawn_signal_listener(tx: mpsc::Sender<ShutdownSignal>) -> JoinHandle<()> {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let (mut interrupt, mut terminate) =
                match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
                    (Ok(i), Ok(t)) => (i, t),
                    _ => {
                        log::error!("Failed to install signal handlers");
                        return;
                    }
                };
            loop {
                let sig = tokio::select! {
                    _ = interrupt.recv() => ShutdownSignal::Interrupt,
                    _ = terminate.recv() => ShutdownSignal::Terminate,
                };
                if tx.send(sig).await.is_err() {
                    return;
                }
            }
        }
        #[cfg(not(unix))]
        {
            loop {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                if tx.send(ShutdownSignal::Interrupt).await.is_err() {
                    return;
                }
            }
        }
    })
}
