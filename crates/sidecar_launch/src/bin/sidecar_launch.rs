//! Sidecar Launch CLI
//!
//! Usage:
//!   sidecar_launch -c sidecars.yml setup
//!   sidecar_launch -c sidecars.yml setup --force
//!   sidecar_launch -c sidecars.yml launch
//!   sidecar_launch -c sidecars.yml checksums

use sidecar_launch::cli::{Command, LaunchArgs};
use sidecar_launch::{CloudStarter, Launcher, SidecarsConfig, Stager, Starter};
use std::path::PathBuf;
use std::sync::Arc;

fn main() {
    let args: LaunchArgs = argh::from_env();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "error" => "error",
        "warn" => "warn",
        "info" => "info",
        "debug" => "debug",
        "trace" => "trace",
        _ => "info",
    };
    let env = env_logger::Env::default().default_filter_or(log_level);
    env_logger::init_from_env(env);

    log::info!("Loading config file: {}", args.config);
    let config = match SidecarsConfig::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            log::error!("Failed to load config file: {}", e);
            std::process::exit(1);
        }
    };

    let starter: Option<Arc<dyn Starter>> = config
        .starter
        .as_ref()
        .map(|c| Arc::new(CloudStarter::from_config(c)) as Arc<dyn Starter>);

    let launcher = Launcher::new(
        config,
        starter,
        Stager::http(),
        PathBuf::from(&args.profile_dir),
        args.default_port,
    );

    let result = match args.command {
        Command::Setup(cmd) => launcher.setup(cmd.force),
        Command::Checksums(_) => launcher.show_checksums(&mut std::io::stdout()),
        Command::Launch(_) => {
            // setup and checksums do blocking io only; the runtime exists
            // solely for the launch phase
            let runtime = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    log::error!("Failed to start async runtime: {}", e);
                    std::process::exit(1);
                }
            };
            runtime.block_on(launcher.launch())
        }
    };

    if let Err(e) = result {
        log::error!("{}", e);
        std::process::exit(1);
    }
    log::info!("Sidecar launcher exiting");
}
