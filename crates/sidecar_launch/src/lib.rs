//! Sidecar Launch
//!
//! A process-lifecycle orchestrator for a primary application and its
//! auxiliary sidecar processes. The launcher owns the full runtime lifetime
//! of every child it starts.
//!
//! # Overview
//!
//! The orchestrator runs in two phases:
//! - **Setup** stages each sidecar's artifact, accumulates the shared
//!   application environment in configuration order and persists profile
//!   scripts sourced at instance startup.
//! - **Launch** rebuilds the per-sidecar environments (including dynamic
//!   reverse-proxy chain ports), starts every process concurrently and
//!   supervises them until all exit or a termination signal triggers the
//!   graceful-then-forced shutdown protocol.
//!
//! # Example Config
//!
//! ```yaml
//! dir: /home/vcap/app
//! app_port: 8080
//!
//! starter:
//!   command: ["./my-app"]
//!   app_port: 8080
//!
//! sidecars:
//!   - name: gobis
//!     artifact_uri: "https://example.org/gobis.tgz"
//!     artifact_type: tgz
//!     executable: gobis
//!     is_rproxy: true
//!     profile_d: "export GOBIS_READY=1"
//!   - name: agent
//!     executable: bin/agent
//!     app_env:
//!       AGENT_URL: "http://localhost:${PROXY_APP_PORT}"
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod runtime;
pub mod staging;
pub mod starter;

pub use cli::LaunchArgs;
pub use config::{ConfigError, EnvMap, SidecarSpec, SidecarsConfig, TemplateError};
pub use error::LaunchError;
pub use runtime::{
    Launcher, Process, ProcessConfig, ProcessError, ProcessFactory, ShutdownSignal,
    ShutdownSupervisor, APP_PORT_ENV_KEY, PROXY_APP_PORT_ENV_KEY,
};
pub use staging::{Fetcher, FetchError, FetchSession, StageOutcome, Stager, StagingError};
pub use starter::{CloudStarter, Starter};
