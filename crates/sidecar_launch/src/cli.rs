//! Command-line interface for sidecar-launch

use argh::FromArgs;

/// Process-lifecycle orchestrator for an application and its sidecars
#[derive(FromArgs, Debug)]
pub struct LaunchArgs {
    /// path to the sidecars config file
    #[argh(option, short = 'c', default = "String::from(\"sidecars.yml\")")]
    pub config: String,

    /// directory where profile scripts are written
    #[argh(option, short = 'p', default = "String::from(\".profile.d\")")]
    pub profile_dir: String,

    /// fallback application port when neither starter nor config set one
    #[argh(option, default = "8080")]
    pub default_port: u16,

    /// log level (error, warn, info, debug, trace)
    #[argh(option, short = 'l', default = "String::from(\"info\")")]
    pub log_level: String,

    #[argh(subcommand)]
    pub command: Command,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand)]
pub enum Command {
    Setup(SetupCmd),
    Launch(LaunchCmd),
    Checksums(ChecksumsCmd),
}

/// stage sidecar artifacts and write profile scripts
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "setup")]
pub struct SetupCmd {
    /// re-download artifacts even when already staged
    #[argh(switch, short = 'f')]
    pub force: bool,
}

/// start the application and its sidecars and supervise them
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "launch")]
pub struct LaunchCmd {}

/// list every sidecar with its artifact checksum
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "checksums")]
pub struct ChecksumsCmd {}
