use crate::init_config::CmdConfig;
use anyhow::Context;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::InfoLevel;
use directories::ProjectDirs;
use pinset_core::PinTypeFilter;

mod cmd;
mod config;
mod init_config;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// which cluster peer config this command should use
    #[arg(short, long, value_name = "NAME", default_value = "local")]
    node: String,

    #[command(flatten)]
    verbosity: clap_verbosity_flag::Verbosity<InfoLevel>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Modify the peer's config
    Config {
        #[command(subcommand)]
        cmd: CmdConfig,
    },
    /// Pin a CID on the local daemon and wait for the outcome
    Pin {
        cid: String,
        /// -1 pins recursively, 0 pins only the root block
        #[arg(short, long, default_value_t = -1, allow_negative_numbers = true)]
        depth: i32,
        #[arg(long, default_value = "")]
        name: String,
    },
    /// Unpin a CID from the local daemon and wait for the outcome
    Unpin { cid: String },
    /// Bring the daemon in line with the pins listed in the config
    Reconcile {
        /// Repeat the sweep every SECS seconds until interrupted
        #[arg(long, value_name = "SECS")]
        interval: Option<u64>,
    },
    /// List the pins the daemon holds
    Ls {
        #[arg(short = 't', long = "type", default_value = "all")]
        filter: PinTypeFilter,
    },
    /// Show the daemon's repository statistics
    RepoStat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    // Configs live under ~/.config/pinset/<node>.toml
    let dirs = ProjectDirs::from("", "", "pinset")
        .context("failed to determine config directory path")?;
    let node_config_file = dirs.config_dir().join(&cli.node).with_extension("toml");

    cmd::run_command(&cli.node, node_config_file, cli.cmd).await
}
