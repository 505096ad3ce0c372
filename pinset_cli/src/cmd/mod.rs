use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use pinset_core::PinConnector;
use pinset_tracker::PinTracker;

use crate::Commands;
use crate::config::ClusterConfig;

mod daemon;
mod pin;
mod reconcile;

pub use daemon::{run_ls, run_repo_stat};
pub use pin::{run_pin, run_unpin};
pub use reconcile::run_reconcile;

pub async fn run_command(cli_node: &str, node_config_file: PathBuf, cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Config { cmd } => cmd.run(cli_node, &node_config_file),
        Commands::Ls { filter } => {
            let (_, connector) = connect(&node_config_file)?;
            run_ls(connector.as_ref(), filter).await
        }
        Commands::RepoStat => {
            let (_, connector) = connect(&node_config_file)?;
            run_repo_stat(connector.as_ref()).await
        }
        Commands::Pin { cid, depth, name } => {
            let (_, tracker) = start_tracker(&node_config_file)?;
            let result = run_pin(&tracker, &cid, depth, name).await;
            tracker.shutdown().await;
            result
        }
        Commands::Unpin { cid } => {
            let (_, tracker) = start_tracker(&node_config_file)?;
            let result = run_unpin(&tracker, &cid).await;
            tracker.shutdown().await;
            result
        }
        Commands::Reconcile { interval } => {
            let (config, tracker) = start_tracker(&node_config_file)?;
            let result = run_reconcile(&tracker, &config.pins, interval).await;
            tracker.shutdown().await;
            result
        }
    }
}

fn connect(node_config_file: &Path) -> Result<(ClusterConfig, Arc<dyn PinConnector>)> {
    let config = ClusterConfig::load(node_config_file)?;
    let connector = config.connector.build()?;
    Ok((config, connector))
}

fn start_tracker(node_config_file: &Path) -> Result<(ClusterConfig, PinTracker)> {
    let (config, connector) = connect(node_config_file)?;
    let tracker = PinTracker::new(config.tracker.clone(), connector, &config.peer_name)?;
    Ok((config, tracker))
}
