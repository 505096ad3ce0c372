use anyhow::Result;
use pinset_core::{PinConnector, PinTypeFilter};

pub async fn run_ls(connector: &dyn PinConnector, filter: PinTypeFilter) -> Result<()> {
    let pins = connector.pin_ls(filter).await?;
    let mut pins: Vec<_> = pins.into_iter().collect();
    pins.sort_by(|a, b| a.0.cmp(&b.0));
    for (cid, status) in pins {
        println!("{cid} {status}");
    }
    Ok(())
}

pub async fn run_repo_stat(connector: &dyn PinConnector) -> Result<()> {
    let stat = connector.repo_stat().await?;
    println!("repo size:   {} bytes", stat.repo_size);
    println!("storage max: {} bytes", stat.storage_max);
    println!("objects:     {}", stat.num_objects);
    Ok(())
}
