use std::{fs, io::Write, path::Path};

use anyhow::Context;
use clap::Subcommand;
use pinset_connector_ipfs::{DEFAULT_NODE_ADDR, DEFAULT_REQUEST_TIMEOUT_SECS};
use pinset_tracker::{DEFAULT_CONCURRENT_PINS, DEFAULT_MAX_PIN_QUEUE_SIZE};
use toml_edit::{DocumentMut, Item, Table, value};
use tracing::info;

#[derive(Subcommand)]
pub enum CmdConfig {
    /// Creates the peer config file if it doesn't exist and fills in
    /// missing settings with their defaults
    Init,
}

impl CmdConfig {
    pub fn run(self, node_name: &str, node_config_file: &Path) -> anyhow::Result<()> {
        let mut doc = if node_config_file.exists() {
            fs::read_to_string(node_config_file)?
        } else {
            if let Some(parent) = node_config_file.parent() {
                fs::create_dir_all(parent)?;
            }
            String::new()
        }
        .parse::<DocumentMut>()
        .context("could not parse node config file")?;

        match self {
            Self::Init => fill_defaults(&mut doc, node_name)?,
        }

        info!("writing to config file {node_config_file:?}");

        let tmp_path = node_config_file.with_extension("tmp");
        let mut tmp = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        tmp.write_all(doc.to_string().as_bytes())?;
        tmp.sync_all()?;
        fs::rename(&tmp_path, node_config_file)?;
        Ok(())
    }
}

/// Adds every missing setting; values already present are left alone.
fn fill_defaults(doc: &mut DocumentMut, node_name: &str) -> anyhow::Result<()> {
    doc.entry("peer_name").or_insert(value(node_name));

    let tracker = table(doc, "tracker")?;
    tracker
        .entry("max_pin_queue_size")
        .or_insert(value(DEFAULT_MAX_PIN_QUEUE_SIZE as i64));
    tracker
        .entry("concurrent_pins")
        .or_insert(value(DEFAULT_CONCURRENT_PINS as i64));

    let connector = table(doc, "connector")?;
    if !connector.contains_key("type") {
        connector.insert("type", value("ipfs_http"));
        connector.insert("node_addr", value(DEFAULT_NODE_ADDR));
        connector.insert(
            "request_timeout_secs",
            value(DEFAULT_REQUEST_TIMEOUT_SECS as i64),
        );
    }
    Ok(())
}

fn table<'a>(doc: &'a mut DocumentMut, key: &str) -> anyhow::Result<&'a mut Table> {
    doc.entry(key)
        .or_insert(Item::Table(Table::new()))
        .as_table_mut()
        .with_context(|| format!("`{key}` in node config is not a table"))
}
