#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use simplemerge::{
    config::{DaemonConfig, find_config_file},
    controller::Simplemerge,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = find_config_file()?;
    let config = DaemonConfig::load(&config_path)?;

    Simplemerge::new(config).run().await
}
