//! `sp500 serve` — daily scheduler plus HTTP API.

use anyhow::{Context, Result};
use clap::Args;

use sp500_daemon::{start_blocking, ServeOptions};

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Run one sync immediately instead of waiting for local midnight.
    #[arg(long)]
    pub sync_on_start: bool,
}

impl ServeArgs {
    pub fn run(self) -> Result<()> {
        let config = super::load_config()?;
        let options = ServeOptions {
            sync_on_start: self.sync_on_start,
        };
        start_blocking(config, options).context("daemon exited with error")
    }
}
