pub mod serve;
pub mod show;
pub mod subscribe;
pub mod sync;

use std::future::Future;

use anyhow::{Context, Result};

use sp500_core::Config;
use sp500_daemon::{build_components, Components};

pub(crate) fn load_config() -> Result<Config> {
    Config::from_env().context("invalid configuration")
}

pub(crate) fn load_components() -> Result<Components> {
    let config = load_config()?;
    build_components(&config).context("failed to set up storage backends")
}

/// Drive a one-shot async command on a current-thread runtime.
pub(crate) fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    Ok(runtime.block_on(future))
}
