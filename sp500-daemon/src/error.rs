use std::net::SocketAddr;

use thiserror::Error;

/// Error surface for daemon wiring and runtime.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error during {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("store error: {0}")]
    Store(#[from] sp500_sync::StoreError),

    #[error("fetcher error: {0}")]
    Fetch(#[from] sp500_sync::FetchError),

    #[error("{task} task failed: {message}")]
    Task { task: &'static str, message: String },
}

pub(crate) fn io_err(context: &'static str, source: std::io::Error) -> DaemonError {
    DaemonError::Io { context, source }
}
