//! sp500 daemon: daily scheduler + JSON HTTP API over one sync pipeline.

mod components;
mod error;
pub mod http;
mod runtime;
pub mod schedule;

pub use components::{build_components, Components};
pub use error::DaemonError;
pub use http::{build_router, AppState};
pub use runtime::{init_tracing, run, serve, start_blocking, ServeOptions};
