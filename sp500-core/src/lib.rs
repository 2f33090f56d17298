//! sp500 core library: domain types, configuration, errors.
//!
//! - [`types`] — snapshot, stock, subscriber and change-event types
//! - [`config`] — environment configuration
//! - [`error`] — [`ValidationError`], [`ConfigError`]

pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, StoreBackend};
pub use error::{ConfigError, ValidationError};
pub use types::{ChangeEvent, Snapshot, Stock, SubscriberEmail};
