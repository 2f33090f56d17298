//! Domain types for the S&P 500 listing service.
//!
//! The snapshot content is kept as the raw text returned by the generation
//! service; `stocks` carries whatever the configured listing parser managed
//! to extract from it (empty by default).

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Longest address accepted by [`SubscriberEmail::parse`] (RFC 5321 path limit).
pub const MAX_EMAIL_LEN: usize = 254;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A validated subscriber address.
///
/// Only constructible through [`SubscriberEmail::parse`], so a registry of
/// these can never hold an empty or structurally invalid address.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct SubscriberEmail(String);

impl SubscriberEmail {
    /// Validate and wrap an address. Surrounding whitespace is trimmed.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let email = raw.trim();
        if email.is_empty() {
            return Err(ValidationError::EmptyEmail);
        }
        if email.len() > MAX_EMAIL_LEN {
            return Err(ValidationError::EmailTooLong { len: email.len() });
        }
        if email.chars().any(char::is_whitespace) {
            return Err(invalid(email, "contains whitespace"));
        }

        let mut parts = email.split('@');
        let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid(email, "expected exactly one '@'"));
        };
        if local.is_empty() {
            return Err(invalid(email, "empty local part"));
        }
        if domain.is_empty() {
            return Err(invalid(email, "empty domain"));
        }
        if !domain.contains('.') || domain.split('.').any(str::is_empty) {
            return Err(invalid(email, "malformed domain"));
        }

        Ok(Self(email.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn invalid(email: &str, reason: &'static str) -> ValidationError {
    ValidationError::MalformedEmail {
        email: email.to_owned(),
        reason,
    }
}

impl fmt::Display for SubscriberEmail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl AsRef<str> for SubscriberEmail {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for SubscriberEmail {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// One constituent of the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stock {
    pub ticker: String,
    pub name: String,
    pub market_cap: f64,
}

/// The single current listing, as persisted under `stocks.json`.
///
/// Replaced wholesale on every sync; there is no history beyond the value
/// read just before a save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub stocks: Vec<Stock>,
    #[serde(rename = "date")]
    pub as_of: NaiveDate,
    #[serde(default)]
    pub content: String,
}

impl Snapshot {
    pub fn new(content: impl Into<String>, as_of: NaiveDate) -> Self {
        Self {
            stocks: Vec::new(),
            as_of,
            content: content.into(),
        }
    }

    pub fn with_stocks(mut self, stocks: Vec<Stock>) -> Self {
        self.stocks = stocks;
        self
    }
}

/// Produced when freshly fetched content differs from the stored content.
///
/// Lives only for the duration of one sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// `None` on the very first sync.
    pub previous_content: Option<String>,
    pub new_content: String,
    pub as_of: NaiveDate,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
