//! Environment-driven configuration.
//!
//! # API pattern
//!
//! - [`Config::from_lookup`] takes any `Fn(&str) -> Option<String>`; tests
//!   pass a closure over a map.
//! - [`Config::from_env`] delegates to it with `std::env::var`.
//!
//! Empty variables count as unset.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4";
pub const DEFAULT_AWS_REGION: &str = "ap-northeast-2";
pub const DEFAULT_S3_BUCKET: &str = "snp500-stocks";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SNAPSHOT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_SYNC_DEADLINE: Duration = Duration::from_secs(300);

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Which backend holds the snapshot slot and the subscriber set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackend {
    /// Write-through object store rooted at `DATA_DIR/<bucket>`.
    #[default]
    Object,
    /// Key-value cache with a TTL on the snapshot.
    Redis,
    /// Process-local cache; nothing survives a restart.
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "object" | "s3" | "file" => Ok(Self::Object),
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            _ => Err(()),
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreBackend::Object => write!(f, "object"),
            StoreBackend::Redis => write!(f, "redis"),
            StoreBackend::Memory => write!(f, "memory"),
        }
    }
}

/// Settings for the text-generation upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

/// Object-store and topic naming. The region is informational.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsConfig {
    pub region: String,
    pub bucket: String,
    pub topic_arn: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub data_dir: PathBuf,
    pub redis_url: String,
    pub snapshot_ttl: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    /// Deadline handed to each scheduled sync run.
    pub sync_deadline: Duration,
}

/// Complete process configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub openai: OpenAiConfig,
    pub aws: AwsConfig,
    pub store: StoreConfig,
    pub server: ServerConfig,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let openai = OpenAiConfig {
            api_key: get("OPENAI_API_KEY"),
            base_url: get("OPENAI_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_owned())
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_owned()),
            model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_owned()),
            timeout: secs(&get, "FETCH_TIMEOUT_SECS", DEFAULT_FETCH_TIMEOUT)?,
        };

        let aws = AwsConfig {
            region: get("AWS_REGION").unwrap_or_else(|| DEFAULT_AWS_REGION.to_owned()),
            bucket: get("AWS_S3_BUCKET").unwrap_or_else(|| DEFAULT_S3_BUCKET.to_owned()),
            topic_arn: get("AWS_SNS_TOPIC_ARN"),
        };

        let backend = match get("STORE_BACKEND") {
            None => StoreBackend::default(),
            Some(raw) => raw.parse().map_err(|()| ConfigError::Invalid {
                key: "STORE_BACKEND",
                value: raw,
                expected: "one of object, redis, memory",
            })?,
        };
        let store = StoreConfig {
            backend,
            data_dir: get("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_data_dir),
            redis_url: get("REDIS_URL").unwrap_or_else(|| DEFAULT_REDIS_URL.to_owned()),
            snapshot_ttl: secs(&get, "SNAPSHOT_TTL_SECS", DEFAULT_SNAPSHOT_TTL)?,
        };

        // SERVER_PORT wins over the PaaS-style PORT.
        let port_var = get("SERVER_PORT")
            .map(|v| ("SERVER_PORT", v))
            .or_else(|| get("PORT").map(|v| ("PORT", v)));
        let port = match port_var {
            None => DEFAULT_PORT,
            Some((key, raw)) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key,
                value: raw,
                expected: "a TCP port number",
            })?,
        };
        let server = ServerConfig {
            port,
            sync_deadline: secs(&get, "SYNC_DEADLINE_SECS", DEFAULT_SYNC_DEADLINE)?,
        };

        Ok(Self {
            openai,
            aws,
            store,
            server,
        })
    }

    /// Directory holding the object-store "bucket".
    pub fn bucket_dir(&self) -> PathBuf {
        self.store.data_dir.join(&self.aws.bucket)
    }
}

fn secs<G>(get: &G, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(n) if n > 0 => Ok(Duration::from_secs(n)),
            _ => Err(ConfigError::Invalid {
                key,
                value: raw,
                expected: "a positive number of seconds",
            }),
        },
    }
}

/// `<local data dir>/sp500`, or `./data` when the platform has none.
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("sp500"))
        .unwrap_or_else(|| PathBuf::from("data"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
