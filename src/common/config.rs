use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::errors::Result;
use crate::store::NEW_ENTRIES;
use crate::utils::logger::LoggerConfig;

/// Redis Configuration
#[derive(Serialize, Deserialize, Clone)]
pub struct RedisConfig {
    /// Redis server hostname
    pub redis_host: String,
    /// Redis server port
    pub redis_port: u16,
    /// Redis database index
    #[serde(default)]
    pub redis_db: u16,
    /// Optional Redis username
    pub redis_username: Option<String>,
    /// Optional Redis password
    pub redis_password: Option<String>,
    /// Connection pool size (default: 16)
    pub pool_size: Option<usize>,
}

impl fmt::Debug for RedisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisConfig")
            .field("redis_host", &self.redis_host)
            .field("redis_port", &self.redis_port)
            .field("redis_db", &self.redis_db)
            .field("redis_username", &self.redis_username)
            .field("redis_password", &self.redis_password.as_ref().map(|_| "***REDACTED***"))
            .field("pool_size", &self.pool_size)
            .finish()
    }
}

/// One publisher: the stream key it appends to and its length bound.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PublisherConfig {
    pub key: String,
    /// Approximate upper bound on the stream length; 0 keeps every entry.
    #[serde(default)]
    pub max_len: usize,
}

fn default_start_id() -> String {
    NEW_ENTRIES.to_string()
}

/// One consumer group subscription.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct GroupConfig {
    pub group: String,
    pub keys: Vec<String>,
    /// Where a newly created group starts reading (default: `$`, new entries only)
    #[serde(default = "default_start_id")]
    pub start_id: String,
    /// Consumer name; a random one is generated when absent
    pub consumer: Option<String>,
    /// Acknowledge entries on delivery
    #[serde(default)]
    pub no_ack: bool,
}

/// Top-level configuration file.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct QStreamConfig {
    pub redis: RedisConfig,
    #[serde(default)]
    pub publishers: Vec<PublisherConfig>,
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
    pub logger: Option<LoggerConfig>,
}

impl QStreamConfig {
    /// Loads configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)?;
        Self::from_toml(&config_str)
    }

    pub fn from_toml(config_str: &str) -> Result<Self> {
        Ok(toml::from_str(config_str)?)
    }

    pub fn publisher(&self, key: &str) -> Option<&PublisherConfig> {
        self.publishers.iter().find(|p| p.key == key)
    }

    pub fn group(&self, name: &str) -> Option<&GroupConfig> {
        self.groups.iter().find(|g| g.group == name)
    }
}
