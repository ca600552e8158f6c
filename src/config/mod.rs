//! Configuration management

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides `auth.jwt_secret`
pub const JWT_SECRET_ENV: &str = "CALLHUB_JWT_SECRET";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub signaling: SignalingConfig,
    pub lifecycle: LifecycleConfig,
    pub auth: AuthConfig,
    pub directory: DirectoryConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Per-connection and per-session signaling limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// Capacity of each client's outbound queue
    pub outbound_queue_capacity: usize,

    /// Messages held for a party that is not yet ready
    pub message_buffer_capacity: usize,

    /// Connection is considered dead after this much silence
    pub read_timeout_secs: u64,

    /// Interval between transport-level pings; must be below `read_timeout_secs`
    pub ping_interval_secs: u64,

    /// Deadline for a single frame write
    pub write_timeout_secs: u64,

    /// Call length budget
    pub max_session_minutes: u64,

    /// How often the duration budget is checked
    pub sweep_interval_secs: u64,

    /// Largest accepted inbound frame, in bytes
    pub max_message_size: usize,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: 256,
            message_buffer_capacity: 100,
            read_timeout_secs: 60,
            ping_interval_secs: 54,
            write_timeout_secs: 10,
            max_session_minutes: 30,
            sweep_interval_secs: 15,
            max_message_size: crate::protocol::MAX_MESSAGE_SIZE,
        }
    }
}

impl SignalingConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn max_session_duration(&self) -> Duration {
        Duration::from_secs(self.max_session_minutes * 60)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Join validation and persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Upper bound on any single store call made from the signaling path
    pub store_timeout_secs: u64,

    /// How long before the scheduled start a party may join
    pub join_early_minutes: i64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            store_timeout_secs: 5,
            join_early_minutes: 10,
        }
    }
}

impl LifecycleConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }
}

/// Token verification settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: Option<String>,
}

/// Seed data for the in-memory booking directory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub seed_path: Option<PathBuf>,
}

impl Config {
    /// Load config from the default path, or return defaults if not found
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load config from a specific file, or return defaults if it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str::<Config>(&content)?
        } else {
            Config::default()
        };

        if let Ok(secret) = std::env::var(JWT_SECRET_ENV) {
            config.auth.jwt_secret = Some(secret);
        }

        config.validate()?;
        Ok(config)
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("callhub")
            .join("config.toml")
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        let s = &self.signaling;
        if s.outbound_queue_capacity == 0 || s.message_buffer_capacity == 0 {
            bail!("signaling queue and buffer capacities must be non-zero");
        }
        if s.ping_interval_secs == 0 || s.ping_interval_secs >= s.read_timeout_secs {
            bail!(
                "ping_interval_secs ({}) must be non-zero and below read_timeout_secs ({})",
                s.ping_interval_secs,
                s.read_timeout_secs
            );
        }
        if s.sweep_interval_secs == 0 {
            bail!("sweep_interval_secs must be non-zero");
        }
        Ok(())
    }

    /// Address the HTTP listener binds to
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
