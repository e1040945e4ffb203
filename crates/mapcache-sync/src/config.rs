//! # Process Configuration
//!
//! Configuration for the map cache service process.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     MAPCACHE_DB_PATH=/var/lib/mapcache/mapcache.db                     │
//! │     MAPCACHE_TICK_SECS=10                                              │
//! │     MAPCACHE_ROLE_GATE=store                                           │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/mapcache/mapcache.toml (Linux)                           │
//! │     ~/Library/Application Support/org.mapcache.mapcache/... (macOS)    │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Runtime settings (`enabled`, worker count, mapping definitions) are not
//! here: they live in the data store and are read on every tick.
//!
//! ## Configuration File Format
//! ```toml
//! [database]
//! path = "/var/lib/mapcache/mapcache.db"   # ":memory:" for an in-memory store
//! max_connections = 5
//!
//! [scheduler]
//! tick_interval_secs = 30
//! inactive_backoff_secs = 60
//!
//! [workers]
//! poll_timeout_ms = 1000
//!
//! [ha]
//! role_gate = "standalone"                 # standalone | store
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

/// Path value selecting an in-memory store.
pub const IN_MEMORY_PATH: &str = ":memory:";

// =============================================================================
// Role Gate Selection
// =============================================================================

/// Which [`RoleGate`](crate::role::RoleGate) the process runs behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleGateKind {
    /// No HA arrangement: always active.
    #[default]
    Standalone,

    /// Read the HA mode from the data store on every check.
    Store,
}

impl std::fmt::Display for RoleGateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoleGateKind::Standalone => write!(f, "standalone"),
            RoleGateKind::Store => write!(f, "store"),
        }
    }
}

impl std::str::FromStr for RoleGateKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "standalone" | "none" => Ok(RoleGateKind::Standalone),
            "store" | "ha" => Ok(RoleGateKind::Store),
            other => Err(SyncError::InvalidConfig(format!(
                "Unknown role gate: '{}'. Valid options: standalone, store",
                other
            ))),
        }
    }
}

// =============================================================================
// Sections
// =============================================================================

/// Where the data store lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file path, or `:memory:`.
    #[serde(default = "default_database_path")]
    pub path: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    directories::ProjectDirs::from("org", "mapcache", "mapcache")
        .map(|dirs| dirs.data_dir().join("mapcache.db").to_string_lossy().into_owned())
        .unwrap_or_else(|| "mapcache.db".to_string())
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseSettings {
    pub fn is_in_memory(&self) -> bool {
        self.path == IN_MEMORY_PATH
    }
}

/// Scheduler timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Seconds between due-check sweeps while active.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// Seconds between role checks while inactive.
    #[serde(default = "default_inactive_backoff")]
    pub inactive_backoff_secs: u64,
}

fn default_tick_interval() -> u64 {
    30
}

fn default_inactive_backoff() -> u64 {
    60
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        SchedulerSettings {
            tick_interval_secs: default_tick_interval(),
            inactive_backoff_secs: default_inactive_backoff(),
        }
    }
}

/// Worker timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// How long a worker waits on an empty queue before re-checking the gate.
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_ms: u64,
}

fn default_poll_timeout() -> u64 {
    1000
}

impl Default for WorkerSettings {
    fn default() -> Self {
        WorkerSettings {
            poll_timeout_ms: default_poll_timeout(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HaSettings {
    #[serde(default)]
    pub role_gate: RoleGateKind,
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete process configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MapCacheConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub scheduler: SchedulerSettings,

    #[serde(default)]
    pub workers: WorkerSettings,

    #[serde(default)]
    pub ha: HaSettings,
}

impl MapCacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (mapcache.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading map cache config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.database.path.trim().is_empty() {
            return Err(SyncError::InvalidConfig("database.path must not be empty".into()));
        }

        if self.database.max_connections == 0 {
            return Err(SyncError::InvalidConfig(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        if self.scheduler.tick_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "scheduler.tick_interval_secs must be greater than 0".into(),
            ));
        }

        if self.scheduler.inactive_backoff_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "scheduler.inactive_backoff_secs must be greater than 0".into(),
            ));
        }

        if self.workers.poll_timeout_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "workers.poll_timeout_ms must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Applies `MAPCACHE_*` overrides from `lookup`.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("MAPCACHE_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = path;
        }

        if let Some(secs) = lookup("MAPCACHE_TICK_SECS") {
            match secs.parse::<u64>() {
                Ok(s) => self.scheduler.tick_interval_secs = s,
                Err(_) => warn!(value = %secs, "Ignoring invalid MAPCACHE_TICK_SECS"),
            }
        }

        if let Some(gate) = lookup("MAPCACHE_ROLE_GATE") {
            match gate.parse() {
                Ok(kind) => {
                    debug!(role_gate = %gate, "Overriding role gate from environment");
                    self.ha.role_gate = kind;
                }
                Err(e) => warn!("{}", e),
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "mapcache", "mapcache")
            .map(|dirs| dirs.config_dir().join("mapcache.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.tick_interval_secs)
    }

    pub fn inactive_backoff(&self) -> Duration {
        Duration::from_secs(self.scheduler.inactive_backoff_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.workers.poll_timeout_ms)
    }
}
