//! # Sync Error Types
//!
//! Error types for scheduling, synchronization and service lifecycle.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │ Synchronization │  │  Configuration  │  │     Lifecycle           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidMapping │  │  InvalidConfig  │  │  Startup                │ │
//! │  │  SourceRead     │  │  ConfigLoad     │  │  InvalidState           │ │
//! │  │  SyncWrite      │  │                 │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  Per-job failures (left column) are logged by the worker that hit     │
//! │  them, or returned to the on-demand caller. Only Startup is fatal.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use mapcache_core::CoreError;
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering every failure of the core.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Synchronization Errors
    // =========================================================================
    /// The mapping or device of a job cannot be used.
    ///
    /// Raised before the data store is touched. Never retried.
    #[error("{0}")]
    InvalidMapping(CoreError),

    /// Reading the source snapshot failed. Nothing was written.
    #[error("Failed to read source data from device {device}: {reason}")]
    SourceRead { device: String, reason: String },

    /// Writing or committing the cache table failed. Nothing was written.
    #[error("Failed to write cache for {target}: {reason}")]
    SyncWrite { target: String, reason: String },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid process configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    /// The service could not establish a store session at startup.
    #[error("Startup failed: {0}")]
    Startup(String),

    /// Operation not valid in the current lifecycle state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    // =========================================================================
    // Store Errors
    // =========================================================================
    /// A configuration read or administrative write failed.
    #[error("Database error: {0}")]
    DatabaseError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<mapcache_db::DbError> for SyncError {
    fn from(err: mapcache_db::DbError) -> Self {
        SyncError::DatabaseError(err.to_string())
    }
}

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        SyncError::InvalidMapping(err)
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if running the same job again later may succeed.
    ///
    /// ## Retryable Errors
    /// - Source reads and cache writes (the next due cycle retries them)
    /// - Store errors
    ///
    /// ## Non-Retryable Errors
    /// - Invalid mappings
    /// - Configuration and lifecycle errors
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::SourceRead { .. } | SyncError::SyncWrite { .. } | SyncError::DatabaseError(_)
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_) | SyncError::ConfigLoadFailed(_)
        )
    }
}
