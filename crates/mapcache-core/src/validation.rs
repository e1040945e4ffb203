//! # Validation Module
//!
//! Input validation for administrative writes (new mappings, device
//! bindings, global settings).
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: CLI / caller                                                 │
//! │  └── Argument types (clap)                                             │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  ├── Device names and list keys are non-blank                          │
//! │  └── Intervals and worker counts are in range                          │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: CacheSynchronizer                                            │
//! │  └── Key/value selectors share a parent (InvalidMapping)               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::{MAX_UPDATE_INTERVAL_SECS, MAX_WORKER_THREADS};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validates a value that will be embedded as a list key predicate.
///
/// Any non-blank value can be quoted (see [`crate::selector::quote`]).
///
/// ## Rules
/// - Must not be empty or whitespace only
pub fn validate_list_key(field: &str, value: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    Ok(())
}

/// Validates a target device name.
///
/// ```rust
/// use mapcache_core::validation::validate_device;
///
/// assert!(validate_device("edge-router-1").is_ok());
/// assert!(validate_device("").is_err());
/// ```
pub fn validate_device(device: &str) -> ValidationResult<()> {
    validate_list_key("device", device)
}

/// Validates a per-mapping or per-device update interval (seconds).
pub fn validate_update_interval(secs: u64) -> ValidationResult<()> {
    if secs == 0 || secs > MAX_UPDATE_INTERVAL_SECS {
        return Err(ValidationError::OutOfRange {
            field: "update-interval".to_string(),
            min: 1,
            max: MAX_UPDATE_INTERVAL_SECS as i64,
        });
    }
    Ok(())
}

/// Validates the configured worker thread count.
pub fn validate_worker_threads(count: usize) -> ValidationResult<()> {
    if count == 0 || count > MAX_WORKER_THREADS {
        return Err(ValidationError::OutOfRange {
            field: "worker-threads".to_string(),
            min: 1,
            max: MAX_WORKER_THREADS as i64,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_key_quoting_rules() {
        assert!(validate_list_key("k", "/if/interface/name").is_ok());
        assert!(validate_list_key("k", "it's").is_ok());
        assert!(validate_list_key("k", "say \"hi\"").is_ok());
        assert!(validate_list_key("k", "it's \"both\"").is_ok());
        assert!(validate_list_key("k", "   ").is_err());
    }

    #[test]
    fn test_update_interval_range() {
        assert!(validate_update_interval(1).is_ok());
        assert!(validate_update_interval(MAX_UPDATE_INTERVAL_SECS).is_ok());
        assert!(validate_update_interval(0).is_err());
        assert!(validate_update_interval(MAX_UPDATE_INTERVAL_SECS + 1).is_err());
    }

    #[test]
    fn test_worker_threads_range() {
        assert!(validate_worker_threads(1).is_ok());
        assert!(validate_worker_threads(0).is_err());
        assert!(validate_worker_threads(MAX_WORKER_THREADS + 1).is_err());
    }
}
