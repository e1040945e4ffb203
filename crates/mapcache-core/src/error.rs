//! # Error Types
//!
//! Domain-specific error types for mapcache-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  mapcache-core errors (this file)                                      │
//! │  ├── CoreError        - Selector, mapping and timestamp failures       │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  mapcache-db errors (separate crate)                                   │
//! │  └── DbError          - Data store operation failures                  │
//! │                                                                         │
//! │  mapcache-sync errors (separate crate)                                 │
//! │  └── SyncError        - InvalidMapping / SourceRead / SyncWrite ...    │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → log / populate reply  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Key and value selectors do not address the same source table.
    ///
    /// ## When This Occurs
    /// - `/a/b/k` paired with `/a/c/v` (different parents)
    /// - Either selector is empty or has no leaf step
    ///
    /// Never retried: the mapping definition itself is wrong.
    #[error("Invalid mapping {key_selector} -> {value_selector}: {reason}")]
    InvalidMapping {
        key_selector: String,
        value_selector: String,
        reason: String,
    },

    /// Selector text could not be parsed.
    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    /// A stored timestamp could not be parsed.
    #[error("Invalid timestamp '{value}': {reason}")]
    InvalidTimestamp { value: String, reason: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Creates an InvalidMapping error.
    pub fn invalid_mapping(
        key_selector: impl Into<String>,
        value_selector: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        CoreError::InvalidMapping {
            key_selector: key_selector.into(),
            value_selector: value_selector.into(),
            reason: reason.into(),
        }
    }

    /// Creates an InvalidSelector error.
    pub fn invalid_selector(selector: impl Into<String>, reason: impl Into<String>) -> Self {
        CoreError::InvalidSelector {
            selector: selector.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before anything touches the data store, typically while
/// accepting administrative input (new mappings, device bindings, settings).
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_mapping_message() {
        let err = CoreError::invalid_mapping("/a/b/k", "/a/c/v", "different parents");
        assert_eq!(
            err.to_string(),
            "Invalid mapping /a/b/k -> /a/c/v: different parents"
        );
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "device".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
        assert_eq!(core_err.to_string(), "Validation error: device is required");
    }
}
