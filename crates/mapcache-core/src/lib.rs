//! # mapcache-core: Pure Domain Logic for the Map Cache
//!
//! This crate holds everything about the map cache that can be expressed
//! without touching a data store: how paths and selectors look, how poll
//! statistics are computed, when a binding is due, and what a job is.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Map Cache Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    apps/daemon (`mapcache`)                     │   │
//! │  │         run ──► populate ──► map add/remove/show ──► enable     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    mapcache-sync                                │   │
//! │  │   Scheduler ──► JobQueue ──► WorkerPool ──► CacheSynchronizer   │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ mapcache-core (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │ selector  │  │  schema   │  │   types   │  │   time    │  │   │
//! │  │   │  parse    │  │  paths    │  │ PollStats │  │  format   │  │   │
//! │  │   │  match    │  │           │  │  Job      │  │  is_due   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATA STORE • NO CLOCK READS                       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    mapcache-db (Data Store Layer)               │   │
//! │  │        DataStore traits, SQLite + memory stores, repository     │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (MappingKey, SyncTarget, Job, PollStats, etc.)
//! - [`selector`] - Path splitting and selector matching
//! - [`schema`] - Store paths of every map cache node
//! - [`time`] - Timestamp format, duration units, due-check
//! - [`error`] - Domain error types
//! - [`validation`] - Administrative input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use mapcache_core::{MappingKey, SyncTarget};
//! use mapcache_core::schema::source_key_selector;
//!
//! let mapping = MappingKey::new("/if/interface/name", "/if/interface/mtu");
//! mapping.validate().unwrap();
//!
//! let target = SyncTarget::new(mapping, "edge-1");
//! assert_eq!(
//!     source_key_selector(&target),
//!     "/devices/device[name='edge-1']/live-status/if/interface/name"
//! );
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod schema;
pub mod selector;
pub mod time;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Mapping-level update interval when none is configured (seconds).
pub const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 300;

/// Worker pool size when `worker-threads` is absent or unreadable.
pub const DEFAULT_WORKER_THREADS: usize = 1;

/// Upper bound on the worker pool size.
pub const MAX_WORKER_THREADS: usize = 64;

/// Upper bound on any update interval (one year).
pub const MAX_UPDATE_INTERVAL_SECS: u64 = 31_536_000;
