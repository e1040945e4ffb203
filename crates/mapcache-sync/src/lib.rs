//! # mapcache-sync: Scheduling and Synchronization Core
//!
//! Keeps every map cache table in step with its source rows: a scheduler
//! decides which (mapping, device) bindings are due, a worker pool runs
//! them, and an on-demand trigger refreshes a binding immediately.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      MapCacheService                                    │
//! │                                                                         │
//! │  ┌──────────────┐   enqueue    ┌──────────────┐   dequeue              │
//! │  │  Scheduler   │─────────────►│   JobQueue   │──────────┐             │
//! │  │              │              │              │          │             │
//! │  │ gate check   │              │ priority     │          ▼             │
//! │  │ enabled flag │              │ dedup        │   ┌──────────────┐     │
//! │  │ backpressure │              │ leases       │   │ WorkerPool   │     │
//! │  │ due sweep    │              └──────────────┘   │ (N workers)  │     │
//! │  └──────┬───────┘                                 └──────┬───────┘     │
//! │         │                                                │             │
//! │         │            ┌──────────────┐                    │             │
//! │         └───────────►│   RoleGate   │◄───────────────────┤             │
//! │                      └──────────────┘                    │             │
//! │                                                          ▼             │
//! │  OnDemandTrigger ─────────────────────────────► CacheSynchronizer      │
//! │  (bypasses the queue)                           read snapshot,         │
//! │                                                 write table + stats    │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                   │
//!                                   ▼
//!                     DataStore (mapcache-db): SQLite or memory
//! ```
//!
//! ## Module Organization
//! - [`service`] - `MapCacheService` lifecycle (start / shutdown / status)
//! - [`scheduler`] - periodic due-check sweep
//! - [`worker`] - worker loop and pool
//! - [`queue`] - priority job queue with per-target deduplication
//! - [`synchronizer`] - one refresh of one binding
//! - [`trigger`] - on-demand populate
//! - [`role`] - role gate implementations
//! - [`config`] - process configuration (TOML + environment)
//! - [`shutdown`] - shutdown signalling
//! - [`error`] - sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mapcache_db::{Database, DbConfig};
//! use mapcache_sync::{MapCacheConfig, MapCacheService};
//!
//! let config = MapCacheConfig::load(None)?;
//! let db = Database::new(DbConfig::new(&config.database.path)).await?;
//!
//! let mut service = MapCacheService::builder(Arc::new(db))
//!     .with_config(config)
//!     .build()?;
//! service.start().await?;
//!
//! let output = service
//!     .trigger()
//!     .populate("/if/interface/name", "/if/interface/mtu", "edge-1")
//!     .await;
//!
//! service.shutdown().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod queue;
pub mod role;
pub mod scheduler;
pub mod service;
pub mod shutdown;
pub mod synchronizer;
pub mod trigger;
pub mod worker;

#[cfg(test)]
mod test_support;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{MapCacheConfig, RoleGateKind};
pub use error::{SyncError, SyncResult};
pub use queue::{Enqueued, JobLease, JobQueue};
pub use role::{HaRole, RoleGate, Standalone, StoreRoleGate, WatchRoleGate};
pub use scheduler::{Scheduler, SchedulerConfig, TickOutcome};
pub use service::{MapCacheService, MapCacheServiceBuilder, ServiceStatus};
pub use synchronizer::CacheSynchronizer;
pub use trigger::{OnDemandTrigger, PopulateOutput};
pub use worker::{Worker, WorkerConfig, WorkerContext, WorkerPool};
