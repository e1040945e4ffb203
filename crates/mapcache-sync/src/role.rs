//! # Role Gate
//!
//! Decides whether this process may write to the cache right now.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Role Gate Variants                              │
//! │                                                                         │
//! │  Standalone       always active (no HA arrangement)                    │
//! │                                                                         │
//! │  StoreRoleGate    /high-availability/mode                              │
//! │                     absent            → active                         │
//! │                     master | primary  → active                         │
//! │                     anything else     → inactive                       │
//! │                     read failure      → inactive (logged)              │
//! │                                                                         │
//! │  WatchRoleGate    follows a watch channel fed by an external election  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The scheduler and every worker ask the gate before doing anything, so an
//! inactive process neither enqueues nor writes.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use mapcache_core::schema::HA_MODE_PATH;
use mapcache_db::SharedStore;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::config::RoleGateKind;

/// Boxed future returned by [`RoleGate::is_active`].
pub type GateFuture<'a> = Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

/// Capability answering "may this instance write now?".
pub trait RoleGate: Send + Sync {
    fn is_active(&self) -> GateFuture<'_>;
}

/// Builds the gate selected in the process configuration.
pub fn from_kind(kind: RoleGateKind, store: SharedStore) -> Arc<dyn RoleGate> {
    match kind {
        RoleGateKind::Standalone => Arc::new(Standalone),
        RoleGateKind::Store => Arc::new(StoreRoleGate::new(store)),
    }
}

// =============================================================================
// Standalone
// =============================================================================

/// Gate for a process that is not part of an HA pair.
#[derive(Debug, Clone, Copy, Default)]
pub struct Standalone;

impl RoleGate for Standalone {
    fn is_active(&self) -> GateFuture<'_> {
        Box::pin(async { true })
    }
}

// =============================================================================
// Store-backed
// =============================================================================

/// Gate reading the HA mode leaf from the data store.
#[derive(Clone)]
pub struct StoreRoleGate {
    store: SharedStore,
}

impl StoreRoleGate {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    async fn read_mode(&self) -> mapcache_db::DbResult<Option<String>> {
        let mut tx = self.store.read().await?;
        tx.get(HA_MODE_PATH).await
    }
}

/// Returns true for the HA modes that hold the write role.
fn mode_is_active(mode: Option<&str>) -> bool {
    match mode {
        None => true,
        Some(mode) => matches!(mode.trim().to_lowercase().as_str(), "master" | "primary"),
    }
}

impl RoleGate for StoreRoleGate {
    fn is_active(&self) -> GateFuture<'_> {
        Box::pin(async move {
            match self.read_mode().await {
                Ok(mode) => {
                    let active = mode_is_active(mode.as_deref());
                    if !active {
                        debug!(mode = ?mode, "HA mode is not master; staying inactive");
                    }
                    active
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read HA mode; treating role as inactive");
                    false
                }
            }
        })
    }
}

impl std::fmt::Debug for StoreRoleGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreRoleGate").finish_non_exhaustive()
    }
}

// =============================================================================
// Watch-driven
// =============================================================================

/// Role reported by an external election mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaRole {
    Primary,
    Secondary,
    /// Not part of an HA arrangement.
    None,
}

impl HaRole {
    pub fn is_active(&self) -> bool {
        matches!(self, HaRole::Primary | HaRole::None)
    }
}

impl std::fmt::Display for HaRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HaRole::Primary => write!(f, "primary"),
            HaRole::Secondary => write!(f, "secondary"),
            HaRole::None => write!(f, "none"),
        }
    }
}

/// Gate following the latest value published on a watch channel.
#[derive(Debug, Clone)]
pub struct WatchRoleGate {
    role_rx: watch::Receiver<HaRole>,
}

impl WatchRoleGate {
    /// Creates a gate together with the sender that drives it.
    pub fn channel(initial: HaRole) -> (watch::Sender<HaRole>, Self) {
        let (role_tx, role_rx) = watch::channel(initial);
        (role_tx, Self { role_rx })
    }

    pub fn role(&self) -> HaRole {
        *self.role_rx.borrow()
    }
}

impl RoleGate for WatchRoleGate {
    fn is_active(&self) -> GateFuture<'_> {
        let active = self.role().is_active();
        Box::pin(async move { active })
    }
}
