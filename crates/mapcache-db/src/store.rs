//! # DataStore Interface
//!
//! Transactional access to the hierarchical store, as consumed by the map
//! cache core.
//!
//! ## Transaction Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  DataStore::read()  ──► ReadTransaction                                │
//! │                          select / get / exists                          │
//! │                          one consistent point-in-time view              │
//! │                          released on drop                               │
//! │                                                                         │
//! │  DataStore::write() ──► WriteTransaction                               │
//! │                          everything a read transaction does, plus       │
//! │                          put / delete (subtree)                         │
//! │                          commit() applies all or nothing                │
//! │                          dropped without commit → rolled back           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Methods return boxed futures so the traits stay object safe and stores
//! can be shared as `Arc<dyn DataStore>`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::DbResult;

/// Boxed future returned by every store operation.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = DbResult<T>> + Send + 'a>>;

/// A read-only view of the store.
pub trait ReadTransaction: Send {
    /// Enumerates every leaf matching `selector` as `(path, value)`, in store
    /// insertion order.
    fn select(&mut self, selector: &str) -> StoreFuture<'_, Vec<(String, String)>>;

    /// Reads the leaf at `path`.
    fn get(&mut self, path: &str) -> StoreFuture<'_, Option<String>>;

    /// Returns true if a leaf exists at `path` or anywhere below it.
    fn exists(&mut self, path: &str) -> StoreFuture<'_, bool>;
}

/// A read-write transaction.
pub trait WriteTransaction: ReadTransaction {
    /// Creates or overwrites the leaf at `path`.
    ///
    /// Overwriting keeps the leaf's original insertion position.
    fn put(&mut self, path: &str, value: &str) -> StoreFuture<'_, ()>;

    /// Removes the node at `path` and its whole subtree.
    fn delete(&mut self, path: &str) -> StoreFuture<'_, ()>;

    /// Applies every change made in this transaction atomically.
    fn commit(self: Box<Self>) -> StoreFuture<'static, ()>;
}

/// A store that hands out transactions.
pub trait DataStore: Send + Sync + 'static {
    /// Opens a read transaction.
    fn read(&self) -> StoreFuture<'_, Box<dyn ReadTransaction>>;

    /// Opens a write transaction.
    fn write(&self) -> StoreFuture<'_, Box<dyn WriteTransaction>>;
}

/// Shared handle to any store.
pub type SharedStore = Arc<dyn DataStore>;

/// Returns true if `path` is `root` itself or lies below it.
pub(crate) fn is_within(path: &str, root: &str) -> bool {
    path == root
        || (path.len() > root.len() && path.starts_with(root) && path.as_bytes()[root.len()] == b'/')
}
