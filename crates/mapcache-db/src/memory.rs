//! # In-Memory Store
//!
//! A [`DataStore`] that keeps the node tree in process memory.
//!
//! - Read transactions copy the tree when opened and never see later commits.
//! - Write transactions are serialized: `write()` waits until no other write
//!   transaction is open, then works on a private copy and records every
//!   operation. `commit()` replays the recorded operations onto the live tree
//!   under one lock, so other transactions see all of them or none.
//! - Dropping a write transaction discards its operations and lets the next
//!   writer in.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use mapcache_core::selector::Selector;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::DbResult;
use crate::store::{is_within, DataStore, ReadTransaction, StoreFuture, WriteTransaction};

#[derive(Debug, Clone, Default)]
struct Tree {
    next_seq: u64,
    nodes: HashMap<String, (u64, String)>,
}

impl Tree {
    fn select(&self, selector: &str) -> DbResult<Vec<(String, String)>> {
        let parsed = Selector::parse(selector)?;
        let mut matches: Vec<(u64, String, String)> = self
            .nodes
            .iter()
            .filter(|(path, _)| parsed.matches(path))
            .map(|(path, (seq, value))| (*seq, path.clone(), value.clone()))
            .collect();
        matches.sort_by_key(|(seq, _, _)| *seq);
        Ok(matches.into_iter().map(|(_, p, v)| (p, v)).collect())
    }

    fn get(&self, path: &str) -> Option<String> {
        self.nodes.get(path).map(|(_, value)| value.clone())
    }

    fn exists(&self, path: &str) -> bool {
        self.nodes.keys().any(|p| is_within(p, path))
    }

    fn apply(&mut self, op: &Op) {
        match op {
            Op::Put(path, value) => match self.nodes.get_mut(path) {
                Some(slot) => slot.1 = value.clone(),
                None => {
                    self.next_seq += 1;
                    self.nodes.insert(path.clone(), (self.next_seq, value.clone()));
                }
            },
            Op::Delete(path) => self.nodes.retain(|p, _| !is_within(p, path)),
        }
    }
}

#[derive(Debug, Clone)]
enum Op {
    Put(String, String),
    Delete(String),
}

/// In-memory store.
///
/// Clones share the same tree and the same write lock.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tree: Arc<Mutex<Tree>>,
    write_lock: Arc<AsyncMutex<()>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of leaves currently stored.
    pub fn len(&self) -> usize {
        self.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every `(path, value)` below `root`, in insertion order.
    ///
    /// Test helper for byte-for-byte state comparisons.
    pub fn dump(&self, root: &str) -> Vec<(String, String)> {
        let tree = self.lock();
        let mut nodes: Vec<(u64, String, String)> = tree
            .nodes
            .iter()
            .filter(|(path, _)| is_within(path, root))
            .map(|(path, (seq, value))| (*seq, path.clone(), value.clone()))
            .collect();
        nodes.sort_by_key(|(seq, _, _)| *seq);
        nodes.into_iter().map(|(_, p, v)| (p, v)).collect()
    }
}

impl DataStore for MemoryStore {
    fn read(&self) -> StoreFuture<'_, Box<dyn ReadTransaction>> {
        let view = self.lock().clone();
        Box::pin(async move { Ok(Box::new(MemoryReadTransaction { view }) as Box<dyn ReadTransaction>) })
    }

    fn write(&self) -> StoreFuture<'_, Box<dyn WriteTransaction>> {
        Box::pin(async move {
            let guard = Arc::clone(&self.write_lock).lock_owned().await;
            // Copy only once the lock is held so the view includes every
            // earlier commit.
            let view = self.lock().clone();
            Ok(Box::new(MemoryWriteTransaction {
                tree: Arc::clone(&self.tree),
                view,
                ops: Vec::new(),
                _guard: guard,
            }) as Box<dyn WriteTransaction>)
        })
    }
}

struct MemoryReadTransaction {
    view: Tree,
}

impl ReadTransaction for MemoryReadTransaction {
    fn select(&mut self, selector: &str) -> StoreFuture<'_, Vec<(String, String)>> {
        let result = self.view.select(selector);
        Box::pin(async move { result })
    }

    fn get(&mut self, path: &str) -> StoreFuture<'_, Option<String>> {
        let value = self.view.get(path);
        Box::pin(async move { Ok(value) })
    }

    fn exists(&mut self, path: &str) -> StoreFuture<'_, bool> {
        let found = self.view.exists(path);
        Box::pin(async move { Ok(found) })
    }
}

struct MemoryWriteTransaction {
    tree: Arc<Mutex<Tree>>,
    view: Tree,
    ops: Vec<Op>,
    _guard: OwnedMutexGuard<()>,
}

impl MemoryWriteTransaction {
    fn record(&mut self, op: Op) {
        self.view.apply(&op);
        self.ops.push(op);
    }
}

impl ReadTransaction for MemoryWriteTransaction {
    fn select(&mut self, selector: &str) -> StoreFuture<'_, Vec<(String, String)>> {
        let result = self.view.select(selector);
        Box::pin(async move { result })
    }

    fn get(&mut self, path: &str) -> StoreFuture<'_, Option<String>> {
        let value = self.view.get(path);
        Box::pin(async move { Ok(value) })
    }

    fn exists(&mut self, path: &str) -> StoreFuture<'_, bool> {
        let found = self.view.exists(path);
        Box::pin(async move { Ok(found) })
    }
}

impl WriteTransaction for MemoryWriteTransaction {
    fn put(&mut self, path: &str, value: &str) -> StoreFuture<'_, ()> {
        self.record(Op::Put(path.to_string(), value.to_string()));
        Box::pin(async { Ok(()) })
    }

    fn delete(&mut self, path: &str) -> StoreFuture<'_, ()> {
        self.record(Op::Delete(path.to_string()));
        Box::pin(async { Ok(()) })
    }

    fn commit(self: Box<Self>) -> StoreFuture<'static, ()> {
        let this = *self;
        {
            let mut live = this.tree.lock().unwrap_or_else(PoisonError::into_inner);
            for op in &this.ops {
                live.apply(op);
            }
        }
        Box::pin(async { Ok(()) })
    }
}
