//! Store wrapper with injectable failures and call counters.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use mapcache_core::selector::keyed_step;
use mapcache_core::MappingKey;
use mapcache_db::{
    DataStore, DbError, MemoryStore, ReadTransaction, StoreFuture, WriteTransaction,
};

#[derive(Debug, Default)]
struct Faults {
    fail_reads: AtomicBool,
    fail_commits: AtomicBool,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

/// [`MemoryStore`] that can be told to fail and counts transactions.
#[derive(Debug, Clone, Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    faults: Arc<Faults>,
}

impl FaultyStore {
    pub fn new(inner: MemoryStore) -> Self {
        FaultyStore {
            inner,
            faults: Arc::default(),
        }
    }

    pub fn fail_reads(&self, fail: bool) {
        self.faults.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_commits(&self, fail: bool) {
        self.faults.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Total transactions opened (read and write).
    pub fn calls(&self) -> usize {
        self.faults.reads.load(Ordering::SeqCst) + self.faults.writes.load(Ordering::SeqCst)
    }
}

impl DataStore for FaultyStore {
    fn read(&self) -> StoreFuture<'_, Box<dyn ReadTransaction>> {
        self.faults.reads.fetch_add(1, Ordering::SeqCst);
        let fail = self.faults.fail_reads.load(Ordering::SeqCst);
        Box::pin(async move {
            if fail {
                return Err(DbError::QueryFailed("injected read failure".into()));
            }
            self.inner.read().await
        })
    }

    fn write(&self) -> StoreFuture<'_, Box<dyn WriteTransaction>> {
        self.faults.writes.fetch_add(1, Ordering::SeqCst);
        let fail_commit = self.faults.fail_commits.load(Ordering::SeqCst);
        Box::pin(async move {
            let inner = self.inner.write().await?;
            Ok(Box::new(FaultyWrite { inner, fail_commit }) as Box<dyn WriteTransaction>)
        })
    }
}

struct FaultyWrite {
    inner: Box<dyn WriteTransaction>,
    fail_commit: bool,
}

impl ReadTransaction for FaultyWrite {
    fn select(&mut self, selector: &str) -> StoreFuture<'_, Vec<(String, String)>> {
        self.inner.select(selector)
    }

    fn get(&mut self, path: &str) -> StoreFuture<'_, Option<String>> {
        self.inner.get(path)
    }

    fn exists(&mut self, path: &str) -> StoreFuture<'_, bool> {
        self.inner.exists(path)
    }
}

impl WriteTransaction for FaultyWrite {
    fn put(&mut self, path: &str, value: &str) -> StoreFuture<'_, ()> {
        self.inner.put(path, value)
    }

    fn delete(&mut self, path: &str) -> StoreFuture<'_, ()> {
        self.inner.delete(path)
    }

    fn commit(self: Box<Self>) -> StoreFuture<'static, ()> {
        if self.fail_commit {
            return Box::pin(async { Err(DbError::TransactionFailed("injected commit failure".into())) });
        }
        self.inner.commit()
    }
}

/// Mapping used across the sync tests: key `name`, value `mtu` of `/if/interface`.
pub fn interface_mapping() -> MappingKey {
    MappingKey::new("/if/interface/name", "/if/interface/mtu")
}

/// Replaces the source rows of `device` with `rows` as `(name, mtu)`.
pub async fn set_source_rows(store: &MemoryStore, device: &str, rows: &[(&str, &str)]) {
    let root = mapcache_core::schema::live_status_root(device);
    let mut tx = store.write().await.unwrap();
    tx.delete(&root).await.unwrap();
    for (name, mtu) in rows {
        let row = format!("{}/if/{}", root, keyed_step("interface", "name", name));
        tx.put(&format!("{}/name", row), name).await.unwrap();
        tx.put(&format!("{}/mtu", row), mtu).await.unwrap();
    }
    tx.commit().await.unwrap();
}
