//! Bounded, shareable cache of on-disk image artifacts.
//!
//! Each key owns a [`OnceCell`]; the map lock is held only long enough to
//! fetch or install the cell, and initialisation runs on the cell itself, so
//! concurrent lookups of one key run the initialiser once while different
//! keys proceed in parallel. Entries whose file no longer validates are
//! replaced on the next lookup. When the cache is full the oldest key is
//! evicted. Its file may still be in use by a task that looked it up
//! earlier, so it is only deleted by [`FileCache::purge_evicted`].

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OnceCell;

/// A cached value that may own a file on disk.
pub trait CacheEntry: Clone + Send + Sync + 'static {
    /// File deleted when the entry is evicted, if the cache owns one.
    fn owned_file(&self) -> Option<&Path>;
}

struct Slots<V> {
    cells: HashMap<String, Arc<OnceCell<V>>>,
    order: VecDeque<String>,
    evicted: Vec<PathBuf>,
}

pub struct FileCache<V> {
    name: &'static str,
    enabled: bool,
    capacity: usize,
    slots: Mutex<Slots<V>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: CacheEntry> FileCache<V> {
    pub fn new(name: &'static str, capacity: usize, enabled: bool) -> Self {
        Self {
            name,
            enabled,
            capacity: capacity.max(1),
            slots: Mutex::new(Slots {
                cells: HashMap::new(),
                order: VecDeque::new(),
                evicted: Vec::new(),
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Return the cached value for `key` if it passes `is_valid`, otherwise
    /// build it with `init` and cache it.
    ///
    /// A failed `init` leaves the key empty.
    pub async fn get_or_try_insert_with<F, Fut, E>(
        &self,
        key: &str,
        is_valid: impl Fn(&V) -> bool,
        init: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if !self.enabled {
            return init().await;
        }

        let cell = self.cell(key);
        let stale = match cell.get() {
            Some(value) if is_valid(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(cache = self.name, key, "cache hit");
                return Ok(value.clone());
            }
            Some(_) => true,
            None => false,
        };
        let cell = if stale {
            tracing::debug!(cache = self.name, key, "cached entry no longer valid, refreshing");
            self.replace_stale(key, &cell)
        } else {
            cell
        };

        let mut built = false;
        let value = cell
            .get_or_try_init(|| {
                built = true;
                init()
            })
            .await?
            .clone();

        let counter = if built { &self.misses } else { &self.hits };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.lock().cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delete the files of evicted entries. Call once no task can still be using them.
    pub fn purge_evicted(&self) {
        let evicted = std::mem::take(&mut self.lock().evicted);
        for file in &evicted {
            remove_file_quietly(file);
        }
    }

    /// (hits, misses) since creation.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits.load(Ordering::Relaxed), self.misses.load(Ordering::Relaxed))
    }

    fn lock(&self) -> MutexGuard<'_, Slots<V>> {
        // Every critical section is a single map edit, so a poisoned lock is still consistent.
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cell(&self, key: &str) -> Arc<OnceCell<V>> {
        let mut slots = self.lock();
        if let Some(cell) = slots.cells.get(key) {
            return Arc::clone(cell);
        }

        let cell = Arc::new(OnceCell::new());
        slots.cells.insert(key.to_string(), Arc::clone(&cell));
        slots.order.push_back(key.to_string());

        while slots.cells.len() > self.capacity {
            let Some(oldest) = slots.order.pop_front() else {
                break;
            };
            if let Some(evicted) = slots.cells.remove(&oldest) {
                tracing::debug!(cache = self.name, key = %oldest, "evicting cache entry");
                if let Some(file) = evicted.get().and_then(V::owned_file) {
                    slots.evicted.push(file.to_path_buf());
                }
            }
        }

        cell
    }

    /// Swap a stale cell for a fresh one unless another task already did.
    fn replace_stale(&self, key: &str, stale: &Arc<OnceCell<V>>) -> Arc<OnceCell<V>> {
        let mut slots = self.lock();
        let current = slots.cells.get(key).cloned();
        if let Some(current) = current.as_ref() {
            if !Arc::ptr_eq(current, stale) {
                return Arc::clone(current);
            }
        }

        let fresh = Arc::new(OnceCell::new());
        slots.cells.insert(key.to_string(), Arc::clone(&fresh));
        if current.is_none() {
            slots.order.push_back(key.to_string());
        }
        if let Some(file) = stale.get().and_then(V::owned_file) {
            remove_file_quietly(file);
        }
        fresh
    }
}

pub(crate) fn remove_file_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!(path = %path.display(), error = %e, "failed to remove cached file");
        }
    }
}
