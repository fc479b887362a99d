//! Bounded cache of loaded symbol tables, keyed by build id.
//!
//! Tables never change once written, so entries are handed out as
//! `Arc<SymbolTable>` and read without locking. The mutex only guards the
//! LRU bookkeeping and is never held while a file is being read.

use crate::symbols::SymbolTable;
use anyhow::Result;
use log::debug;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub struct SymbolCache {
    dir: PathBuf,
    tables: Mutex<LruCache<String, Arc<SymbolTable>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl SymbolCache {
    /// Cache over the `<id>.symbols` files in `dir`. A capacity of zero is
    /// treated as one.
    pub fn new(dir: &Path, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            dir: dir.to_path_buf(),
            tables: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Symbol table of `id`, loading it on a miss
    pub fn get(&self, id: &str) -> Result<Arc<SymbolTable>> {
        if let Ok(mut tables) = self.tables.lock()
            && let Some(table) = tables.get(id)
        {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(table));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let table = Arc::new(SymbolTable::load_for(&self.dir, id)?);

        if let Ok(mut tables) = self.tables.lock() {
            if let Some((evicted, _)) = tables.push(id.to_string(), Arc::clone(&table))
                && evicted != id
            {
                debug!("symbol cache full, evicted {}", evicted);
            }
        }

        Ok(table)
    }

    /// Whether `id` is cached, without touching its recency
    pub fn contains(&self, id: &str) -> bool {
        self.tables
            .lock()
            .map(|tables| tables.contains(id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.tables.lock().map(|tables| tables.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tables
            .lock()
            .map(|tables| tables.cap().get())
            .unwrap_or(0)
    }

    /// Fraction of lookups served from memory (0.0 - 1.0)
    pub fn hit_rate(&self) -> f32 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f32 / total as f32
        }
    }
}
