//! TTL-bounded cache for expensive remote reads, plus a `RemoteClient`
//! wrapper that reads through it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::{Block, ChildPage, Page, QueryRequest, RecordPage, RemoteClient, Table};
use crate::error::CoreError;
use crate::metrics;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: serde_json::Value,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Snapshot of cache activity. Counters are monotonically non-decreasing
/// for the lifetime of the cache; `size` is the current entry count.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
}

/// A plain string-keyed TTL cache. Reads take a shared lock; writes take
/// an exclusive lock. See §4.1 of the design spec for the eviction policy.
pub struct Cache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    max_size: usize,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl Cache {
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_size,
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Returns `None` on miss (including an observed-expired entry, which
    /// is removed in place).
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let now = Instant::now();
        {
            let guard = self.entries.read().unwrap();
            if let Some(entry) = guard.get(key) {
                if !entry.is_expired(now) {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    metrics::record_cache_hit();
                    return Some(entry.value.clone());
                }
            } else {
                self.misses.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_miss();
                return None;
            }
        }
        // Entry was present but expired: upgrade to an exclusive lock to remove it.
        let mut guard = self.entries.write().unwrap();
        guard.remove(key);
        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_miss();
        None
    }

    pub fn set(&self, key: impl Into<String>, value: serde_json::Value, ttl: Option<Duration>) {
        let key = key.into();
        let expires_at = Instant::now() + ttl.unwrap_or(self.default_ttl);
        let mut guard = self.entries.write().unwrap();

        if guard.len() >= self.max_size && !guard.contains_key(&key) {
            self.evict_one(&mut guard);
        }

        guard.insert(key, CacheEntry { value, expires_at });
    }

    fn evict_one(&self, guard: &mut HashMap<String, CacheEntry>) {
        let now = Instant::now();
        let victim = guard
            .iter()
            .find(|(_, entry)| entry.is_expired(now))
            .map(|(k, _)| k.clone())
            .or_else(|| guard.keys().next().cloned());

        if let Some(victim) = victim {
            guard.remove(&victim);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            metrics::record_cache_eviction();
            debug!(key = %victim, "evicted cache entry");
        }
    }

    pub fn delete(&self, key: &str) {
        self.entries.write().unwrap().remove(key);
    }

    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }

    pub fn size(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size: self.size(),
        }
    }

    fn page_key(id: &str) -> String {
        format!("page:{id}")
    }

    fn blocks_key(id: &str) -> String {
        format!("blocks:{id}")
    }

    fn table_key(id: &str) -> String {
        format!("table:{id}")
    }

    pub fn get_page(&self, id: &str) -> Option<Page> {
        self.get(&Self::page_key(id))
            .and_then(|v| serde_json::from_value(v).ok())
    }

    pub fn set_page(&self, page: &Page, ttl: Option<Duration>) {
        if let Ok(value) = serde_json::to_value(page) {
            self.set(Self::page_key(&page.id), value, ttl);
        }
    }

    pub fn get_blocks(&self, page_id: &str) -> Option<Vec<Block>> {
        self.get(&Self::blocks_key(page_id))
            .and_then(|v| serde_json::from_value(v).ok())
    }

    pub fn set_blocks(&self, page_id: &str, blocks: &[Block], ttl: Option<Duration>) {
        if let Ok(value) = serde_json::to_value(blocks) {
            self.set(Self::blocks_key(page_id), value, ttl);
        }
    }

    pub fn get_table(&self, id: &str) -> Option<Table> {
        self.get(&Self::table_key(id))
            .and_then(|v| serde_json::from_value(v).ok())
    }

    pub fn set_table(&self, table: &Table, ttl: Option<Duration>) {
        if let Ok(value) = serde_json::to_value(table) {
            self.set(Self::table_key(&table.id), value, ttl);
        }
    }

    /// Removes both the page entry and its cached blocks.
    pub fn invalidate_page(&self, id: &str) {
        self.delete(&Self::page_key(id));
        self.delete(&Self::blocks_key(id));
    }

    pub fn invalidate_table(&self, id: &str) {
        self.delete(&Self::table_key(id));
    }
}

/// Read-through/write-through wrapper around a [`RemoteClient`]. Reads
/// populate the cache on miss with the configured default TTL; mutations
/// invalidate before delegating.
pub struct CachedClient<C> {
    inner: C,
    cache: Cache,
    ttl: Duration,
}

impl<C: RemoteClient> CachedClient<C> {
    pub fn new(inner: C, max_size: usize, ttl: Duration) -> Self {
        Self {
            inner,
            cache: Cache::new(max_size, ttl),
            ttl,
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[async_trait]
impl<C: RemoteClient> RemoteClient for CachedClient<C> {
    async fn get_page(&self, cancel: &CancellationToken, id: &str) -> Result<Page, CoreError> {
        if let Some(page) = self.cache.get_page(id) {
            return Ok(page);
        }
        let page = self.inner.get_page(cancel, id).await?;
        self.cache.set_page(&page, Some(self.ttl));
        Ok(page)
    }

    async fn get_page_blocks(
        &self,
        cancel: &CancellationToken,
        id: &str,
    ) -> Result<Vec<Block>, CoreError> {
        if let Some(blocks) = self.cache.get_blocks(id) {
            return Ok(blocks);
        }
        let blocks = self.inner.get_page_blocks(cancel, id).await?;
        self.cache.set_blocks(id, &blocks, Some(self.ttl));
        Ok(blocks)
    }

    async fn get_table(&self, cancel: &CancellationToken, id: &str) -> Result<Table, CoreError> {
        if let Some(table) = self.cache.get_table(id) {
            return Ok(table);
        }
        let table = self.inner.get_table(cancel, id).await?;
        self.cache.set_table(&table, Some(self.ttl));
        Ok(table)
    }

    async fn query_table(
        &self,
        cancel: &CancellationToken,
        id: &str,
        request: QueryRequest,
    ) -> Result<RecordPage, CoreError> {
        self.inner.query_table(cancel, id, request).await
    }

    async fn list_children(
        &self,
        cancel: &CancellationToken,
        parent_id: &str,
        cursor: Option<String>,
    ) -> Result<ChildPage, CoreError> {
        self.inner.list_children(cancel, parent_id, cursor).await
    }

    async fn create_page(
        &self,
        cancel: &CancellationToken,
        parent_id: &str,
        properties: serde_json::Value,
    ) -> Result<Page, CoreError> {
        self.inner.create_page(cancel, parent_id, properties).await
    }

    async fn update_page_blocks(
        &self,
        cancel: &CancellationToken,
        id: &str,
        blocks: Vec<Block>,
    ) -> Result<(), CoreError> {
        self.cache.invalidate_page(id);
        self.inner.update_page_blocks(cancel, id, blocks).await
    }

    async fn delete_page(&self, cancel: &CancellationToken, id: &str) -> Result<(), CoreError> {
        self.cache.invalidate_page(id);
        self.inner.delete_page(cancel, id).await
    }
}
