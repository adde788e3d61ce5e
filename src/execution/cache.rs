//! Frame caching for the scheduler.
//!
//! Caches produced frames keyed by (node, frame index) so repeated requests
//! don't recompute. Entries are evicted least-recently-used first once the
//! memory budget is exceeded.

use crate::core::error::NodeId;
use crate::core::frame::VideoFrame;
use lru::LruCache;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

/// A cache key identifying one output frame of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameKey {
    /// The node ID.
    pub node_id: NodeId,
    /// The frame index.
    pub index: usize,
}

impl FrameKey {
    /// Create a new cache key.
    pub fn new(node_id: NodeId, index: usize) -> Self {
        Self { node_id, index }
    }
}

/// Cached entry with metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The cached frame.
    pub frame: VideoFrame,
    /// When the entry was created.
    pub created_at: Instant,
    /// Memory held by the frame's planes.
    pub memory_size: usize,
}

impl CacheEntry {
    fn new(frame: VideoFrame) -> Self {
        let memory_size = frame.memory_size();
        Self {
            frame,
            created_at: Instant::now(),
            memory_size,
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries evicted.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate hit ratio.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

/// Thread-safe, memory-bounded frame cache.
pub struct FrameCache {
    cache: Mutex<LruCache<FrameKey, CacheEntry>>,
    max_memory: AtomicUsize,
    current_memory: Mutex<usize>,
    enabled: AtomicBool,
    stats: Mutex<CacheStats>,
}

impl FrameCache {
    /// Create a cache limited to `max_memory_mb` megabytes.
    pub fn new(max_memory_mb: usize) -> Self {
        Self {
            cache: Mutex::new(LruCache::unbounded()),
            max_memory: AtomicUsize::new(max_memory_mb * 1024 * 1024),
            current_memory: Mutex::new(0),
            enabled: AtomicBool::new(true),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    /// Enable or disable caching. Disabling drops all entries.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        if !enabled {
            self.clear();
        }
    }

    /// Whether new frames are stored.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Change the memory limit, evicting immediately if over budget.
    pub fn set_max_memory_mb(&self, max_memory_mb: usize) {
        self.max_memory
            .store(max_memory_mb * 1024 * 1024, Ordering::SeqCst);
        self.evict_to_fit(0);
    }

    /// Current memory limit in bytes.
    pub fn max_memory(&self) -> usize {
        self.max_memory.load(Ordering::SeqCst)
    }

    /// Get a cached frame.
    pub fn get(&self, key: &FrameKey) -> Option<VideoFrame> {
        let mut cache = self.cache.lock();
        let mut stats = self.stats.lock();
        match cache.get(key) {
            Some(entry) => {
                stats.hits += 1;
                Some(entry.frame.clone())
            }
            None => {
                stats.misses += 1;
                None
            }
        }
    }

    /// Store a frame in the cache.
    pub fn put(&self, key: FrameKey, frame: VideoFrame) {
        if !self.is_enabled() {
            return;
        }
        let entry = CacheEntry::new(frame);
        let entry_size = entry.memory_size;
        if entry_size > self.max_memory() {
            return;
        }

        self.evict_to_fit(entry_size);
        *self.current_memory.lock() += entry_size;

        let replaced = self.cache.lock().put(key, entry);
        if let Some(replaced) = replaced {
            let mut current = self.current_memory.lock();
            *current = current.saturating_sub(replaced.memory_size);
        }
    }

    fn evict_to_fit(&self, incoming: usize) {
        let max_memory = self.max_memory();
        // Frames may hold nodes in their properties; drop them unlocked.
        let mut evicted = Vec::new();
        {
            let mut current = self.current_memory.lock();
            while *current + incoming > max_memory {
                let popped = self.cache.lock().pop_lru();
                match popped {
                    Some((_, entry)) => {
                        *current = current.saturating_sub(entry.memory_size);
                        self.stats.lock().evictions += 1;
                        evicted.push(entry);
                    }
                    None => break,
                }
            }
        }
        drop(evicted);
    }

    /// Invalidate a specific entry.
    pub fn invalidate(&self, key: &FrameKey) {
        let removed = self.cache.lock().pop(key);
        if let Some(entry) = removed {
            let mut current = self.current_memory.lock();
            *current = current.saturating_sub(entry.memory_size);
        }
    }

    /// Invalidate all entries for a node.
    pub fn invalidate_node(&self, node_id: NodeId) {
        let removed: Vec<CacheEntry> = {
            let mut cache = self.cache.lock();
            let keys_to_remove: Vec<_> = cache
                .iter()
                .filter(|(k, _)| k.node_id == node_id)
                .map(|(k, _)| *k)
                .collect();

            keys_to_remove
                .iter()
                .filter_map(|key| cache.pop(key))
                .collect()
        };

        let total_freed: usize = removed.iter().map(|entry| entry.memory_size).sum();
        let mut current = self.current_memory.lock();
        *current = current.saturating_sub(total_freed);
    }

    /// Clear the entire cache.
    pub fn clear(&self) {
        let old = std::mem::replace(&mut *self.cache.lock(), LruCache::unbounded());
        *self.current_memory.lock() = 0;
        drop(old);
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.stats.lock().clone()
    }

    /// Get current memory usage in bytes.
    pub fn memory_usage(&self) -> usize {
        *self.current_memory.lock()
    }

    /// Get number of cached entries.
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Check if cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FrameCache {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::format::{FormatRegistry, Preset};

    fn frame(width: usize, height: usize) -> VideoFrame {
        VideoFrame::new(FormatRegistry::new().preset(Preset::Gray8), width, height).freeze()
    }

    #[test]
    fn test_cache_put_get() {
        let cache = FrameCache::new(16);
        let key = FrameKey::new(NodeId::new(), 3);
        let stored = frame(64, 64);
        cache.put(key, stored.clone());

        let hit = cache.get(&key).unwrap();
        assert!(VideoFrame::ptr_eq(&hit, &stored));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_cache_miss() {
        let cache = FrameCache::new(16);
        assert!(cache.get(&FrameKey::new(NodeId::new(), 0)).is_none());
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(cache.stats().hit_ratio(), 0.0);
    }

    #[test]
    fn test_memory_eviction() {
        // 1 MB budget, each frame is 512 KB.
        let cache = FrameCache::new(1);
        let node = NodeId::new();
        for i in 0..3 {
            cache.put(FrameKey::new(node, i), frame(512, 1024));
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&FrameKey::new(node, 0)).is_none());
        assert!(cache.stats().evictions >= 1);
        assert!(cache.memory_usage() <= cache.max_memory());
    }

    #[test]
    fn test_invalidate_node() {
        let cache = FrameCache::new(16);
        let node1 = NodeId::new();
        let node2 = NodeId::new();
        for i in 0..5 {
            cache.put(FrameKey::new(node1, i), frame(8, 8));
        }
        let other_key = FrameKey::new(node2, 0);
        cache.put(other_key, frame(8, 8));
        assert_eq!(cache.len(), 6);

        cache.invalidate_node(node1);

        assert_eq!(cache.len(), 1);
        assert!(cache.get(&other_key).is_some());
    }

    #[test]
    fn test_disabled_cache_stores_nothing() {
        let cache = FrameCache::new(16);
        cache.set_enabled(false);
        let key = FrameKey::new(NodeId::new(), 0);
        cache.put(key, frame(8, 8));
        assert!(cache.is_empty());
        assert_eq!(cache.memory_usage(), 0);
    }
}
