//! The core: formats, filters, worker pool, cache and message handlers.
//!
//! A [`Core`] is a cheap handle; clones share the same state. Nodes keep
//! their core alive, so a core lives as long as any node created from it.

use crate::core::config::CoreConfig;
use crate::core::error::{ArgumentResult, ConfigError, FormatResult, FramegraphResult};
use crate::core::format::{ColorFamily, FormatId, FormatRegistry, PixelFormat, Preset, SampleType};
use crate::core::message::{LogHandle, LogHandlers, MessageType};
use crate::core::node::{Filter, Node};
use crate::core::props::PropertyMap;
use crate::execution::cache::{CacheStats, FrameCache};
use crate::execution::pool::WorkerPool;
use crate::execution::scheduler::{Scheduler, SchedulerStats};
use crate::filters::registry::{Category, FilterRegistry};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

pub(crate) struct CoreInner {
    pub(crate) formats: FormatRegistry,
    pub(crate) scheduler: Scheduler,
    pub(crate) log: LogHandlers,
    registry: RwLock<FilterRegistry>,
    config: RwLock<CoreConfig>,
}

/// Handle to a frame server core.
#[derive(Clone)]
pub struct Core {
    inner: Arc<CoreInner>,
}

impl Core {
    /// Create a core with the default configuration.
    pub fn new() -> FramegraphResult<Self> {
        Self::with_config(CoreConfig::default())
    }

    /// Create a core with `threads` workers.
    pub fn with_threads(threads: usize) -> FramegraphResult<Self> {
        Self::with_config(CoreConfig::default().with_threads(threads))
    }

    /// Create a core from a configuration.
    pub fn with_config(config: CoreConfig) -> FramegraphResult<Self> {
        config.validate()?;
        let threads = config.resolved_threads();
        let pool = WorkerPool::new(threads)?;
        let cache = FrameCache::new(config.max_cache_size_mb);
        cache.set_enabled(config.cache_enabled);

        log::debug!(
            "core created: {} threads, {} MB cache{}",
            threads,
            config.max_cache_size_mb,
            if config.cache_enabled { "" } else { " (disabled)" }
        );

        Ok(Self {
            inner: Arc::new(CoreInner {
                formats: FormatRegistry::new(),
                scheduler: Scheduler::new(pool, cache),
                log: LogHandlers::new(),
                registry: RwLock::new(FilterRegistry::with_builtins()),
                config: RwLock::new(config),
            }),
        })
    }

    pub(crate) fn from_inner(inner: Arc<CoreInner>) -> Self {
        Self { inner }
    }

    /// Whether two handles refer to the same core.
    pub fn ptr_eq(a: &Core, b: &Core) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Current configuration, including runtime changes.
    pub fn config(&self) -> CoreConfig {
        self.inner.config.read().clone()
    }

    // ========================================================================
    // Formats
    // ========================================================================

    /// Register (or find) a format and return its identifier.
    pub fn query_format(
        &self,
        color_family: ColorFamily,
        sample_type: SampleType,
        bits_per_sample: u32,
        subsampling_w: u32,
        subsampling_h: u32,
    ) -> FormatResult<FormatId> {
        self.inner.formats.query(
            color_family,
            sample_type,
            bits_per_sample,
            subsampling_w,
            subsampling_h,
        )
    }

    /// Look up a registered format.
    pub fn get_format(&self, id: FormatId) -> FormatResult<PixelFormat> {
        self.inner.formats.lookup(id)
    }

    /// Description of a preset format.
    pub fn preset(&self, preset: Preset) -> PixelFormat {
        self.inner.formats.preset(preset)
    }

    /// Look up a registered format by name, e.g. `YUV420P8`.
    pub fn format_by_name(&self, name: &str) -> FormatResult<PixelFormat> {
        self.inner.formats.by_name(name)
    }

    /// The format registry.
    pub fn formats(&self) -> &FormatRegistry {
        &self.inner.formats
    }

    // ========================================================================
    // Filters and nodes
    // ========================================================================

    /// Wrap a filter instance in a node owned by this core.
    pub fn create_node<F: Filter + 'static>(&self, filter: F) -> Node {
        Node::new(Arc::clone(&self.inner), Box::new(filter))
    }

    /// Construct a registered filter by name.
    pub fn invoke(&self, name: &str, args: &PropertyMap) -> ArgumentResult<Node> {
        // Constructors may invoke other filters, so don't hold the lock.
        let entry = self
            .inner
            .registry
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| crate::core::error::ArgumentError::UnknownFilter(name.to_string()))?;
        entry.invoke(self, args)
    }

    /// Register an additional filter.
    pub fn register_filter<F>(
        &self,
        name: &str,
        signature: &str,
        category: Category,
        description: &str,
        constructor: F,
    ) -> ArgumentResult<()>
    where
        F: Fn(&Core, &PropertyMap) -> ArgumentResult<Node> + Send + Sync + 'static,
    {
        self.inner
            .registry
            .write()
            .register(name, signature, category, description, constructor)
    }

    /// Names of all registered filters.
    pub fn filter_names(&self) -> Vec<String> {
        self.inner
            .registry
            .read()
            .names()
            .map(str::to_string)
            .collect()
    }

    /// Signature string of a registered filter.
    pub fn filter_signature(&self, name: &str) -> Option<String> {
        self.inner
            .registry
            .read()
            .get(name)
            .map(|e| e.signature.to_string())
    }

    // ========================================================================
    // Threads and cache
    // ========================================================================

    /// Number of worker threads.
    pub fn num_threads(&self) -> usize {
        self.inner.scheduler.pool().threads()
    }

    /// Resize the worker pool. Work already queued finishes on the old pool.
    pub fn set_num_threads(&self, threads: usize) -> Result<usize, ConfigError> {
        let threads = self.inner.scheduler.pool().set_threads(threads)?;
        self.inner.config.write().threads = Some(threads);
        Ok(threads)
    }

    /// Change the frame cache budget.
    pub fn set_max_cache_size(&self, mb: usize) {
        self.inner.scheduler.cache().set_max_memory_mb(mb);
        self.inner.config.write().max_cache_size_mb = mb;
    }

    /// Enable or disable the frame cache.
    pub fn set_cache_enabled(&self, enabled: bool) {
        self.inner.scheduler.cache().set_enabled(enabled);
        self.inner.config.write().cache_enabled = enabled;
    }

    /// Frame cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.inner.scheduler.cache().stats()
    }

    /// Bytes currently held by the frame cache.
    pub fn cache_memory_usage(&self) -> usize {
        self.inner.scheduler.cache().memory_usage()
    }

    /// Drop every cached frame.
    pub fn clear_cache(&self) {
        self.inner.scheduler.cache().clear();
    }

    /// Scheduler counters.
    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.inner.scheduler.stats()
    }

    // ========================================================================
    // Messages
    // ========================================================================

    /// Register a message handler.
    pub fn add_log_handler<F>(&self, handler: F) -> LogHandle
    where
        F: Fn(MessageType, &str) + Send + Sync + 'static,
    {
        self.inner.log.add(Arc::new(handler))
    }

    /// Remove a handler. It is not called for any later message.
    pub fn remove_log_handler(&self, handle: LogHandle) -> bool {
        self.inner.log.remove(handle)
    }

    /// Send a message to the `log` facade and every handler.
    pub fn log_message(&self, message_type: MessageType, message: &str) {
        self.inner.log.dispatch(message_type, message);
    }
}

impl fmt::Debug for Core {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Core")
            .field("threads", &self.num_threads())
            .field("formats", &self.inner.formats.len())
            .field("filters", &self.inner.registry.read().len())
            .finish()
    }
}
