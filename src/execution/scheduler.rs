//! Frame request scheduling.
//!
//! Resolves (node, frame index) requests to frames:
//! - At most one computation per pair is in flight; duplicate requests
//!   join it and receive the identical result.
//! - A request first asks the filter which upstream frames it needs,
//!   requests those, and registers a continuation that runs the filter
//!   on the pool once the last one arrives.
//! - Upstream errors short-circuit the dependent computation and reach
//!   every waiter unchanged.

use crate::core::context::{FrameContext, FrameRequests};
use crate::core::error::{FrameError, FrameResult};
use crate::core::frame::VideoFrame;
use crate::core::node::Node;
use crate::execution::cache::{FrameCache, FrameKey};
use crate::execution::pool::WorkerPool;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Callback receiving the result of an asynchronous frame request.
pub type FrameCallback = Box<dyn FnOnce(FrameResult<VideoFrame>) + Send>;

// How long a helping worker sleeps when the pool has nothing queued.
const HELP_POLL: Duration = Duration::from_millis(1);

enum Waiter {
    Client(FrameCallback),
    Dependency { parent: Arc<FrameTask>, slot: usize },
}

#[derive(Default)]
struct TaskState {
    waiters: Vec<Waiter>,
    requested: Vec<(Node, usize)>,
    fetched: Vec<Option<VideoFrame>>,
    remaining: usize,
    completing: bool,
}

struct FrameTask {
    node: Node,
    index: usize,
    state: Mutex<TaskState>,
}

impl FrameTask {
    fn key(&self) -> FrameKey {
        FrameKey::new(self.node.id(), self.index)
    }

    fn is_completing(&self) -> bool {
        self.state.lock().completing
    }
}

/// Counters describing scheduler activity.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    /// Frames produced by filters.
    pub produced: u64,
    /// Requests that joined an in-flight computation.
    pub coalesced: u64,
    /// Requests answered from the cache.
    pub cache_hits: u64,
    /// Computations that ended in an error.
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    produced: AtomicU64,
    coalesced: AtomicU64,
    cache_hits: AtomicU64,
    failed: AtomicU64,
}

/// Per-core scheduler.
pub(crate) struct Scheduler {
    pool: WorkerPool,
    inflight: Mutex<HashMap<FrameKey, Arc<FrameTask>>>,
    cache: FrameCache,
    counters: Counters,
}

impl Scheduler {
    pub fn new(pool: WorkerPool, cache: FrameCache) -> Self {
        Self {
            pool,
            inflight: Mutex::new(HashMap::new()),
            cache,
            counters: Counters::default(),
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn cache(&self) -> &FrameCache {
        &self.cache
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            produced: self.counters.produced.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Number of computations currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().len()
    }

    // ========================================================================
    // Client entry points
    // ========================================================================

    pub fn get_frame(&self, node: &Node, n: usize) -> FrameResult<VideoFrame> {
        node.check_index(n)?;
        if node.is_cacheable() {
            if let Some(frame) = self.cache.get(&FrameKey::new(node.id(), n)) {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(frame);
            }
        }
        self.get_frame_future(node, n).wait()
    }

    pub fn get_frame_future(&self, node: &Node, n: usize) -> FrameFuture {
        let future = FrameFuture::new();
        let slot = Arc::clone(&future.slot);
        self.get_frame_async(node, n, Box::new(move |result| slot.fulfill(result)));
        future
    }

    pub fn get_frame_async(&self, node: &Node, n: usize, callback: FrameCallback) {
        // The callback may only start once this call has returned.
        let gate = Arc::new(Gate::default());
        let opened = Arc::clone(&gate);
        let gated: FrameCallback = Box::new(move |result| {
            opened.wait();
            callback(result);
        });
        self.request(node, n, Waiter::Client(gated));
        gate.open();
    }

    // ========================================================================
    // Request expansion
    // ========================================================================

    fn request(&self, node: &Node, n: usize, waiter: Waiter) {
        if let Err(e) = node.check_index(n) {
            self.deliver(waiter, Err(e));
            return;
        }

        let key = FrameKey::new(node.id(), n);
        let task = {
            let mut inflight = self.inflight.lock();
            if let Some(task) = inflight.get(&key) {
                task.state.lock().waiters.push(waiter);
                self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                log::trace!("joined in-flight frame {} of {}", n, node.name());
                return;
            }
            // Checked under the in-flight lock so a computation finishing
            // right now is seen either here or in the map.
            if node.is_cacheable() {
                if let Some(frame) = self.cache.get(&key) {
                    drop(inflight);
                    self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                    self.deliver(waiter, Ok(frame));
                    return;
                }
            }
            let task = Arc::new(FrameTask {
                node: node.clone(),
                index: n,
                state: Mutex::new(TaskState {
                    waiters: vec![waiter],
                    ..TaskState::default()
                }),
            });
            inflight.insert(key, Arc::clone(&task));
            task
        };

        self.start(task);
    }

    fn start(&self, task: Arc<FrameTask>) {
        let mut requests = FrameRequests::new();
        let declared = catch_unwind(AssertUnwindSafe(|| {
            task.node.filter().request_frames(task.index, &mut requests)
        }));
        if let Err(payload) = declared {
            self.complete(&task, Err(FrameError::filter(panic_message(payload))));
            return;
        }

        let requests = requests.into_vec();
        if requests.is_empty() {
            self.spawn_produce(task);
            return;
        }

        {
            let mut state = task.state.lock();
            state.fetched = vec![None; requests.len()];
            state.remaining = requests.len();
            state.requested = requests.clone();
        }

        for (slot, (dep, n)) in requests.into_iter().enumerate() {
            if task.is_completing() {
                log::trace!("skipping remaining inputs of failed {}", task.node.name());
                break;
            }
            let waiter = Waiter::Dependency {
                parent: Arc::clone(&task),
                slot,
            };
            dep.scheduler().request(&dep, n, waiter);
        }
    }

    fn dependency_ready(&self, task: &Arc<FrameTask>, slot: usize, result: FrameResult<VideoFrame>) {
        let ready = {
            let mut state = task.state.lock();
            if state.completing {
                return;
            }
            match result {
                Ok(frame) => {
                    state.fetched[slot] = Some(frame);
                    state.remaining -= 1;
                    state.remaining == 0
                }
                Err(e) => {
                    drop(state);
                    self.complete(task, Err(e));
                    return;
                }
            }
        };
        if ready {
            self.spawn_produce(Arc::clone(task));
        }
    }

    // ========================================================================
    // Production and completion
    // ========================================================================

    fn spawn_produce(&self, task: Arc<FrameTask>) {
        self.pool.spawn(move || {
            let scheduler = task.node.scheduler();
            scheduler.produce(&task);
        });
    }

    fn produce(&self, task: &Arc<FrameTask>) {
        let (requested, fetched) = {
            let mut state = task.state.lock();
            if state.completing {
                return;
            }
            (
                std::mem::take(&mut state.requested),
                std::mem::take(&mut state.fetched),
            )
        };
        let frames: Vec<VideoFrame> = fetched.into_iter().flatten().collect();

        let node = &task.node;
        log::trace!("producing frame {} of {}", task.index, node.name());
        let produced = catch_unwind(AssertUnwindSafe(|| {
            let mut ctx = FrameContext::new(node, &requested, frames);
            node.filter().get_frame(task.index, &mut ctx)
        }));
        let result = match produced {
            Ok(result) => result.and_then(|frame| node.finalize_output(frame)),
            Err(payload) => Err(FrameError::filter(panic_message(payload))),
        };

        match &result {
            Ok(_) => {
                self.counters.produced.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) if e.is_defect() => log::error!("{}", e),
            Err(e) => log::debug!("frame {} of {} failed: {}", task.index, node.name(), e),
        }
        self.complete(task, result);
    }

    fn complete(&self, task: &Arc<FrameTask>, result: FrameResult<VideoFrame>) {
        {
            let mut state = task.state.lock();
            if state.completing {
                return;
            }
            state.completing = true;
        }

        let key = task.key();
        match &result {
            Ok(frame) if task.node.is_cacheable() => self.cache.put(key, frame.clone()),
            Ok(_) => {}
            Err(_) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
            }
        }

        {
            let mut inflight = self.inflight.lock();
            if inflight
                .get(&key)
                .is_some_and(|current| Arc::ptr_eq(current, task))
            {
                inflight.remove(&key);
            }
        }

        // No new waiters can join once the task left the map.
        let waiters = std::mem::take(&mut task.state.lock().waiters);
        for waiter in waiters {
            self.deliver(waiter, result.clone());
        }
    }

    fn deliver(&self, waiter: Waiter, result: FrameResult<VideoFrame>) {
        match waiter {
            Waiter::Client(callback) => self.pool.spawn(move || callback(result)),
            Waiter::Dependency { parent, slot } => {
                let scheduler = parent.node.scheduler();
                scheduler.dependency_ready(&parent, slot, result);
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "filter panicked".to_string()
    }
}

#[derive(Default)]
struct Gate {
    open: Mutex<bool>,
    cond: Condvar,
}

impl Gate {
    fn open(&self) {
        *self.open.lock() = true;
        self.cond.notify_all();
    }

    fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.cond.wait(&mut open);
        }
    }
}

// ============================================================================
// FrameFuture
// ============================================================================

#[derive(Default)]
struct FutureSlot {
    result: Mutex<Option<FrameResult<VideoFrame>>>,
    ready: Condvar,
}

impl FutureSlot {
    fn fulfill(&self, result: FrameResult<VideoFrame>) {
        *self.result.lock() = Some(result);
        self.ready.notify_all();
    }
}

/// Handle to a pending frame request.
///
/// Dropping the handle or timing out stops waiting; the computation itself
/// continues and its result still lands in the cache.
#[derive(Clone)]
pub struct FrameFuture {
    slot: Arc<FutureSlot>,
}

impl FrameFuture {
    fn new() -> Self {
        Self {
            slot: Arc::new(FutureSlot::default()),
        }
    }

    /// Whether the result has arrived.
    pub fn is_ready(&self) -> bool {
        self.slot.result.lock().is_some()
    }

    /// The result, if it has arrived.
    pub fn try_result(&self) -> Option<FrameResult<VideoFrame>> {
        self.slot.result.lock().clone()
    }

    /// Block until the result arrives.
    pub fn wait(&self) -> FrameResult<VideoFrame> {
        loop {
            if let Some(result) = self.wait_until(None) {
                return result;
            }
        }
    }

    /// Block for at most `timeout`. `None` means the wait timed out.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<FrameResult<VideoFrame>> {
        self.wait_until(Some(Instant::now() + timeout))
    }

    fn wait_until(&self, deadline: Option<Instant>) -> Option<FrameResult<VideoFrame>> {
        let mut guard = self.slot.result.lock();
        loop {
            if let Some(result) = guard.as_ref() {
                return Some(result.clone());
            }
            let now = Instant::now();
            if deadline.is_some_and(|d| now >= d) {
                return None;
            }

            if WorkerPool::on_worker_thread() {
                // A blocked worker keeps the pool moving by running queued jobs.
                if MutexGuard::unlocked(&mut guard, WorkerPool::help) {
                    continue;
                }
                let poll = deadline.map_or(HELP_POLL, |d| (d - now).min(HELP_POLL));
                self.slot.ready.wait_for(&mut guard, poll);
            } else {
                match deadline {
                    Some(d) => {
                        self.slot.ready.wait_until(&mut guard, d);
                    }
                    None => self.slot.ready.wait(&mut guard),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::format::Preset;
    use crate::core::node::{Filter, VideoInfo};
    use crate::execution::engine::Core;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    struct Counting {
        info: VideoInfo,
        calls: Arc<AtomicUsize>,
        delay: Duration,
        fail_on: Option<usize>,
    }

    impl Filter for Counting {
        fn name(&self) -> &str {
            "Counting"
        }

        fn video_info(&self) -> VideoInfo {
            self.info
        }

        fn get_frame(&self, n: usize, _ctx: &mut FrameContext<'_>) -> FrameResult<VideoFrame> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if self.fail_on == Some(n) {
                return Err(FrameError::filter("Fail"));
            }
            let format = self.info.format.ok_or_else(|| FrameError::filter("no format"))?;
            Ok(VideoFrame::new(format, self.info.width, self.info.height))
        }
    }

    struct Passthrough {
        source: Node,
        calls: Arc<AtomicUsize>,
    }

    impl Filter for Passthrough {
        fn name(&self) -> &str {
            "Passthrough"
        }

        fn video_info(&self) -> VideoInfo {
            *self.source.video_info()
        }

        fn dependencies(&self) -> Vec<Node> {
            vec![self.source.clone()]
        }

        fn request_frames(&self, n: usize, requests: &mut FrameRequests) {
            requests.request(&self.source, n);
        }

        fn get_frame(&self, _n: usize, ctx: &mut FrameContext<'_>) -> FrameResult<VideoFrame> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ctx.frame(0)
                .cloned()
                .ok_or_else(|| FrameError::filter("missing input"))
        }
    }

    fn counting(core: &Core, delay_ms: u64, fail_on: Option<usize>) -> (Node, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let info = VideoInfo::new(core.preset(Preset::Gray8), 8, 8, 10);
        let node = core.create_node(Counting {
            info,
            calls: Arc::clone(&calls),
            delay: Duration::from_millis(delay_ms),
            fail_on,
        });
        (node, calls)
    }

    #[test]
    fn test_concurrent_requests_coalesce() {
        let core = Core::with_threads(4).unwrap();
        let (node, calls) = counting(&core, 50, None);

        let (tx, rx) = mpsc::channel();
        for _ in 0..2 {
            let tx = tx.clone();
            node.get_frame_async(3, move |result| {
                tx.send(result).unwrap();
            });
        }
        let a = rx.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
        let b = rx.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();

        assert!(VideoFrame::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_runs_on_pool_thread() {
        let core = Core::with_threads(1).unwrap();
        let (node, _) = counting(&core, 0, None);
        let (tx, rx) = mpsc::channel();
        node.get_frame_async(20, move |result| {
            tx.send((WorkerPool::on_worker_thread(), result.is_err()))
                .unwrap();
        });
        let (on_pool, failed) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(on_pool);
        assert!(failed);
    }

    #[test]
    fn test_errors_reach_every_dependent() {
        let core = Core::with_threads(2).unwrap();
        let (source, _) = counting(&core, 10, Some(1));
        let calls = Arc::new(AtomicUsize::new(0));
        let downstream = core.create_node(Passthrough {
            source: source.clone(),
            calls: Arc::clone(&calls),
        });

        let err = downstream.get_frame(1).unwrap_err();
        assert_eq!(err, FrameError::filter("Fail"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(downstream.get_frame(0).is_ok());
        assert_eq!(source.get_frame(1).unwrap_err().message(), "Fail");
    }

    #[test]
    fn test_timeout_does_not_cancel() {
        let core = Core::with_threads(1).unwrap();
        let (node, calls) = counting(&core, 200, None);
        let future = node.get_frame_future(0);
        assert!(future.wait_timeout(Duration::from_millis(10)).is_none());
        assert!(future.wait().is_ok());
        assert!(future.is_ready());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Served from the cache.
        node.get_frame(0).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sync_wait_inside_single_worker_pool() {
        struct Nested {
            inner: Node,
        }

        impl Filter for Nested {
            fn name(&self) -> &str {
                "Nested"
            }

            fn video_info(&self) -> VideoInfo {
                *self.inner.video_info()
            }

            fn get_frame(&self, n: usize, ctx: &mut FrameContext<'_>) -> FrameResult<VideoFrame> {
                // Undeclared input, fetched synchronously on the only worker.
                ctx.get_frame(&self.inner, n)
            }
        }

        let core = Core::with_threads(1).unwrap();
        let (source, _) = counting(&core, 0, None);
        let nested = core.create_node(Nested { inner: source });
        assert!(nested.get_frame(4).is_ok());
    }

    #[test]
    fn test_panicking_filter_becomes_filter_error() {
        struct Panics;

        impl Filter for Panics {
            fn name(&self) -> &str {
                "Panics"
            }

            fn video_info(&self) -> VideoInfo {
                VideoInfo::agnostic(1)
            }

            fn get_frame(&self, _n: usize, _ctx: &mut FrameContext<'_>) -> FrameResult<VideoFrame> {
                panic!("boom");
            }
        }

        let core = Core::with_threads(1).unwrap();
        let node = core.create_node(Panics);
        assert_eq!(node.get_frame(0).unwrap_err(), FrameError::filter("boom"));
        assert_eq!(core.scheduler_stats().failed, 1);
    }
}
