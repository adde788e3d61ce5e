//! Filter trait and node handles.
//!
//! A [`Filter`] is the polymorphic unit of work: it declares its output
//! ([`VideoInfo`]), which upstream frames it needs for a given index, and
//! produces the frame once those are available. Wrapping a filter in a
//! [`Node`] gives it an identity and connects it to a core's scheduler.
//!
//! Nodes can only reference nodes that already exist, so the graph is
//! acyclic by construction.

use crate::core::context::{FrameContext, FrameRequests};
use crate::core::error::{FrameError, FrameResult, NodeId};
use crate::core::format::{FormatId, PixelFormat};
use crate::core::frame::VideoFrame;
use crate::execution::engine::{Core, CoreInner};
use crate::execution::scheduler::{FrameFuture, Scheduler};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Declared output of a node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    /// Output format, or `None` when it is only known once a frame exists.
    pub format: Option<PixelFormat>,
    /// Luma width, 0 if it varies.
    pub width: usize,
    /// Luma height, 0 if it varies.
    pub height: usize,
    /// Number of frames. Immutable once the node exists.
    pub num_frames: usize,
    /// Frame rate numerator.
    pub fps_num: i64,
    /// Frame rate denominator.
    pub fps_den: i64,
}

impl VideoInfo {
    /// Video info for a fixed format and size.
    pub fn new(format: PixelFormat, width: usize, height: usize, num_frames: usize) -> Self {
        Self {
            format: Some(format),
            width,
            height,
            num_frames,
            fps_num: 0,
            fps_den: 0,
        }
    }

    /// Video info whose format is latched from the first produced frame.
    pub fn agnostic(num_frames: usize) -> Self {
        Self {
            format: None,
            width: 0,
            height: 0,
            num_frames,
            fps_num: 0,
            fps_den: 0,
        }
    }

    /// Set the frame rate.
    pub fn with_fps(mut self, fps_num: i64, fps_den: i64) -> Self {
        self.fps_num = fps_num;
        self.fps_den = fps_den;
        self
    }

    /// Whether format and dimensions are fixed.
    pub fn is_constant(&self) -> bool {
        self.format.is_some() && self.width > 0 && self.height > 0
    }
}

/// Whether a node's frames go through the frame cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Store produced frames.
    Cache,
    /// Never store; the filter is cheap or already holds its output.
    NoCache,
}

/// The core trait every filter implements.
///
/// Production must be pure with respect to the requested frames: the same
/// index and the same upstream frames give an equivalent result.
pub trait Filter: Send + Sync {
    /// Filter name, used in messages and graph dumps.
    fn name(&self) -> &str;

    /// Declared output. Queried once when the node is created.
    fn video_info(&self) -> VideoInfo;

    /// Upstream nodes, in argument order.
    fn dependencies(&self) -> Vec<Node> {
        Vec::new()
    }

    /// Declare the upstream frames needed to produce frame `n`.
    fn request_frames(&self, n: usize, requests: &mut FrameRequests) {
        let _ = (n, requests);
    }

    /// Produce frame `n`. Every requested frame is available in `ctx`.
    fn get_frame(&self, n: usize, ctx: &mut FrameContext<'_>) -> FrameResult<VideoFrame>;

    /// Caching behavior for this filter's frames.
    fn cache_mode(&self) -> CacheMode {
        CacheMode::Cache
    }
}

pub(crate) struct NodeInner {
    id: NodeId,
    info: VideoInfo,
    filter: Box<dyn Filter>,
    latched: Mutex<Option<FormatId>>,
    core: Arc<CoreInner>,
}

impl Drop for NodeInner {
    fn drop(&mut self) {
        self.core.scheduler.cache().invalidate_node(self.id);
    }
}

/// Shared handle to a filter instance.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    pub(crate) fn new(core: Arc<CoreInner>, filter: Box<dyn Filter>) -> Self {
        let info = filter.video_info();
        let node = Self {
            inner: Arc::new(NodeInner {
                id: NodeId::new(),
                info,
                filter,
                latched: Mutex::new(None),
                core,
            }),
        };
        log::debug!(
            "created node {} ({}) with {} frames",
            node.id(),
            node.name(),
            info.num_frames
        );
        node
    }

    /// Unique identity of this node.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Name of the wrapped filter.
    pub fn name(&self) -> &str {
        self.inner.filter.name()
    }

    /// Declared output.
    pub fn video_info(&self) -> &VideoInfo {
        &self.inner.info
    }

    /// Declared length.
    pub fn num_frames(&self) -> usize {
        self.inner.info.num_frames
    }

    /// Declared format, or the latched one for agnostic nodes.
    pub fn format(&self) -> Option<FormatId> {
        match self.inner.info.format {
            Some(format) => Some(format.id),
            None => *self.inner.latched.lock(),
        }
    }

    /// Upstream nodes.
    pub fn dependencies(&self) -> Vec<Node> {
        self.inner.filter.dependencies()
    }

    /// The core this node belongs to.
    pub fn core(&self) -> Core {
        Core::from_inner(Arc::clone(&self.inner.core))
    }

    pub(crate) fn filter(&self) -> &dyn Filter {
        self.inner.filter.as_ref()
    }

    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.inner.core.scheduler
    }

    pub(crate) fn is_cacheable(&self) -> bool {
        self.inner.filter.cache_mode() == CacheMode::Cache
    }

    /// Fail with `OutOfRange` unless `n` is a valid index.
    pub fn check_index(&self, n: usize) -> FrameResult<()> {
        let num_frames = self.num_frames();
        if n >= num_frames {
            return Err(FrameError::OutOfRange {
                index: n,
                num_frames,
            });
        }
        Ok(())
    }

    /// Check a produced frame against the declared or latched format and
    /// make it read-only.
    pub(crate) fn finalize_output(&self, frame: VideoFrame) -> FrameResult<VideoFrame> {
        let produced = frame.format().id;
        let info = &self.inner.info;
        match info.format {
            Some(declared) if declared.id != produced => {
                return Err(self.violation(format!(
                    "declared format {} but produced {}",
                    declared.name(),
                    frame.format().name()
                )));
            }
            Some(_) => {}
            None => {
                let mut latched = self.inner.latched.lock();
                match *latched {
                    None => *latched = Some(produced),
                    Some(first) if first != produced => {
                        return Err(self.violation(format!(
                            "first frame had format {} but a later frame has {}",
                            first,
                            frame.format().name()
                        )));
                    }
                    Some(_) => {}
                }
            }
        }
        if info.width > 0 && (frame.width() != info.width || frame.height() != info.height) {
            return Err(self.violation(format!(
                "declared {}x{} but produced {}x{}",
                info.width,
                info.height,
                frame.width(),
                frame.height()
            )));
        }
        Ok(frame.freeze())
    }

    fn violation(&self, message: String) -> FrameError {
        FrameError::InternalInvariantViolation {
            node_id: self.id(),
            message: format!("{}: {}", self.name(), message),
        }
    }

    /// Fetch frame `n`, blocking until it is ready.
    pub fn get_frame(&self, n: usize) -> FrameResult<VideoFrame> {
        self.scheduler().get_frame(self, n)
    }

    /// Fetch frame `n` without blocking.
    ///
    /// `callback` runs exactly once on a pool thread, after this call has
    /// returned.
    pub fn get_frame_async<F>(&self, n: usize, callback: F)
    where
        F: FnOnce(FrameResult<VideoFrame>) + Send + 'static,
    {
        self.scheduler().get_frame_async(self, n, Box::new(callback));
    }

    /// Fetch frame `n`, returning a handle to await the result.
    pub fn get_frame_future(&self, n: usize) -> FrameFuture {
        self.scheduler().get_frame_future(self, n)
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Node {}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("num_frames", &self.num_frames())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::format::Preset;
    use crate::execution::engine::Core;

    struct Solid {
        format: PixelFormat,
        length: usize,
    }

    impl Filter for Solid {
        fn name(&self) -> &str {
            "Solid"
        }

        fn video_info(&self) -> VideoInfo {
            VideoInfo::new(self.format, 4, 4, self.length)
        }

        fn get_frame(&self, _n: usize, _ctx: &mut FrameContext<'_>) -> FrameResult<VideoFrame> {
            Ok(VideoFrame::new(self.format, 4, 4))
        }
    }

    #[test]
    fn test_node_identity() {
        let core = Core::with_threads(1).unwrap();
        let format = core.preset(Preset::Gray8);
        let a = core.create_node(Solid { format, length: 3 });
        let b = core.create_node(Solid { format, length: 3 });
        assert_ne!(a, b);
        assert_eq!(a.clone(), a);
        assert_eq!(a.name(), "Solid");
        assert_eq!(a.format(), Some(format.id));
    }

    #[test]
    fn test_out_of_range() {
        let core = Core::with_threads(1).unwrap();
        let format = core.preset(Preset::Gray8);
        let empty = core.create_node(Solid { format, length: 0 });
        let err = empty.get_frame(0).unwrap_err();
        assert!(err.is_out_of_range());

        let node = core.create_node(Solid { format, length: 3 });
        assert!(node.get_frame(2).is_ok());
        assert!(node.get_frame(3).unwrap_err().is_out_of_range());
    }

    #[test]
    fn test_returned_frames_are_read_only() {
        let core = Core::with_threads(1).unwrap();
        let format = core.preset(Preset::Gray8);
        let node = core.create_node(Solid { format, length: 1 });
        let frame = node.get_frame(0).unwrap();
        assert!(!frame.is_writable());
        assert!(frame.copy().is_writable());
    }
}
