//! Frame request and production contexts.
//!
//! Filters declare their inputs through [`FrameRequests`] before they run,
//! then read the fetched frames from a [`FrameContext`].

use crate::core::error::FrameResult;
use crate::core::format::PixelFormat;
use crate::core::frame::VideoFrame;
use crate::core::node::Node;
use crate::execution::engine::Core;

/// Upstream frames a filter needs before it can produce a frame.
#[derive(Default)]
pub struct FrameRequests {
    requests: Vec<(Node, usize)>,
}

impl FrameRequests {
    /// Create an empty request list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request frame `n` of `node`.
    pub fn request(&mut self, node: &Node, n: usize) {
        self.requests.push((node.clone(), n));
    }

    /// Request frame `n` of `node`, clamped to its last frame.
    ///
    /// Used by filters whose inputs may be shorter than their output.
    pub fn request_clamped(&mut self, node: &Node, n: usize) {
        let last = node.num_frames().saturating_sub(1);
        self.request(node, n.min(last));
    }

    /// Number of requested frames.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Check if nothing was requested.
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub(crate) fn into_vec(self) -> Vec<(Node, usize)> {
        self.requests
    }
}

/// Context passed to [`Filter::get_frame`](crate::core::node::Filter::get_frame).
pub struct FrameContext<'a> {
    node: &'a Node,
    requested: &'a [(Node, usize)],
    frames: Vec<VideoFrame>,
}

impl<'a> FrameContext<'a> {
    pub(crate) fn new(node: &'a Node, requested: &'a [(Node, usize)], frames: Vec<VideoFrame>) -> Self {
        Self {
            node,
            requested,
            frames,
        }
    }

    /// The node being produced.
    pub fn node(&self) -> &Node {
        self.node
    }

    /// The owning core.
    pub fn core(&self) -> Core {
        self.node.core()
    }

    /// Frames in request order.
    pub fn frames(&self) -> &[VideoFrame] {
        &self.frames
    }

    /// The `i`-th requested frame.
    pub fn frame(&self, i: usize) -> Option<&VideoFrame> {
        self.frames.get(i)
    }

    /// Frame `n` of `node`.
    ///
    /// Requested frames are returned directly. Anything else is fetched
    /// synchronously, which is slower but still safe on a pool thread.
    pub fn get_frame(&self, node: &Node, n: usize) -> FrameResult<VideoFrame> {
        let found = self
            .requested
            .iter()
            .position(|(req, idx)| req == node && *idx == n);
        match found.and_then(|i| self.frames.get(i)) {
            Some(frame) => Ok(frame.clone()),
            None => {
                log::debug!(
                    "{} fetched undeclared frame {} of {}",
                    self.node.name(),
                    n,
                    node.name()
                );
                node.get_frame(n)
            }
        }
    }

    /// Allocate a new writable frame.
    pub fn new_frame(&self, format: PixelFormat, width: usize, height: usize) -> VideoFrame {
        VideoFrame::new(format, width, height)
    }
}
