//! Closure based filters.
//!
//! These have no registered name because their behavior is Rust code rather
//! than arguments. Wrap them with
//! [`Core::create_node`](crate::execution::engine::Core::create_node).

use crate::core::context::{FrameContext, FrameRequests};
use crate::core::error::{ArgumentError, ArgumentResult, FrameResult};
use crate::core::frame::VideoFrame;
use crate::core::node::{Filter, Node, VideoInfo};

type ModifyFn = dyn Fn(usize, &[VideoFrame]) -> FrameResult<VideoFrame> + Send + Sync;
type SelectFn = dyn Fn(usize, &[VideoFrame]) -> FrameResult<Node> + Send + Sync;

/// Produces frame `n` by calling a closure with frame `n` of every clip.
///
/// The output takes the first clip's video info unless overridden. Frames
/// handed to the closure are read-only; call [`VideoFrame::copy`] to edit.
pub struct ModifyFrame {
    clips: Vec<Node>,
    info: VideoInfo,
    func: Box<ModifyFn>,
}

impl ModifyFrame {
    /// Create from at least one clip.
    pub fn new<F>(clips: Vec<Node>, func: F) -> ArgumentResult<Self>
    where
        F: Fn(usize, &[VideoFrame]) -> FrameResult<VideoFrame> + Send + Sync + 'static,
    {
        let info = *clips
            .first()
            .ok_or_else(|| ArgumentError::missing("ModifyFrame", "clips"))?
            .video_info();
        Ok(Self {
            clips,
            info,
            func: Box::new(func),
        })
    }

    /// Declare a different output.
    pub fn with_info(mut self, info: VideoInfo) -> Self {
        self.info = info;
        self
    }
}

impl Filter for ModifyFrame {
    fn name(&self) -> &str {
        "ModifyFrame"
    }

    fn video_info(&self) -> VideoInfo {
        self.info
    }

    fn dependencies(&self) -> Vec<Node> {
        self.clips.clone()
    }

    fn request_frames(&self, n: usize, requests: &mut FrameRequests) {
        for clip in &self.clips {
            requests.request_clamped(clip, n);
        }
    }

    fn get_frame(&self, n: usize, ctx: &mut FrameContext<'_>) -> FrameResult<VideoFrame> {
        (self.func)(n, ctx.frames())
    }
}

/// Picks, per frame, which node supplies the output.
///
/// The selected node is evaluated synchronously for the same index. With an
/// agnostic [`VideoInfo`] the output format is whatever the first produced
/// frame has, and every later frame must match it.
pub struct FrameEval {
    info: VideoInfo,
    prop_src: Vec<Node>,
    select: Box<SelectFn>,
}

impl FrameEval {
    /// Create with the declared output and a selector.
    pub fn new<F>(info: VideoInfo, select: F) -> Self
    where
        F: Fn(usize, &[VideoFrame]) -> FrameResult<Node> + Send + Sync + 'static,
    {
        Self {
            info,
            prop_src: Vec::new(),
            select: Box::new(select),
        }
    }

    /// Pass frame `n` of these clips to the selector.
    pub fn with_prop_src(mut self, clips: Vec<Node>) -> Self {
        self.prop_src = clips;
        self
    }
}

impl Filter for FrameEval {
    fn name(&self) -> &str {
        "FrameEval"
    }

    fn video_info(&self) -> VideoInfo {
        self.info
    }

    fn dependencies(&self) -> Vec<Node> {
        self.prop_src.clone()
    }

    fn request_frames(&self, n: usize, requests: &mut FrameRequests) {
        for clip in &self.prop_src {
            requests.request_clamped(clip, n);
        }
    }

    fn get_frame(&self, n: usize, ctx: &mut FrameContext<'_>) -> FrameResult<VideoFrame> {
        let node = (self.select)(n, ctx.frames())?;
        ctx.get_frame(&node, n)
    }
}
