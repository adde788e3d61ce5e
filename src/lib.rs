//! # Framegraph - a pull-based video frame server
//!
//! Clips are nodes in a directed acyclic graph. Each node wraps a filter that
//! declares its output format, size and length, names the upstream frames it
//! needs for a given index, and produces the frame once they are available.
//! The scheduler evaluates requests on a worker pool, shares identical
//! in-flight work between requesters and keeps finished frames in a
//! memory-bounded cache.
//!
//! ## Quick Start
//!
//! ```
//! use framegraph::prelude::*;
//!
//! let core = Core::with_threads(2).unwrap();
//!
//! let mut args = PropertyMap::new();
//! args.set_int("width", 64).unwrap();
//! args.set_int("height", 32).unwrap();
//! args.set_int("format", Preset::Gray8.id().0 as i64).unwrap();
//! args.set("color", vec![20.0]).unwrap();
//! let source = core.invoke("BlankClip", &args).unwrap();
//!
//! let mut args = PropertyMap::new();
//! args.set("clips", vec![source]).unwrap();
//! args.set("expr", vec!["x 3 *"]).unwrap();
//! let tripled = core.invoke("Expr", &args).unwrap();
//!
//! let frame = tripled.get_frame(0).unwrap();
//! assert_eq!(frame.plane::<u8>(0).unwrap().get(10, 10), 60);
//! ```
//!
//! ## Architecture
//!
//! - [`core`]: formats, frames, property maps, the filter trait and errors
//! - [`execution`]: the core, scheduler, cache, worker pool and output
//! - [`expr`]: the postfix expression compiler and evaluator
//! - [`filters`]: the filter registry and built-in filters
//! - [`environment`]: isolated cores with a scoped "current" environment
//! - [`graph`]: dependency inspection and JSON graph descriptions
//!
//! ## Custom filters
//!
//! Implement [`Filter`](core::node::Filter) and wrap it with
//! [`Core::create_node`](execution::engine::Core::create_node):
//!
//! ```
//! use framegraph::prelude::*;
//!
//! struct Invert {
//!     clip: Node,
//! }
//!
//! impl Filter for Invert {
//!     fn name(&self) -> &str {
//!         "Invert"
//!     }
//!
//!     fn video_info(&self) -> VideoInfo {
//!         *self.clip.video_info()
//!     }
//!
//!     fn dependencies(&self) -> Vec<Node> {
//!         vec![self.clip.clone()]
//!     }
//!
//!     fn request_frames(&self, n: usize, requests: &mut FrameRequests) {
//!         requests.request(&self.clip, n);
//!     }
//!
//!     fn get_frame(&self, _n: usize, ctx: &mut FrameContext<'_>) -> FrameResult<VideoFrame> {
//!         let mut frame = ctx.frames()[0].copy();
//!         for plane in 0..frame.num_planes() {
//!             let mut samples = frame.plane_mut::<u8>(plane)?;
//!             for y in 0..samples.height() {
//!                 for value in samples.row_mut(y) {
//!                     *value = 255 - *value;
//!                 }
//!             }
//!         }
//!         Ok(frame)
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod core;
pub mod environment;
pub mod execution;
pub mod expr;
pub mod filters;
pub mod graph;

/// Prelude module for convenient imports.
///
/// ```
/// use framegraph::prelude::*;
/// ```
pub mod prelude {
    // Formats and frames
    pub use crate::core::format::{ColorFamily, FormatId, PixelFormat, Preset, SampleType};
    pub use crate::core::frame::{PlaneMut, PlaneRef, Sample, VideoFrame};
    pub use crate::core::props::{PropArray, PropertyMap};

    // Nodes and filters
    pub use crate::core::context::{FrameContext, FrameRequests};
    pub use crate::core::node::{CacheMode, Filter, Node, VideoInfo};

    // Errors
    pub use crate::core::error::{
        ArgumentError, ArgumentResult, CompileError, EnvironmentError, FormatError, FrameError,
        FrameResult, FramegraphError, FramegraphResult, GraphError, NodeId, PropertyError,
    };

    // Execution
    pub use crate::core::config::CoreConfig;
    pub use crate::core::message::{LogHandle, MessageType};
    pub use crate::execution::cache::CacheStats;
    pub use crate::execution::engine::Core;
    pub use crate::execution::pipe::{pipe_node, OutputFormat, PipeOptions, PipeSummary};
    pub use crate::execution::progress::{ProgressTracker, ProgressUpdate};
    pub use crate::execution::scheduler::FrameFuture;

    // Filters
    pub use crate::filters::builtin::{FrameEval, ModifyFrame};
    pub use crate::filters::registry::{Category, FilterRegistry};

    // Environments and graphs
    pub use crate::environment::{Environment, EnvironmentManager, Local, ThreadLocalPolicy};
    pub use crate::graph::{GraphDescription, NodeDescription, NodeGraph};
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_version() {
        assert!(!super::VERSION.is_empty());
        assert_eq!(super::NAME, "framegraph");
    }

    #[test]
    fn test_builtins_registered() {
        let core = Core::with_threads(1).unwrap();
        let names = core.filter_names();
        for name in ["BlankClip", "Expr", "PlaneStats", "PlaneDifference", "ShufflePlanes"] {
            assert!(names.iter().any(|n| n == name), "{} missing", name);
        }
    }
}
