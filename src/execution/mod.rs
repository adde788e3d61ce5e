//! Frame scheduling and output.
//!
//! The [`Core`] owns the worker pool, frame cache and scheduler that turn
//! frame requests into frames.

pub mod cache;
pub mod engine;
pub mod pipe;
pub(crate) mod pool;
pub mod progress;
pub mod scheduler;

pub use cache::{CacheStats, FrameCache};
pub use engine::Core;
pub use pipe::{pipe_node, OutputFormat, PipeOptions, PipeSummary};
pub use progress::{ProgressTracker, ProgressUpdate};
pub use scheduler::{FrameCallback, FrameFuture, SchedulerStats};
