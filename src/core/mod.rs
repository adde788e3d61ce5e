//! Core types for the frame server.
//!
//! - Pixel formats and the format registry
//! - Frames, planes and property maps
//! - The filter trait and node handles
//! - Argument signatures, configuration, message handlers
//! - Error types

pub mod args;
pub mod config;
pub mod context;
pub mod error;
pub mod format;
pub mod frame;
pub mod message;
pub mod node;
pub mod props;

pub use args::{ArgReader, ArgumentDefinition, ArgumentType, Signature};
pub use config::CoreConfig;
pub use context::{FrameContext, FrameRequests};
pub use error::{
    ArgumentError, CompileError, EnvironmentError, FormatError, FrameError, FramegraphError, GraphError,
    NodeId, PropertyError,
};
pub use format::{ColorFamily, FormatId, FormatRegistry, PixelFormat, Preset, SampleType};
pub use frame::{PlaneMut, PlaneRef, Sample, VideoFrame};
pub use message::{LogHandle, MessageType};
pub use node::{CacheMode, Filter, Node, VideoInfo};
pub use props::{PropArray, PropertyMap};
