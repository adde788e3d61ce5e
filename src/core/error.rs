//! Error types for Framegraph.
//!
//! Uses thiserror for structured errors. The taxonomy follows the points
//! where a failure can surface:
//! - Format registry queries (`FormatError`)
//! - Filter construction (`ArgumentError`, `CompileError`)
//! - Frame retrieval (`FrameError`), shared verbatim by every waiter
//! - Property maps (`PropertyError`)
//! - Environment management (`EnvironmentError`)
//! - Writing clips out (`PipeError`)
//! - Loading graph descriptions (`GraphError`)

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a node in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Create a new random node ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Top-level error type for Framegraph.
///
/// This enum encompasses all error categories and enables automatic
/// conversion between specific error types.
#[derive(Error, Debug)]
pub enum FramegraphError {
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    #[error("Argument error: {0}")]
    Argument(#[from] ArgumentError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Property error: {0}")]
    Property(#[from] PropertyError),

    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Environment error: {0}")]
    Environment(#[from] EnvironmentError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Output error: {0}")]
    Pipe(#[from] PipeError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Errors from the pixel format registry.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormatError {
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Unknown format id {0:#x}")]
    UnknownFormat(u32),

    #[error("Unknown format name '{0}'")]
    UnknownName(String),
}

/// Construction-time errors raised when a filter is created.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArgumentError {
    #[error("{filter}: {message}")]
    InvalidArgument { filter: String, message: String },

    #[error("{filter}: argument '{argument}' is required")]
    MissingArgument { filter: String, argument: String },

    #[error("No filter named '{0}'")]
    UnknownFilter(String),
}

impl ArgumentError {
    /// Shorthand for an `InvalidArgument` error.
    pub fn invalid(filter: impl Into<String>, message: impl Into<String>) -> Self {
        ArgumentError::InvalidArgument {
            filter: filter.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a `MissingArgument` error.
    pub fn missing(filter: impl Into<String>, argument: impl Into<String>) -> Self {
        ArgumentError::MissingArgument {
            filter: filter.into(),
            argument: argument.into(),
        }
    }
}

/// Errors delivered by frame retrieval.
///
/// Cloneable because every requester coalesced onto one computation
/// receives the identical error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameError {
    #[error("Requested frame {index} but the clip only has {num_frames} frames")]
    OutOfRange { index: usize, num_frames: usize },

    #[error("{0}")]
    Filter(String),

    #[error("Internal invariant violated in node {node_id}: {message}")]
    InternalInvariantViolation { node_id: NodeId, message: String },

    #[error("Plane {plane} does not exist in a frame with {num_planes} planes")]
    PlaneIndex { plane: usize, num_planes: usize },

    #[error("Row {row} does not exist in a plane with {height} rows")]
    RowIndex { row: usize, height: usize },

    #[error("Plane samples are {actual} bytes wide, not {requested}")]
    SampleType { requested: usize, actual: usize },

    #[error("Frame is read-only")]
    ReadOnly,
}

impl FrameError {
    /// Create a filter error carrying the message verbatim.
    pub fn filter(message: impl Into<String>) -> Self {
        FrameError::Filter(message.into())
    }

    /// Check if this is an out-of-range request.
    pub fn is_out_of_range(&self) -> bool {
        matches!(self, FrameError::OutOfRange { .. })
    }

    /// Check if this error indicates a defective filter rather than bad input.
    pub fn is_defect(&self) -> bool {
        matches!(self, FrameError::InternalInvariantViolation { .. })
    }

    /// The user-facing message, without any wrapping.
    pub fn message(&self) -> String {
        self.to_string()
    }
}

/// Errors from property map access.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PropertyError {
    #[error("Key '{0}' not found")]
    KeyNotFound(String),

    #[error("Key '{key}' holds {found} values, not {expected}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Index {index} out of bounds for key '{key}' with {len} elements")]
    IndexOutOfBounds { key: String, index: usize, len: usize },

    #[error("Invalid key '{0}'")]
    InvalidKey(String),

    #[error("Property map is read-only")]
    ReadOnly,

    #[error("Property map is empty")]
    Empty,
}

/// Errors from compiling a postfix expression.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("empty expression")]
    EmptyExpression,

    #[error("failed to convert '{token}' to float (token {position})")]
    InvalidToken { token: String, position: usize },

    #[error("reference to undefined clip '{token}' (token {position})")]
    UndefinedClip { token: String, position: usize },

    #[error("insufficient values on stack for '{token}' (token {position}): need {needed}, have {available}")]
    StackUnderflow {
        token: String,
        position: usize,
        needed: usize,
        available: usize,
    },

    #[error("unconsumed values on stack: {0} left")]
    UnconsumedValues(usize),
}

/// Errors from the environment manager.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentError {
    #[error("No environment is current on this thread")]
    NoCurrentEnvironment,

    #[error("Environment {0} has been destroyed")]
    Destroyed(u64),

    #[error("An environment policy is already registered")]
    PolicyAlreadyRegistered,

    #[error("No environment policy is registered")]
    NoPolicy,

    #[error("Attribute '{0}' is not set in the current environment")]
    AttributeNotSet(String),

    #[error("Attribute '{0}' holds a value of a different type")]
    LocalTypeMismatch(String),
}

/// Errors from loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {error}")]
    Read { path: String, error: std::io::Error },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to start worker pool: {0}")]
    ThreadPool(String),
}

/// Errors from writing a clip to an output stream.
#[derive(Error, Debug)]
pub enum PipeError {
    #[error("{0}")]
    Unsupported(String),

    #[error("Failed to retrieve frame {index}: {error}")]
    Frame { index: usize, error: FrameError },

    #[error("Write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Output cancelled after {0} frames")]
    Cancelled(usize),
}

/// Errors from building a graph out of a JSON description.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Node '{0}' is referenced before it is defined")]
    UnknownNode(String),

    #[error("Node '{node}', argument '{key}': {message}")]
    InvalidValue {
        node: String,
        key: String,
        message: String,
    },

    #[error("Node '{node}': {error}")]
    Construction { node: String, error: ArgumentError },

    #[error("Output node '{0}' is not defined")]
    MissingOutput(String),
}

/// Result type alias for Framegraph operations.
pub type FramegraphResult<T> = Result<T, FramegraphError>;

/// Result type alias for format registry operations.
pub type FormatResult<T> = Result<T, FormatError>;

/// Result type alias for filter construction.
pub type ArgumentResult<T> = Result<T, ArgumentError>;

/// Result type alias for frame retrieval.
pub type FrameResult<T> = Result<T, FrameError>;

/// Result type alias for property access.
pub type PropertyResult<T> = Result<T, PropertyError>;

/// Result type alias for expression compilation.
pub type CompileResult<T> = Result<T, CompileError>;

/// Result type alias for environment operations.
pub type EnvironmentResult<T> = Result<T, EnvironmentError>;

/// Result type alias for graph descriptions.
pub type GraphResult<T> = Result<T, GraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_display_is_short() {
        let id = NodeId::new();
        assert_eq!(id.to_string().len(), 8);
        assert_ne!(id, NodeId::new());
    }

    #[test]
    fn test_filter_message_is_verbatim() {
        let err = FrameError::filter("Fail");
        assert_eq!(err.to_string(), "Fail");
        assert_eq!(err.message(), "Fail");
        assert!(!err.is_out_of_range());
    }

    #[test]
    fn test_error_conversion() {
        let err: FramegraphError = FrameError::OutOfRange {
            index: 3,
            num_frames: 0,
        }
        .into();
        assert!(matches!(err, FramegraphError::Frame(ref e) if e.is_out_of_range()));
    }

    #[test]
    fn test_argument_shorthands() {
        let err = ArgumentError::missing("Expr", "expr");
        assert_eq!(err.to_string(), "Expr: argument 'expr' is required");
        let err = ArgumentError::invalid("BlankClip", "invalid height");
        assert_eq!(err.to_string(), "BlankClip: invalid height");
    }
}
