//! JSON graph descriptions.
//!
//! A description lists named nodes in order. Each names a registered filter
//! and its arguments; a node refers to an earlier one with
//! `{"node": "name"}`. A string passed as `format` is looked up as a format
//! name, so `"YUV420P8"` works where a numeric id is expected.
//!
//! ```json
//! {
//!   "nodes": {
//!     "src": { "filter": "BlankClip", "args": { "format": "GRAY8", "color": [16] } },
//!     "out": { "filter": "Expr", "args": { "clips": [{ "node": "src" }], "expr": ["x 2 *"] } }
//!   },
//!   "output": "out"
//! }
//! ```

use crate::core::error::{FramegraphResult, GraphError, GraphResult};
use crate::core::node::Node;
use crate::core::props::{PropArray, PropertyMap};
use crate::execution::engine::Core;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// One node of a description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescription {
    /// Registered filter name.
    pub filter: String,
    /// Arguments by name.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub args: IndexMap<String, Value>,
}

impl NodeDescription {
    /// Node with no arguments yet.
    pub fn new(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            args: IndexMap::new(),
        }
    }

    /// Add an argument.
    pub fn arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }
}

/// Reference to another node, as written inside `args`.
pub fn node_ref(name: &str) -> Value {
    serde_json::json!({ "node": name })
}

/// A whole graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDescription {
    /// Format version.
    #[serde(default = "GraphDescription::default_version")]
    pub version: String,
    /// Nodes in definition order.
    pub nodes: IndexMap<String, NodeDescription>,
    /// Name of the node to output.
    pub output: String,
}

/// Nodes built from a description.
pub struct LoadedGraph {
    /// Every node by name.
    pub nodes: IndexMap<String, Node>,
    /// The output node.
    pub output: Node,
}

impl GraphDescription {
    /// Current format version.
    pub const VERSION: &'static str = "1.0";

    fn default_version() -> String {
        Self::VERSION.to_string()
    }

    /// Empty description whose output is `output`.
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            version: Self::default_version(),
            nodes: IndexMap::new(),
            output: output.into(),
        }
    }

    /// Append a node.
    pub fn with_node(mut self, name: impl Into<String>, node: NodeDescription) -> Self {
        self.nodes.insert(name.into(), node);
        self
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Serialize to JSON without whitespace.
    pub fn to_json_compact(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Read and parse a file.
    pub fn from_file(path: impl AsRef<Path>) -> FramegraphResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&text)?)
    }

    /// Instantiate every node with `core`.
    pub fn build(&self, core: &Core) -> GraphResult<LoadedGraph> {
        if !self.nodes.contains_key(&self.output) {
            return Err(GraphError::MissingOutput(self.output.clone()));
        }

        let mut nodes: IndexMap<String, Node> = IndexMap::with_capacity(self.nodes.len());
        for (name, description) in &self.nodes {
            let mut args = PropertyMap::new();
            for (key, value) in &description.args {
                let array = convert(core, &nodes, key, value).map_err(|message| {
                    GraphError::InvalidValue {
                        node: name.clone(),
                        key: key.clone(),
                        message,
                    }
                })?;
                args.set(key, array).map_err(|e| GraphError::InvalidValue {
                    node: name.clone(),
                    key: key.clone(),
                    message: e.to_string(),
                })?;
            }
            let node = core
                .invoke(&description.filter, &args)
                .map_err(|error| GraphError::Construction {
                    node: name.clone(),
                    error,
                })?;
            log::debug!("built '{}' as {} ({})", name, node.id(), description.filter);
            nodes.insert(name.clone(), node);
        }

        let output = nodes
            .get(&self.output)
            .cloned()
            .ok_or_else(|| GraphError::MissingOutput(self.output.clone()))?;
        Ok(LoadedGraph { nodes, output })
    }
}

enum Scalar {
    Int(i64),
    Float(f64),
    Data(String),
    Node(Node),
}

fn scalar(
    core: &Core,
    nodes: &IndexMap<String, Node>,
    key: &str,
    value: &Value,
) -> Result<Scalar, String> {
    match value {
        Value::Bool(b) => Ok(Scalar::Int(*b as i64)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(Scalar::Int(i)),
            None => n
                .as_f64()
                .map(Scalar::Float)
                .ok_or_else(|| format!("number {} is out of range", n)),
        },
        Value::String(s) if key == "format" => core
            .format_by_name(s)
            .map(|format| Scalar::Int(format.id.0 as i64))
            .map_err(|e| e.to_string()),
        Value::String(s) => Ok(Scalar::Data(s.clone())),
        Value::Object(object) => match object.get("node").and_then(Value::as_str) {
            Some(name) if object.len() == 1 => nodes
                .get(name)
                .cloned()
                .map(Scalar::Node)
                .ok_or_else(|| GraphError::UnknownNode(name.to_string()).to_string()),
            _ => Err("objects must have the form {\"node\": \"name\"}".to_string()),
        },
        Value::Null => Err("null is not a valid value".to_string()),
        Value::Array(_) => Err("nested arrays are not supported".to_string()),
    }
}

fn convert(
    core: &Core,
    nodes: &IndexMap<String, Node>,
    key: &str,
    value: &Value,
) -> Result<PropArray, String> {
    let values = match value {
        Value::Array(items) => items
            .iter()
            .map(|item| scalar(core, nodes, key, item))
            .collect::<Result<Vec<_>, _>>()?,
        other => vec![scalar(core, nodes, key, other)?],
    };

    // Integers widen to floats when mixed; other mixes are rejected.
    if values.iter().all(|v| matches!(v, Scalar::Int(_))) {
        return Ok(PropArray::Int(
            values
                .into_iter()
                .filter_map(|v| match v {
                    Scalar::Int(i) => Some(i),
                    _ => None,
                })
                .collect(),
        ));
    }
    if values
        .iter()
        .all(|v| matches!(v, Scalar::Int(_) | Scalar::Float(_)))
    {
        return Ok(PropArray::Float(
            values
                .into_iter()
                .filter_map(|v| match v {
                    Scalar::Int(i) => Some(i as f64),
                    Scalar::Float(f) => Some(f),
                    _ => None,
                })
                .collect(),
        ));
    }
    if values.iter().all(|v| matches!(v, Scalar::Data(_))) {
        return Ok(PropArray::Data(
            values
                .into_iter()
                .filter_map(|v| match v {
                    Scalar::Data(s) => Some(s.into_bytes()),
                    _ => None,
                })
                .collect(),
        ));
    }
    if values.iter().all(|v| matches!(v, Scalar::Node(_))) {
        return Ok(PropArray::Node(
            values
                .into_iter()
                .filter_map(|v| match v {
                    Scalar::Node(n) => Some(n),
                    _ => None,
                })
                .collect(),
        ));
    }
    Err("array elements must all have the same type".to_string())
}
