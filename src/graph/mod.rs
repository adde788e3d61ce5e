//! Whole-graph views.
//!
//! Nodes hold their dependencies directly, so these are tools on top of that
//! structure rather than a separate graph representation: inspecting what an
//! output depends on, and building a graph from a JSON description.

pub mod serialization;
pub mod topology;

pub use serialization::{node_ref, GraphDescription, LoadedGraph, NodeDescription};
pub use topology::{GraphEntry, NodeGraph};
