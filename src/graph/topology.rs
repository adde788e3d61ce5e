//! Structure of the DAG upstream of an output node.
//!
//! Nodes only know their direct dependencies, so the graph is rebuilt on
//! demand by walking them. Edges point in the direction frames flow: from a
//! dependency to the node that consumes it.

use crate::core::error::NodeId;
use crate::core::node::Node;
use petgraph::dot::{Config, Dot};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{DfsPostOrder, Reversed};
use petgraph::Direction;
use std::collections::HashMap;
use std::fmt;

/// Vertex weight: the node plus a short label for DOT output.
#[derive(Clone)]
pub struct GraphEntry {
    node: Node,
}

impl GraphEntry {
    /// The wrapped node.
    pub fn node(&self) -> &Node {
        &self.node
    }
}

impl fmt::Display for GraphEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let info = self.node.video_info();
        let format = info
            .format
            .map(|format| format.name())
            .unwrap_or_else(|| "any".to_string());
        write!(
            f,
            "{} [{}]\n{} {}x{} x{}",
            self.node.name(),
            self.node.id(),
            format,
            info.width,
            info.height,
            info.num_frames
        )
    }
}

/// Snapshot of everything an output node depends on.
pub struct NodeGraph {
    graph: DiGraph<GraphEntry, usize>,
    indices: HashMap<NodeId, NodeIndex>,
    output: NodeIndex,
}

impl NodeGraph {
    /// Walk the dependencies of `output`.
    ///
    /// A node reached along several paths appears once. The edge weight is
    /// the position of the dependency in its consumer's list.
    pub fn from_output(output: &Node) -> Self {
        let mut graph = DiGraph::new();
        let mut indices = HashMap::new();
        let root = graph.add_node(GraphEntry {
            node: output.clone(),
        });
        indices.insert(output.id(), root);

        let mut pending = vec![output.clone()];
        while let Some(node) = pending.pop() {
            let consumer = indices[&node.id()];
            for (slot, dependency) in node.dependencies().into_iter().enumerate() {
                let producer = match indices.get(&dependency.id()) {
                    Some(&index) => index,
                    None => {
                        let index = graph.add_node(GraphEntry {
                            node: dependency.clone(),
                        });
                        indices.insert(dependency.id(), index);
                        pending.push(dependency);
                        index
                    }
                };
                graph.add_edge(producer, consumer, slot);
            }
        }

        log::debug!(
            "graph for {} has {} nodes and {} edges",
            output.id(),
            graph.node_count(),
            graph.edge_count()
        );
        Self {
            graph,
            indices,
            output: root,
        }
    }

    /// Number of distinct nodes, output included.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of dependency links.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Whether `node` is part of this graph.
    pub fn contains(&self, node: &Node) -> bool {
        self.indices.contains_key(&node.id())
    }

    /// The node the graph was built from.
    pub fn output(&self) -> &Node {
        &self.graph[self.output].node
    }

    /// Every node, dependencies before the nodes that consume them.
    ///
    /// The output node is always last.
    pub fn dependency_order(&self) -> Vec<Node> {
        let reversed = Reversed(&self.graph);
        let mut dfs = DfsPostOrder::new(reversed, self.output);
        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(index) = dfs.next(reversed) {
            order.push(self.graph[index].node.clone());
        }
        order
    }

    /// Nodes without dependencies.
    pub fn sources(&self) -> Vec<Node> {
        self.graph
            .node_indices()
            .filter(|&index| {
                self.graph
                    .neighbors_directed(index, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|index| self.graph[index].node.clone())
            .collect()
    }

    /// Length of the longest source to output chain, counted in nodes.
    pub fn depth(&self) -> usize {
        let mut depths: HashMap<NodeIndex, usize> = HashMap::new();
        let reversed = Reversed(&self.graph);
        let mut dfs = DfsPostOrder::new(reversed, self.output);
        while let Some(index) = dfs.next(reversed) {
            let deepest = self
                .graph
                .neighbors_directed(index, Direction::Incoming)
                .filter_map(|dependency| depths.get(&dependency))
                .max()
                .copied()
                .unwrap_or(0);
            depths.insert(index, deepest + 1);
        }
        depths.get(&self.output).copied().unwrap_or(0)
    }

    /// Graphviz rendering.
    pub fn to_dot(&self) -> String {
        format!("{}", Dot::with_config(&self.graph, &[Config::EdgeNoLabel]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::format::Preset;
    use crate::execution::engine::Core;
    use crate::filters::builtin::testing::{blank, expr};

    #[test]
    fn test_single_node() {
        let core = Core::with_threads(1).unwrap();
        let clip = blank(&core, Preset::Gray8, 4, 4, &[]);
        let graph = NodeGraph::from_output(&clip);
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.edge_count(), 0);
        assert_eq!(graph.depth(), 1);
        assert_eq!(graph.dependency_order(), vec![clip.clone()]);
        assert_eq!(graph.sources(), vec![clip]);
    }

    #[test]
    fn test_shared_dependency_appears_once() {
        let core = Core::with_threads(1).unwrap();
        let src = blank(&core, Preset::Gray8, 4, 4, &[]);
        let left = expr(&core, vec![src.clone()], vec!["x 1 +"]).unwrap();
        let right = expr(&core, vec![src.clone()], vec!["x 2 +"]).unwrap();
        let out = expr(&core, vec![left.clone(), right.clone(), src.clone()], vec!["x y + z -"]).unwrap();

        let graph = NodeGraph::from_output(&out);
        assert_eq!(graph.node_count(), 4);
        assert_eq!(graph.edge_count(), 5);
        assert_eq!(graph.depth(), 3);
        assert_eq!(graph.sources(), vec![src.clone()]);
        assert!(graph.contains(&left));
        assert_eq!(graph.output(), &out);

        let order = graph.dependency_order();
        let position = |node: &Node| order.iter().position(|n| n == node).unwrap();
        assert_eq!(order.len(), 4);
        assert!(position(&src) < position(&left));
        assert!(position(&src) < position(&right));
        assert_eq!(position(&out), 3);
    }

    #[test]
    fn test_dot_output() {
        let core = Core::with_threads(1).unwrap();
        let src = blank(&core, Preset::Gray8, 4, 4, &[]);
        let out = expr(&core, vec![src], vec!["x"]).unwrap();
        let dot = NodeGraph::from_output(&out).to_dot();
        assert!(dot.starts_with("digraph"));
        assert!(dot.contains("BlankClip"));
        assert!(dot.contains("Expr"));
        assert!(dot.contains("->"));
    }
}
