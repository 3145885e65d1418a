//! Resolved, immutable dependency graph for one scenario selection.
//!
//! Nodes are stored in execution order: every node's dependencies have a
//! smaller index than the node itself.

pub mod builder;

pub use builder::build;

use crate::types::test::TestDef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// `Requires`: must pass first.
    Hard,
    /// `Suggests`: ordering only.
    Soft,
}

#[derive(Debug, Clone)]
pub struct GraphNode {
    pub name: String,
    /// `None` for an assumed name with no backing test.
    pub test: Option<TestDef>,
    pub assumed: bool,
    pub requires: Vec<usize>,
    pub suggests: Vec<usize>,
}

impl GraphNode {
    pub fn edges(&self) -> impl Iterator<Item = (usize, EdgeKind)> + '_ {
        self.requires
            .iter()
            .map(|&i| (i, EdgeKind::Hard))
            .chain(self.suggests.iter().map(|&i| (i, EdgeKind::Soft)))
    }
}

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    scenario: String,
    jig: String,
    nodes: Vec<GraphNode>,
}

impl DependencyGraph {
    pub(crate) fn new(scenario: &str, jig: &str, nodes: Vec<GraphNode>) -> Self {
        DependencyGraph {
            scenario: scenario.to_string(),
            jig: jig.to_string(),
            nodes,
        }
    }

    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    pub fn jig(&self) -> &str {
        &self.jig
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn node(&self, idx: usize) -> &GraphNode {
        &self.nodes[idx]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.name == name)
    }

    /// Node names in execution order.
    pub fn order(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name.as_str()).collect()
    }

    /// Names of the nodes that will actually execute.
    pub fn runnable(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| !n.assumed)
            .map(|n| n.name.as_str())
            .collect()
    }
}
