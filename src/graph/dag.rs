//! dag.rs
//! The rule graph: every node of a system by name, plus the static
//! dependency analysis built on the formulas' declared reads.

use super::error::GraphError;
use super::formula::Access;
use super::node::RuleNode;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleGraph {
    nodes: BTreeMap<String, Arc<RuleNode>>,
}

impl RuleGraph {
    pub fn new() -> Self { Self::default() }

    pub fn add_node(&mut self, node: RuleNode) -> Result<(), GraphError> {
        if self.nodes.contains_key(node.name()) {
            return Err(GraphError::DuplicateNodeName(node.name().to_string()));
        }
        self.nodes.insert(node.name().to_string(), Arc::new(node));
        Ok(())
    }

    /// Substitutes an existing node wholesale.
    pub fn replace_node(&mut self, node: RuleNode) -> Result<(), GraphError> {
        match self.nodes.get_mut(node.name()) {
            Some(slot) => {
                *slot = Arc::new(node);
                Ok(())
            }
            None => Err(GraphError::UnknownNode(node.name().to_string())),
        }
    }

    pub fn neutralize(&mut self, name: &str) -> Result<(), GraphError> {
        let slot = self.nodes.get_mut(name).ok_or_else(|| GraphError::UnknownNode(name.to_string()))?;
        *slot = Arc::new(slot.neutralized());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<RuleNode>> { self.nodes.get(name) }

    pub fn contains(&self, name: &str) -> bool { self.nodes.contains_key(name) }

    pub fn names(&self) -> impl Iterator<Item = &str> { self.nodes.keys().map(String::as_str) }

    pub fn nodes(&self) -> impl Iterator<Item = &RuleNode> { self.nodes.values().map(|n| n.as_ref()) }

    pub fn len(&self) -> usize { self.nodes.len() }

    pub fn is_empty(&self) -> bool { self.nodes.is_empty() }

    // --- Graph Algorithms ---

    /// Same-scope read edges `reader -> dependency` over every formula of every
    /// node. Offset and sub-period reads are left out: they move to another
    /// scope and may legitimately point back at the reader.
    pub fn dependency_graph(&self) -> DiGraph<String, ()> {
        let mut graph = DiGraph::with_capacity(self.nodes.len(), self.nodes.len());
        let index: HashMap<&str, NodeIndex> =
            self.nodes.keys().map(|name| (name.as_str(), graph.add_node(name.clone()))).collect();

        for node in self.nodes.values() {
            let from = index[node.name()];
            let targets: BTreeSet<&str> = node
                .formulas()
                .iter()
                .flat_map(|f| f.formula.dependencies())
                .filter(|d| d.access == Access::Same)
                .map(|d| d.node.as_str())
                .collect();
            for target in targets {
                if let Some(&to) = index.get(target) {
                    graph.add_edge(from, to, ());
                }
            }
        }
        graph
    }

    /// Every same-scope cycle, each listed as the sorted names of its members.
    pub fn find_cycles(&self) -> Vec<Vec<String>> {
        let graph = self.dependency_graph();
        let mut cycles: Vec<Vec<String>> = tarjan_scc(&graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
            .map(|scc| {
                let mut names: Vec<String> = scc.into_iter().map(|i| graph[i].clone()).collect();
                names.sort();
                names
            })
            .collect();
        cycles.sort();
        cycles
    }

    /// Nodes whose formulas read `name`, in any way.
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.nodes
            .values()
            .filter(|n| n.formulas().iter().any(|f| f.formula.dependencies().iter().any(|d| d.node == name)))
            .map(|n| n.name().to_string())
            .collect()
    }

    /// Declared reads of nodes that are not in the graph, as `(reader, missing)`.
    pub fn missing_dependencies(&self) -> Vec<(String, String)> {
        let mut missing = BTreeSet::new();
        for node in self.nodes.values() {
            for f in node.formulas() {
                for d in f.formula.dependencies() {
                    if !self.nodes.contains_key(&d.node) {
                        missing.insert((node.name().to_string(), d.node.clone()));
                    }
                }
            }
        }
        missing.into_iter().collect()
    }
}
