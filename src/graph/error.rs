//! Defines the error types for building and editing the rule graph.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Node '{0}' is already defined")]
    DuplicateNodeName(String),
    #[error("Unknown node '{0}'")]
    UnknownNode(String),
    #[error("Invalid definition of node '{node}': {reason}")]
    InvalidNode { node: String, reason: String },
    #[error("Cyclic dependency: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },
    #[error("Node '{node}' belongs to unknown entity '{entity}'")]
    UnknownEntity { node: String, entity: String },
}
