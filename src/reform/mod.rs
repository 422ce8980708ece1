//! Amendments: pure `System -> System` edits, alone or bundled into named reforms.
//!
//! A bundle works on a private copy of the system and only returns it once
//! every edit succeeded, so a failed reform never leaves a partial system.
use crate::graph::{GraphError, RuleNode};
use crate::parameters::{ParamValue, ParameterError, ParameterNode};
use crate::system::System;
use chrono::NaiveDate;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AmendmentError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Parameter(#[from] ParameterError),
}

/// Which edit of which reform failed, and why.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Reform '{reform}' failed at edit {step} ({edit}): {source}")]
pub struct ReformError {
    pub reform: String,
    pub step: usize,
    pub edit: String,
    pub source: AmendmentError,
}

/// A primitive structural edit.
#[derive(Debug, Clone, PartialEq)]
pub enum Amendment {
    AddNode(RuleNode),
    /// Whole-node substitution; the node must already exist.
    ReplaceNode(RuleNode),
    Neutralize(String),
    /// Grafts `subtree` as child `name` of the parameter subtree at `path`.
    MergeParameters { path: String, name: String, subtree: ParameterNode },
    /// New value of a parameter leaf from `from` onward.
    UpdateParameter { path: String, from: NaiveDate, value: ParamValue },
}

impl Amendment {
    pub fn describe(&self) -> String {
        match self {
            Amendment::AddNode(node) => format!("add {}", node.name()),
            Amendment::ReplaceNode(node) => format!("replace {}", node.name()),
            Amendment::Neutralize(name) => format!("neutralize {}", name),
            Amendment::MergeParameters { path, name, .. } => format!("merge parameters {}.{}", path, name),
            Amendment::UpdateParameter { path, from, .. } => format!("update parameter {} from {}", path, from),
        }
    }

    /// Applies the edit to a system under construction.
    fn apply_in_place(&self, draft: &mut System) -> Result<(), AmendmentError> {
        match self {
            Amendment::AddNode(node) => Arc::make_mut(&mut draft.rules).add_node(node.clone())?,
            Amendment::ReplaceNode(node) => Arc::make_mut(&mut draft.rules).replace_node(node.clone())?,
            Amendment::Neutralize(name) => Arc::make_mut(&mut draft.rules).neutralize(name)?,
            Amendment::MergeParameters { path, name, subtree } => {
                // Checked before make_mut so a failing merge never copies the tree.
                match draft.parameters.get(path)? {
                    ParameterNode::Subtree(children) if children.contains_key(name) => {
                        return Err(ParameterError::DuplicateChildName { path: path.clone(), name: name.clone() }.into());
                    }
                    ParameterNode::Subtree(_) => {}
                    _ => return Err(ParameterError::NotASubtree { path: path.clone() }.into()),
                }
                Arc::make_mut(&mut draft.parameters).merge_subtree(path, name, subtree.clone())?
            }
            Amendment::UpdateParameter { path, from, value } => {
                Arc::make_mut(&mut draft.parameters).update_value(path, *from, *value)?
            }
        }
        Ok(())
    }
}

/// Anything that turns one system into another.
pub trait Amend {
    fn name(&self) -> String;
    fn apply(&self, system: &System) -> Result<System, ReformError>;
}

impl Amend for Amendment {
    fn name(&self) -> String { self.describe() }

    fn apply(&self, system: &System) -> Result<System, ReformError> {
        let mut draft = system.clone();
        self.apply_in_place(&mut draft).map_err(|source| ReformError {
            reform: self.describe(),
            step: 0,
            edit: self.describe(),
            source,
        })?;
        Ok(draft)
    }
}

/// A named, ordered bundle of amendments applied all-or-nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct Reform {
    name: String,
    edits: Vec<Amendment>,
}

impl Reform {
    pub fn new(name: &str) -> Self { Self { name: name.to_string(), edits: Vec::new() } }

    pub fn edits(&self) -> &[Amendment] { &self.edits }

    pub fn with(mut self, edit: Amendment) -> Self {
        self.edits.push(edit);
        self
    }

    pub fn add_node(self, node: RuleNode) -> Self { self.with(Amendment::AddNode(node)) }

    pub fn replace_node(self, node: RuleNode) -> Self { self.with(Amendment::ReplaceNode(node)) }

    pub fn neutralize(self, name: &str) -> Self { self.with(Amendment::Neutralize(name.to_string())) }

    pub fn merge_parameters(self, path: &str, name: &str, subtree: ParameterNode) -> Self {
        self.with(Amendment::MergeParameters { path: path.to_string(), name: name.to_string(), subtree })
    }

    pub fn update_parameter(self, path: &str, from: NaiveDate, value: impl Into<ParamValue>) -> Self {
        self.with(Amendment::UpdateParameter { path: path.to_string(), from, value: value.into() })
    }
}

impl Amend for Reform {
    fn name(&self) -> String { self.name.clone() }

    fn apply(&self, system: &System) -> Result<System, ReformError> {
        let mut draft = system.clone();
        for (step, edit) in self.edits.iter().enumerate() {
            debug!(reform = %self.name, step, edit = %edit.describe(), "applying edit");
            edit.apply_in_place(&mut draft).map_err(|source| ReformError {
                reform: self.name.clone(),
                step,
                edit: edit.describe(),
                source,
            })?;
        }
        draft.applied_reforms.push(self.name.clone());
        info!(reform = %self.name, edits = self.edits.len(), "reform applied");
        Ok(draft)
    }
}

/// Applies `reforms` left to right; each one sees the result of the previous.
pub fn apply_all(system: &System, reforms: &[&dyn Amend]) -> Result<System, ReformError> {
    let mut current = system.clone();
    for reform in reforms {
        current = reform.apply(&current)?;
    }
    Ok(current)
}
