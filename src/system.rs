//! system.rs
//! An immutable tax-benefit system: entity model, rule graph and parameter
//! tree. Editing always goes through the reform module and yields a new value.

use crate::compute::Column;
use crate::entities::EntityModel;
use crate::graph::{GraphError, RuleGraph};
use crate::parameters::ParameterNode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Numeric representation of every float a formula produces, declared once per system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Numeric {
    #[default]
    Float64,
    /// Float results are rounded to `places` decimals (e.g. 2 for pence).
    FixedDecimal { places: u32 },
}

impl Numeric {
    pub fn apply(&self, column: Column) -> Column {
        match self {
            Numeric::Float64 => column,
            Numeric::FixedDecimal { places } => column.round(*places),
        }
    }
}

/// Cloning is cheap: the parts are shared and copied on write by amendments.
#[derive(Debug, Clone, PartialEq)]
pub struct System {
    pub(crate) entities: Arc<EntityModel>,
    pub(crate) rules: Arc<RuleGraph>,
    pub(crate) parameters: Arc<ParameterNode>,
    numeric: Numeric,
    pub(crate) applied_reforms: Vec<String>,
}

impl System {
    pub fn new(entities: EntityModel, rules: RuleGraph, parameters: ParameterNode) -> Self {
        Self {
            entities: Arc::new(entities),
            rules: Arc::new(rules),
            parameters: Arc::new(parameters),
            numeric: Numeric::default(),
            applied_reforms: Vec::new(),
        }
    }

    pub fn with_numeric(mut self, numeric: Numeric) -> Self {
        self.numeric = numeric;
        self
    }

    pub fn entities(&self) -> &EntityModel { &self.entities }

    pub fn rules(&self) -> &RuleGraph { &self.rules }

    pub fn parameters(&self) -> &ParameterNode { &self.parameters }

    pub fn numeric(&self) -> Numeric { self.numeric }

    /// Names of the reforms applied to reach this system, oldest first.
    pub fn applied_reforms(&self) -> &[String] { &self.applied_reforms }

    /// Static checks: every node's entity exists and no same-scope cycle exists.
    ///
    /// Reads of undefined nodes are only logged; they fail with `UnknownNode`
    /// when (and if) they are evaluated.
    pub fn validate(&self) -> Result<(), GraphError> {
        for node in self.rules.nodes() {
            if self.entities.kind(node.entity()).is_none() {
                return Err(GraphError::UnknownEntity { node: node.name().to_string(), entity: node.entity().to_string() });
            }
        }
        if let Some(cycle) = self.rules.find_cycles().into_iter().next() {
            return Err(GraphError::CyclicDependency { cycle });
        }
        for (reader, missing) in self.rules.missing_dependencies() {
            warn!(node = %reader, dependency = %missing, "formula reads an undefined node");
        }
        Ok(())
    }
}
