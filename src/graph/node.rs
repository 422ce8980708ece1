//! Defines the `RuleNode`: one named, typed quantity of the tax-benefit
//! system, owned by an entity type and computed by dated formulas.

use super::error::GraphError;
use super::formula::Formula;
use crate::compute::{Scalar, ValueType};
use crate::period::DefinitionPeriod;
use chrono::NaiveDate;

/// A formula together with the first day it applies.
///
/// `start == None` means "since the beginning"; a formula stays active until
/// the next formula's start or the node's end date.
#[derive(Debug, Clone, PartialEq)]
pub struct DatedFormula {
    pub start: Option<NaiveDate>,
    pub formula: Formula,
}

/// A rule node. Nodes are never patched in place: amendments substitute the
/// whole node, so its formulas and their declared dependencies stay coherent.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleNode {
    name: String,
    value_type: ValueType,
    entity: String,
    definition: DefinitionPeriod,
    /// Sorted by start date, undated first.
    formulas: Vec<DatedFormula>,
    end: Option<NaiveDate>,
    label: String,
    references: Vec<String>,
    default_value: Scalar,
    neutralized: bool,
}

impl RuleNode {
    pub fn builder(name: &str, value_type: ValueType, entity: &str, definition: DefinitionPeriod) -> RuleNodeBuilder {
        RuleNodeBuilder {
            node: RuleNode {
                name: name.to_string(),
                value_type,
                entity: entity.to_string(),
                definition,
                formulas: Vec::new(),
                end: None,
                label: String::new(),
                references: Vec::new(),
                default_value: value_type.zero(),
                neutralized: false,
            },
        }
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn value_type(&self) -> ValueType { self.value_type }
    pub fn entity(&self) -> &str { &self.entity }
    pub fn definition(&self) -> DefinitionPeriod { self.definition }
    pub fn formulas(&self) -> &[DatedFormula] { &self.formulas }
    pub fn end(&self) -> Option<NaiveDate> { self.end }
    pub fn label(&self) -> &str { &self.label }
    pub fn references(&self) -> &[String] { &self.references }
    pub fn default_value(&self) -> Scalar { self.default_value }
    pub fn is_neutralized(&self) -> bool { self.neutralized }

    /// Source nodes have no formula and are read from the population.
    pub fn is_source(&self) -> bool { self.formulas.is_empty() }

    /// The formula in force at `instant`. Eternal nodes have no instant and
    /// use their single undated formula.
    pub fn active_formula(&self, instant: Option<NaiveDate>) -> Option<&Formula> {
        let Some(instant) = instant else {
            return self.formulas.iter().find(|f| f.start.is_none()).map(|f| &f.formula);
        };
        if self.end.is_some_and(|end| instant > end) {
            return None;
        }
        self.formulas
            .iter()
            .take_while(|f| f.start.map_or(true, |s| s <= instant))
            .last()
            .map(|f| &f.formula)
    }

    /// The same node with every formula replaced by the type's zero, for all scopes.
    pub fn neutralized(&self) -> RuleNode {
        RuleNode {
            formulas: Vec::new(),
            default_value: self.value_type.zero(),
            neutralized: true,
            ..self.clone()
        }
    }
}

pub struct RuleNodeBuilder {
    node: RuleNode,
}

impl RuleNodeBuilder {
    pub fn label(mut self, label: &str) -> Self {
        self.node.label = label.to_string();
        self
    }

    pub fn reference(mut self, url: &str) -> Self {
        self.node.references.push(url.to_string());
        self
    }

    pub fn default_value(mut self, value: impl Into<Scalar>) -> Self {
        self.node.default_value = value.into();
        self
    }

    /// An undated formula, active from the beginning.
    pub fn formula(mut self, formula: Formula) -> Self {
        self.node.formulas.push(DatedFormula { start: None, formula });
        self
    }

    pub fn formula_from(mut self, start: NaiveDate, formula: Formula) -> Self {
        self.node.formulas.push(DatedFormula { start: Some(start), formula });
        self
    }

    /// Last day any formula of the node applies.
    pub fn until(mut self, end: NaiveDate) -> Self {
        self.node.end = Some(end);
        self
    }

    pub fn build(mut self) -> Result<RuleNode, GraphError> {
        let node = &mut self.node;
        let name = node.name.clone();
        let invalid = |reason: &str| GraphError::InvalidNode { node: name.clone(), reason: reason.to_string() };

        if node.name.is_empty() {
            return Err(invalid("empty name"));
        }
        let default_type = node.default_value.value_type();
        let default_ok = default_type == node.value_type
            || (node.value_type == ValueType::Float && default_type == ValueType::Int);
        if !default_ok {
            return Err(invalid("default value does not match the declared value type"));
        }

        // 1. Validity intervals must not overlap
        node.formulas.sort_by_key(|f| f.start);
        if node.formulas.windows(2).any(|w| w[0].start == w[1].start) {
            return Err(invalid("two formulas start on the same date"));
        }

        // 2. Eternal nodes have no instant to select a formula by
        if node.definition == DefinitionPeriod::Eternity
            && (node.formulas.len() > 1 || node.formulas.iter().any(|f| f.start.is_some()))
        {
            return Err(invalid("an ETERNITY node takes at most one undated formula"));
        }

        if let Scalar::Int(v) = node.default_value {
            if node.value_type == ValueType::Float {
                node.default_value = Scalar::Float(v as f64);
            }
        }
        Ok(self.node)
    }
}
