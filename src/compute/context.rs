//! context.rs
//! What a formula sees while it runs: its own scope and entity, checked reads
//! of other nodes, entity aggregation and parameter lookup.

use super::column::{Column, Scalar, ValueType};
use super::engine::{Simulation, Walk};
use super::error::EvalError;
use crate::entities::{aggregate, project, AggregateOp, Membership};
use crate::graph::{Access, Formula, RuleNode};
use crate::parameters::BracketTable;
use crate::period::{Period, PeriodError, PeriodUnit};
use chrono::NaiveDate;

/// Borrowed view handed to a formula for the duration of one call.
///
/// Every read goes through the declared dependency list of the running
/// formula; anything else is `UndeclaredDependency`.
pub struct FormulaContext<'a> {
    sim: &'a Simulation,
    walk: &'a Walk,
    node: &'a RuleNode,
    formula: &'a Formula,
    period: Period,
    len: usize,
}

impl<'a> FormulaContext<'a> {
    pub(crate) fn new(
        sim: &'a Simulation,
        walk: &'a Walk,
        node: &'a RuleNode,
        formula: &'a Formula,
        period: Period,
        len: usize,
    ) -> Self {
        Self { sim, walk, node, formula, period, len }
    }

    /// Number of instances of the node's entity.
    pub fn len(&self) -> usize { self.len }

    pub fn is_empty(&self) -> bool { self.len == 0 }

    pub fn period(&self) -> Period { self.period }

    pub fn node(&self) -> &str { self.node.name() }

    pub fn entity(&self) -> &str { self.node.entity() }

    fn require(&self, name: &str, access: Access) -> Result<(), EvalError> {
        if self.formula.declares(name, access) {
            Ok(())
        } else {
            Err(EvalError::UndeclaredDependency { node: self.node.name().to_string(), dependency: name.to_string() })
        }
    }

    fn dependency(&self, name: &str) -> Result<&'a RuleNode, EvalError> {
        self.sim
            .system()
            .rules()
            .get(name)
            .map(|node| node.as_ref())
            .ok_or_else(|| EvalError::UnknownNode(name.to_string()))
    }

    fn same_entity(&self, dep: &RuleNode) -> Result<(), EvalError> {
        if dep.entity() == self.node.entity() {
            Ok(())
        } else {
            Err(EvalError::EntityMismatch {
                node: dep.name().to_string(),
                expected: self.node.entity().to_string(),
                found: dep.entity().to_string(),
            })
        }
    }

    // --- Node reads ---

    /// Value of `name` over the current scope.
    pub fn get(&self, name: &str) -> Result<Column, EvalError> {
        self.require(name, Access::Same)?;
        self.same_entity(self.dependency(name)?)?;
        self.sim.resolve(self.walk, name, &self.period)
    }

    /// Value of `name` over the current scope shifted by `n` units.
    pub fn get_offset(&self, name: &str, n: i32, unit: PeriodUnit) -> Result<Column, EvalError> {
        self.require(name, Access::Offset(n, unit))?;
        self.same_entity(self.dependency(name)?)?;
        let shifted = self.period.offset(n, unit)?;
        self.sim.resolve(self.walk, name, &shifted)
    }

    /// Sum of `name` over the sub-periods of the current scope, cut at the
    /// dependency's own granularity (e.g. twelve months of a yearly scope).
    pub fn get_added(&self, name: &str) -> Result<Column, EvalError> {
        self.require(name, Access::Added)?;
        let dep = self.dependency(name)?;
        self.same_entity(dep)?;

        let Some(unit) = dep.definition().unit() else {
            return self.sim.resolve(self.walk, name, &Period::Eternity);
        };
        let mut total: Option<Column> = None;
        for sub in self.period.subperiods(unit)? {
            let value = self.sim.resolve(self.walk, name, &sub)?;
            total = Some(match total {
                Some(acc) => acc.add(&value)?,
                None => value,
            });
        }
        Ok(total.unwrap_or_else(|| Column::zeros(dep.value_type(), self.len)))
    }

    // --- Entity aggregation ---

    fn own_membership(&self) -> Result<&'a Membership, EvalError> {
        let model = self.sim.system().entities();
        if model.is_person(self.node.entity()) {
            return Err(EvalError::EntityMismatch {
                node: self.node.name().to_string(),
                expected: "a group entity".to_string(),
                found: self.node.entity().to_string(),
            });
        }
        self.sim
            .population()
            .membership(self.node.entity())
            .ok_or_else(|| EvalError::UnknownEntity(self.node.entity().to_string()))
    }

    fn member_values(&self, name: &str) -> Result<Column, EvalError> {
        self.require(name, Access::Same)?;
        let dep = self.dependency(name)?;
        let person = self.sim.system().entities().person();
        if dep.entity() != person.key {
            return Err(EvalError::EntityMismatch {
                node: name.to_string(),
                expected: person.key.clone(),
                found: dep.entity().to_string(),
            });
        }
        self.sim.resolve(self.walk, name, &self.period)
    }

    /// Reduces a person-level node to this group entity.
    pub fn aggregate(&self, name: &str, op: AggregateOp) -> Result<Column, EvalError> {
        let membership = self.own_membership()?;
        aggregate(membership, &self.member_values(name)?, op, None)
    }

    /// Like `aggregate`, counting only members holding `role`.
    pub fn aggregate_role(&self, name: &str, op: AggregateOp, role: &str) -> Result<Column, EvalError> {
        let membership = self.own_membership()?;
        aggregate(membership, &self.member_values(name)?, op, Some(role))
    }

    pub fn sum_members(&self, name: &str) -> Result<Column, EvalError> { self.aggregate(name, AggregateOp::Sum) }

    /// Members per group, optionally restricted to one role.
    pub fn members_count(&self, role: Option<&str>) -> Result<Column, EvalError> {
        let membership = self.own_membership()?;
        let persons = Column::zeros(ValueType::Int, membership.person_count());
        aggregate(membership, &persons, AggregateOp::Count, role)
    }

    /// Value of the group-level node `name` broadcast onto each person.
    pub fn group(&self, group_key: &str, name: &str) -> Result<Column, EvalError> {
        self.require(name, Access::Same)?;
        let dep = self.dependency(name)?;
        if !self.sim.system().entities().is_person(self.node.entity()) {
            return Err(EvalError::EntityMismatch {
                node: self.node.name().to_string(),
                expected: self.sim.system().entities().person().key.clone(),
                found: self.node.entity().to_string(),
            });
        }
        if dep.entity() != group_key {
            return Err(EvalError::EntityMismatch {
                node: name.to_string(),
                expected: group_key.to_string(),
                found: dep.entity().to_string(),
            });
        }
        let membership = self
            .sim
            .population()
            .membership(group_key)
            .ok_or_else(|| EvalError::UnknownEntity(group_key.to_string()))?;
        project(membership, &self.sim.resolve(self.walk, name, &self.period)?)
    }

    // --- Parameters ---

    /// Instant parameters are read at: the start of the scope, or the
    /// configured instant for ETERNITY.
    pub fn instant(&self) -> Result<NaiveDate, EvalError> {
        match self.period {
            Period::Eternity => self
                .sim
                .config()
                .eternity_instant
                .ok_or(EvalError::Period(PeriodError::EternityArithmetic { op: "instant_of" })),
            p => Ok(p.instant_of()?),
        }
    }

    pub fn param(&self, path: &str) -> Result<f64, EvalError> { self.param_at(path, self.instant()?) }

    pub fn param_at(&self, path: &str, instant: NaiveDate) -> Result<f64, EvalError> {
        Ok(self.sim.system().parameters().resolve(path, instant)?.number(path)?)
    }

    pub fn flag(&self, path: &str) -> Result<bool, EvalError> {
        let instant = self.instant()?;
        Ok(self.sim.system().parameters().resolve(path, instant)?.flag(path)?)
    }

    pub fn scale(&self, path: &str) -> Result<BracketTable, EvalError> { self.scale_at(path, self.instant()?) }

    pub fn scale_at(&self, path: &str, instant: NaiveDate) -> Result<BracketTable, EvalError> {
        let resolved = self.sim.system().parameters().resolve(path, instant)?;
        resolved.into_scale(path).map_err(EvalError::from)
    }

    // --- Helpers ---

    /// Column of `len()` copies of `value`.
    pub fn fill(&self, value: impl Into<Scalar>) -> Column { Column::filled(value.into(), self.len) }

    /// Error for a formula-specific failure, tagged with the running node.
    pub fn fail(&self, message: impl Into<String>) -> EvalError {
        EvalError::Formula { node: self.node.name().to_string(), message: message.into() }
    }
}
