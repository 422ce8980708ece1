//! formula.rs
//! Formulas are opaque closures plus the list of nodes they are allowed to
//! read. The declared list is what makes static cycle analysis possible; the
//! evaluator rejects any read that is not on it.

use crate::compute::{Column, EvalError, FormulaContext, Scalar};
use crate::period::PeriodUnit;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

pub type FormulaFn = dyn Fn(&FormulaContext<'_>) -> Result<Column, EvalError> + Send + Sync;

/// How a formula reads one of its dependencies, relative to its own scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    /// Same scope (also used for member aggregates and group projections).
    Same,
    /// A shifted scope, e.g. `Offset(-1, Year)` for last year.
    Offset(i32, PeriodUnit),
    /// Sum over the sub-periods of the current scope.
    Added,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
    pub node: String,
    pub access: Access,
}

#[derive(Clone)]
pub struct Formula {
    dependencies: SmallVec<[Dependency; 4]>,
    func: Arc<FormulaFn>,
}

impl Formula {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&FormulaContext<'_>) -> Result<Column, EvalError> + Send + Sync + 'static,
    {
        Self { dependencies: SmallVec::new(), func: Arc::new(func) }
    }

    /// A formula returning the same value for every entity instance.
    pub fn constant(value: impl Into<Scalar>) -> Self {
        let value = value.into();
        Self::new(move |ctx| Ok(ctx.fill(value)))
    }

    pub fn reads(self, node: &str) -> Self { self.declare(node, Access::Same) }

    pub fn reads_offset(self, node: &str, n: i32, unit: PeriodUnit) -> Self {
        self.declare(node, Access::Offset(n, unit))
    }

    pub fn reads_added(self, node: &str) -> Self { self.declare(node, Access::Added) }

    fn declare(mut self, node: &str, access: Access) -> Self {
        let dep = Dependency { node: node.to_string(), access };
        if !self.dependencies.contains(&dep) {
            self.dependencies.push(dep);
        }
        self
    }

    pub fn dependencies(&self) -> &[Dependency] { &self.dependencies }

    pub fn declares(&self, node: &str, access: Access) -> bool {
        self.dependencies.iter().any(|d| d.node == node && d.access == access)
    }

    pub fn call(&self, ctx: &FormulaContext<'_>) -> Result<Column, EvalError> { (self.func)(ctx) }
}

impl fmt::Debug for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Formula").field("dependencies", &self.dependencies).finish_non_exhaustive()
    }
}

/// Two formulas are equal when they share the same closure and declarations.
impl PartialEq for Formula {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.func, &other.func) && self.dependencies == other.dependencies
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declarations_are_deduplicated() {
        let f = Formula::constant(1.0)
            .reads("age")
            .reads("age")
            .reads_offset("salary", -1, PeriodUnit::Year)
            .reads_added("salary");
        assert_eq!(f.dependencies().len(), 3);
        assert!(f.declares("salary", Access::Offset(-1, PeriodUnit::Year)));
        assert!(!f.declares("salary", Access::Same));
    }

    #[test]
    fn test_equality_is_by_closure_identity() {
        let a = Formula::constant(1.0).reads("x");
        let b = a.clone();
        let c = Formula::constant(1.0).reads("x");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
