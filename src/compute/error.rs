use super::column::ValueType;
use crate::parameters::ParameterError;
use crate::period::{DefinitionPeriod, Period, PeriodError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("Unknown node '{0}'")]
    UnknownNode(String),
    #[error("Cyclic dependency: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },
    #[error("Node '{node}' is defined for {definition:?} and cannot be evaluated for {period}")]
    ScopeMismatch { node: String, definition: DefinitionPeriod, period: Period },
    #[error("Type mismatch in {context}: {left:?} vs {right:?}")]
    TypeMismatch { context: String, left: ValueType, right: ValueType },
    #[error("Length mismatch in {context}: expected {expected}, got {actual}")]
    LengthMismatch { context: String, expected: usize, actual: usize },
    #[error("Formula of '{node}' reads '{dependency}' without declaring it")]
    UndeclaredDependency { node: String, dependency: String },
    #[error("Unknown entity '{0}'")]
    UnknownEntity(String),
    #[error("Node '{node}' belongs to entity '{found}' but '{expected}' was required")]
    EntityMismatch { node: String, expected: String, found: String },
    #[error(transparent)]
    Parameter(#[from] ParameterError),
    #[error(transparent)]
    Period(#[from] PeriodError),
    #[error("Recursion limit of {limit} reached while evaluating '{node}'")]
    RecursionLimit { node: String, limit: usize },
    #[error("Evaluation cancelled")]
    Cancelled,
    #[error("Formula of '{node}' failed: {message}")]
    Formula { node: String, message: String },
}
