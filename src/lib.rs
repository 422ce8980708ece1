//! taxben_core: a rule-evaluation engine for tax and benefit systems.
//!
//! A `System` bundles an entity model, a graph of named rule nodes and a
//! time-versioned parameter tree. Reforms derive new systems from it without
//! touching the original, and a `Simulation` evaluates any node for a
//! population snapshot, memoizing every `(node, period)` it computes.

pub mod compute;
pub mod config;
pub mod display;
pub mod entities;
pub mod graph;
pub mod parameters;
pub mod period;
pub mod reform;
pub mod system;

pub use compute::{evaluate, CancelToken, Column, EvalError, FormulaContext, Scalar, Simulation, ValueType};
pub use config::EngineConfig;
pub use entities::{AggregateOp, EntityKind, EntityModel, Population, Role};
pub use graph::{Formula, GraphError, RuleGraph, RuleNode};
pub use parameters::{ParamValue, ParameterError, ParameterNode};
pub use period::{DefinitionPeriod, Period, PeriodError, PeriodUnit};
pub use reform::{apply_all, Amend, Amendment, Reform, ReformError};
pub use system::{Numeric, System};
