//! Defines the rule graph: named nodes, their dated formulas and the static
//! dependency analysis over declared reads.
pub mod dag;
pub mod error;
pub mod formula;
pub mod node;

pub use dag::RuleGraph;
pub use error::GraphError;
pub use formula::{Access, Dependency, Formula, FormulaFn};
pub use node::{DatedFormula, RuleNode, RuleNodeBuilder};
