//! Vectorised evaluation: value columns, the per-simulation memo ledger and
//! the engine that resolves `(node, period)` requests.
pub mod cancel;
pub mod column;
pub mod context;
pub mod engine;
pub mod error;
pub mod ledger;

pub use cancel::CancelToken;
pub use column::{Column, Scalar, ValueType};
pub use context::FormulaContext;
pub use engine::{evaluate, Simulation};
pub use error::EvalError;
pub use ledger::{Claim, ClaimGuard, Ledger, LedgerStats};
