//! Hierarchical, time-versioned policy parameters.
//!
//! The tree is supplied already parsed (it deserializes from the nested maps a
//! YAML/JSON loader produces); this module only resolves and amends it.
pub mod error;
pub mod node;
pub mod scale;

pub use error::ParameterError;
pub use node::{At, Leaf, ParamValue, ParameterNode, Resolved, TimeSeries};
pub use scale::{Bracket, BracketTable, Scale};
