//! Human- and machine-readable views of an evaluation.
pub mod trace;

pub use trace::{TraceRecord, Tracer, ValueSource};
