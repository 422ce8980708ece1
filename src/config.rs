//! config.rs
//! Engine settings. Every field has a default, so hosts may load a partial
//! JSON object.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Evaluate independent requests of `evaluate_many` on the rayon pool.
    pub parallel: bool,
    /// Maximum depth of the dependency walk (cross-scope recursion included).
    pub max_depth: usize,
    /// Record a computation trace for `format_trace` / `to_json`.
    pub trace: bool,
    /// How long a request waits on an in-flight computation before re-checking
    /// cancellation.
    pub wait_timeout_ms: u64,
    /// Instant used to read parameters from formulas evaluated at ETERNITY.
    pub eternity_instant: Option<NaiveDate>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { parallel: true, max_depth: 256, trace: false, wait_timeout_ms: 50, eternity_instant: None }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> { serde_json::from_str(json) }

    pub fn sequential() -> Self { Self { parallel: false, ..Self::default() } }

    pub fn with_trace(mut self) -> Self {
        self.trace = true;
        self
    }

    pub fn with_eternity_instant(mut self, instant: NaiveDate) -> Self {
        self.eternity_instant = Some(instant);
        self
    }

    pub fn wait_timeout(&self) -> Duration { Duration::from_millis(self.wait_timeout_ms.max(1)) }
}
