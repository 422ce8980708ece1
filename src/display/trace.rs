//! trace.rs
//! Computation trace: which source produced each `(node, period)` value and
//! what it read, rendered as an indented audit tree or exported as JSON.

use crate::period::Period;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueSource {
    Input,
    Formula,
    Default,
    Neutralized,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceRecord {
    pub node: String,
    pub period: Period,
    pub source: ValueSource,
    /// Values read by the formula, in first-read order.
    pub reads: Vec<(String, Period)>,
    /// Leading values of the computed column.
    pub summary: String,
}

#[derive(Debug, Default)]
pub struct Tracer {
    records: Mutex<BTreeMap<(String, Period), TraceRecord>>,
}

impl Tracer {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<(String, Period), TraceRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Keeps the first record of a key; a value is computed once per ledger.
    pub fn record(&self, record: TraceRecord) {
        self.lock().entry((record.node.clone(), record.period)).or_insert(record);
    }

    pub fn get(&self, node: &str, period: &Period) -> Option<TraceRecord> {
        self.lock().get(&(node.to_string(), *period)).cloned()
    }

    pub fn records(&self) -> Vec<TraceRecord> { self.lock().values().cloned().collect() }

    pub fn clear(&self) { self.lock().clear(); }

    pub fn to_json(&self) -> Result<String, serde_json::Error> { serde_json::to_string_pretty(&self.records()) }

    pub fn format_trace(&self, node: &str, period: &Period) -> String {
        let records = self.lock().clone();
        let mut printer = TracePrinter { records: &records, first_seen: HashMap::new(), output: String::new() };

        if records.contains_key(&(node.to_string(), *period)) {
            let _ = writeln!(printer.output, "AUDIT TRACE for node '{}' at {}:", node, period);
            let _ = writeln!(printer.output, "--------------------------------------------------");
            printer.print(node, period, 1, "");
        } else {
            let _ = writeln!(printer.output, "No trace recorded for '{}' at {}", node, period);
        }
        printer.output
    }
}

struct TracePrinter<'a> {
    records: &'a BTreeMap<(String, Period), TraceRecord>,
    first_seen: HashMap<(String, Period), usize>,
    output: String,
}

impl TracePrinter<'_> {
    fn print(&mut self, node: &str, period: &Period, level: usize, prefix: &str) {
        let key = (node.to_string(), *period);
        if let Some(&first) = self.first_seen.get(&key) {
            let _ = writeln!(self.output, "{}{}@{} -> (Ref to L{})", prefix, node, period, first);
            return;
        }
        self.first_seen.insert(key.clone(), level);

        let Some(record) = self.records.get(&key) else {
            let _ = writeln!(self.output, "{}[L{}] {}@{} [?]", prefix, level, node, period);
            return;
        };
        let _ = writeln!(
            self.output,
            "{}[L{}] {}@{} {} <- {:?}",
            prefix, level, node, period, record.summary, record.source
        );

        let stem = prefix.replace("`--", "   ").replace("|--", "|  ");
        for (i, (child, child_period)) in record.reads.iter().enumerate() {
            let connector = if i + 1 == record.reads.len() { "`--" } else { "|--" };
            self.print(child, child_period, level + 1, &format!("{}{}", stem, connector));
        }
    }
}
