//! engine.rs
//! The evaluation engine: resolves `(node, period)` requests against one
//! system and one population snapshot, memoizing every computed column.
//!
//! A request is a depth-first walk. Each walk keeps its own frame stack for
//! cycle detection; the ledger is shared, so concurrent walks never compute
//! the same key twice.

use super::cancel::CancelToken;
use super::column::{Column, ValueType};
use super::context::FormulaContext;
use super::error::EvalError;
use super::ledger::{Claim, Ledger, LedgerStats};
use crate::config::EngineConfig;
use crate::display::{TraceRecord, Tracer, ValueSource};
use crate::entities::Population;
use crate::graph::RuleNode;
use crate::period::Period;
use crate::system::System;
use rayon::prelude::*;
use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, trace, warn};

struct Frame {
    node: String,
    period: Period,
    reads: Vec<(String, Period)>,
}

/// State of one request's dependency walk. Never shared between threads.
pub(crate) struct Walk {
    id: u64,
    cancel: CancelToken,
    stack: RefCell<Vec<Frame>>,
}

impl Walk {
    /// Fails if `(name, period)` is already being computed by this walk, or
    /// if the walk is too deep.
    fn check_entry(&self, name: &str, period: &Period, max_depth: usize) -> Result<(), EvalError> {
        let stack = self.stack.borrow();
        if let Some(pos) = stack.iter().position(|f| f.node == name && f.period == *period) {
            let mut cycle: Vec<String> = stack[pos..].iter().map(|f| f.node.clone()).collect();
            cycle.push(name.to_string());
            return Err(EvalError::CyclicDependency { cycle });
        }
        if stack.len() >= max_depth {
            return Err(EvalError::RecursionLimit { node: name.to_string(), limit: max_depth });
        }
        Ok(())
    }

    fn note_read(&self, name: &str, period: Period) {
        if let Some(top) = self.stack.borrow_mut().last_mut() {
            if !top.reads.iter().any(|(n, p)| n == name && *p == period) {
                top.reads.push((name.to_string(), period));
            }
        }
    }

    fn push(&self, name: &str, period: Period) {
        self.stack.borrow_mut().push(Frame { node: name.to_string(), period, reads: Vec::new() });
    }

    fn pop(&self) -> Vec<(String, Period)> { self.stack.borrow_mut().pop().map(|f| f.reads).unwrap_or_default() }
}

/// One system evaluated against one population snapshot.
///
/// Baseline and reformed systems each get their own `Simulation`, so their
/// caches never mix. Several threads may call `evaluate` on the same
/// simulation; each key is still computed once.
pub struct Simulation {
    system: System,
    population: Arc<Population>,
    config: EngineConfig,
    ledger: Ledger,
    cancel: CancelToken,
    tracer: Option<Tracer>,
    next_walk: AtomicU64,
}

impl Simulation {
    pub fn new(system: System, population: impl Into<Arc<Population>>, config: EngineConfig) -> Self {
        let tracer = if config.trace { Some(Tracer::new()) } else { None };
        Self {
            system,
            population: population.into(),
            config,
            ledger: Ledger::new(),
            cancel: CancelToken::new(),
            tracer,
            next_walk: AtomicU64::new(1),
        }
    }

    pub fn system(&self) -> &System { &self.system }

    pub fn population(&self) -> &Population { &self.population }

    pub fn config(&self) -> &EngineConfig { &self.config }

    pub fn ledger_stats(&self) -> LedgerStats { self.ledger.stats() }

    /// Swaps the population snapshot. The cache is dropped unless the new
    /// snapshot is the one already loaded.
    pub fn set_population(&mut self, population: impl Into<Arc<Population>>) {
        let population = population.into();
        if population.snapshot_id() != self.population.snapshot_id() {
            debug!(old = self.population.snapshot_id(), new = population.snapshot_id(), "population swapped");
            self.ledger.clear();
            if let Some(tracer) = &self.tracer {
                tracer.clear();
            }
        }
        self.population = population;
    }

    /// Token aborting running and future evaluations; already cached values stay valid.
    pub fn cancel_token(&self) -> CancelToken { self.cancel.clone() }

    pub fn cancel(&self) { self.cancel.cancel(); }

    /// Clears a previous cancellation.
    pub fn resume(&self) { self.cancel.reset(); }

    #[instrument(level = "debug", skip(self, period), fields(period = %period))]
    pub fn evaluate(&self, name: &str, period: Period) -> Result<Column, EvalError> {
        let walk = self.new_walk(self.cancel.clone());
        self.resolve(&walk, name, &period)
    }

    /// Like `evaluate`, giving up with `Cancelled` once `timeout` has elapsed.
    pub fn evaluate_with_timeout(&self, name: &str, period: Period, timeout: Duration) -> Result<Column, EvalError> {
        let walk = self.new_walk(self.cancel.with_timeout(timeout));
        self.resolve(&walk, name, &period)
    }

    /// Evaluates independent requests, in parallel on the rayon pool when enabled.
    ///
    /// Parallel mode is only used when the rule graph has no same-scope cycle;
    /// otherwise the requests run one after the other.
    pub fn evaluate_many(&self, requests: &[(&str, Period)]) -> Vec<Result<Column, EvalError>> {
        let parallel = self.config.parallel && requests.len() > 1 && {
            let cycles = self.system.rules().find_cycles();
            if !cycles.is_empty() {
                warn!(cycles = cycles.len(), "rule graph has same-scope cycles; evaluating sequentially");
            }
            cycles.is_empty()
        };
        debug!(requests = requests.len(), parallel, "evaluate_many");

        if parallel {
            requests.par_iter().map(|(name, period)| self.evaluate(name, *period)).collect()
        } else {
            requests.iter().map(|(name, period)| self.evaluate(name, *period)).collect()
        }
    }

    pub fn tracer(&self) -> Option<&Tracer> { self.tracer.as_ref() }

    /// Audit tree of a computed value; `period` is the requested scope.
    pub fn format_trace(&self, name: &str, period: &Period) -> String {
        let Some(tracer) = &self.tracer else {
            return "Tracing is disabled (EngineConfig::trace)".to_string();
        };
        let stored = self
            .system
            .rules()
            .get(name)
            .and_then(|node| node.definition().normalize(period))
            .unwrap_or(*period);
        tracer.format_trace(name, &stored)
    }

    fn new_walk(&self, cancel: CancelToken) -> Walk {
        Walk { id: self.next_walk.fetch_add(1, Ordering::Relaxed), cancel, stack: RefCell::new(Vec::new()) }
    }

    // --- Resolution ---

    pub(crate) fn resolve(&self, walk: &Walk, name: &str, requested: &Period) -> Result<Column, EvalError> {
        walk.cancel.check()?;

        // 1. Node and scope
        let node = self.system.rules().get(name).ok_or_else(|| EvalError::UnknownNode(name.to_string()))?;
        let period = node.definition().normalize(requested).ok_or_else(|| EvalError::ScopeMismatch {
            node: name.to_string(),
            definition: node.definition(),
            period: *requested,
        })?;

        // 2. Same-scope cycles and depth, within this walk
        walk.check_entry(name, &period, self.config.max_depth)?;
        walk.note_read(name, period);

        let len = self
            .population
            .count(node.entity())
            .ok_or_else(|| EvalError::UnknownEntity(node.entity().to_string()))?;

        // 3. Memo table
        match self.ledger.claim(name, period, walk.id, &walk.cancel, self.config.wait_timeout())? {
            Claim::Ready(column) => {
                trace!(node = name, %period, "cache hit");
                Ok(column)
            }
            Claim::Compute(guard) => {
                walk.push(name, period);
                let result = self.compute(walk, node, period, len);
                let reads = walk.pop();
                let (column, source) = result?;

                if let Some(tracer) = &self.tracer {
                    tracer.record(TraceRecord {
                        node: name.to_string(),
                        period,
                        source,
                        reads,
                        summary: column.to_string(),
                    });
                }
                guard.fulfil(column.clone());
                Ok(column)
            }
        }
    }

    /// Population input for `node` at its normalized `period`.
    ///
    /// Inputs supplied at another scope are normalized like requests, so an
    /// eternal node takes an input given for any period (the latest one wins).
    /// An input whose scope the node cannot take is a `ScopeMismatch`.
    fn input_for(&self, node: &RuleNode, period: &Period) -> Result<Option<(&str, &Column)>, EvalError> {
        if let Some(exact) = self.population.input(node.name(), period) {
            return Ok(Some(exact));
        }
        if !self.population.has_input(node.name()) {
            return Ok(None);
        }
        let mut found = None;
        for (supplied, entity, column) in self.population.inputs_of(node.name()) {
            match node.definition().normalize(&supplied) {
                Some(normalized) if normalized == *period => found = Some((entity, column)),
                Some(_) => {}
                None => {
                    return Err(EvalError::ScopeMismatch {
                        node: node.name().to_string(),
                        definition: node.definition(),
                        period: supplied,
                    })
                }
            }
        }
        Ok(found)
    }

    /// Resolution order: neutralized, population input, active formula, default.
    fn compute(&self, walk: &Walk, node: &RuleNode, period: Period, len: usize) -> Result<(Column, ValueSource), EvalError> {
        if node.is_neutralized() {
            return Ok((Column::zeros(node.value_type(), len), ValueSource::Neutralized));
        }

        if let Some((entity, column)) = self.input_for(node, &period)? {
            if entity != node.entity() {
                return Err(EvalError::EntityMismatch {
                    node: node.name().to_string(),
                    expected: node.entity().to_string(),
                    found: entity.to_string(),
                });
            }
            return Ok((conform(node, column.clone(), len)?, ValueSource::Input));
        }

        let instant = match period {
            Period::Eternity => None,
            p => Some(p.instant_of()?),
        };
        match node.active_formula(instant) {
            Some(formula) => {
                debug!(node = node.name(), %period, "formula dispatch");
                let ctx = FormulaContext::new(self, walk, node, formula, period, len);
                let column = conform(node, formula.call(&ctx)?, len)?;
                Ok((self.system.numeric().apply(column), ValueSource::Formula))
            }
            None => Ok((Column::filled(node.default_value(), len), ValueSource::Default)),
        }
    }
}

/// Checks a produced column against the node's entity size and declared type.
/// Integer output of a float node is promoted.
fn conform(node: &RuleNode, column: Column, len: usize) -> Result<Column, EvalError> {
    if column.len() != len {
        return Err(EvalError::LengthMismatch {
            context: format!("value of '{}'", node.name()),
            expected: len,
            actual: column.len(),
        });
    }
    match (node.value_type(), column.value_type()) {
        (declared, actual) if declared == actual => Ok(column),
        (ValueType::Float, ValueType::Int) => Ok(column.to_float()),
        (declared, actual) => Err(EvalError::TypeMismatch {
            context: format!("value of '{}'", node.name()),
            left: declared,
            right: actual,
        }),
    }
}

/// Evaluates one request against a fresh simulation with the default configuration.
pub fn evaluate(system: &System, population: &Population, name: &str, period: Period) -> Result<Column, EvalError> {
    Simulation::new(system.clone(), population.clone(), EngineConfig::default()).evaluate(name, period)
}
