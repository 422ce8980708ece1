//! ledger.rs
//! Memo table of computed columns for one system + population pair.
//!
//! Each `(node, period)` key is computed at most once: the first requester
//! claims it, later requesters block on the condvar until the claim is
//! fulfilled or released. A released claim (error, cancellation) leaves the
//! key empty, so errors are never cached.

use super::cancel::CancelToken;
use super::column::Column;
use super::error::EvalError;
use crate::period::Period;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

type Key = (String, Period);

#[derive(Debug)]
enum Slot {
    /// Being computed by the walk with this id.
    InFlight { owner: u64 },
    Ready(Column),
}

#[derive(Debug, Default)]
struct State {
    slots: HashMap<Key, Slot>,
    /// Key each blocked walk is waiting for; used to detect cross-walk cycles.
    waiting: HashMap<u64, Key>,
}

impl State {
    /// Follows "waits for / is computed by" links from `holder`. Returns the
    /// chain of node names if it leads back to `me`.
    fn wait_cycle(&self, me: u64, holder: u64, wanted: &Key) -> Option<Vec<String>> {
        let mut names = vec![wanted.0.clone()];
        let mut current = holder;
        for _ in 0..=self.waiting.len() {
            if current == me {
                names.push(wanted.0.clone());
                return Some(names);
            }
            let key = self.waiting.get(&current)?;
            names.push(key.0.clone());
            current = match self.slots.get(key)? {
                Slot::InFlight { owner } => *owner,
                Slot::Ready(_) => return None,
            };
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LedgerStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

#[derive(Debug, Default)]
pub struct Ledger {
    state: Mutex<State>,
    changed: Condvar,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Result of asking the ledger for a key.
pub enum Claim<'a> {
    Ready(Column),
    /// The caller owns the computation and must fulfil or drop the guard.
    Compute(ClaimGuard<'a>),
}

impl Ledger {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, State> { self.state.lock().unwrap_or_else(PoisonError::into_inner) }

    pub fn get(&self, name: &str, period: &Period) -> Option<Column> {
        match self.lock().slots.get(&(name.to_string(), *period)) {
            Some(Slot::Ready(column)) => Some(column.clone()),
            _ => None,
        }
    }

    pub(crate) fn claim(
        &self,
        name: &str,
        period: Period,
        owner: u64,
        cancel: &CancelToken,
        timeout: Duration,
    ) -> Result<Claim<'_>, EvalError> {
        let key = (name.to_string(), period);
        let mut state = self.lock();
        loop {
            let holder = match state.slots.get(&key) {
                Some(Slot::Ready(column)) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Claim::Ready(column.clone()));
                }
                Some(Slot::InFlight { owner }) => *owner,
                None => {
                    state.slots.insert(key.clone(), Slot::InFlight { owner });
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return Ok(Claim::Compute(ClaimGuard { ledger: self, key, done: false }));
                }
            };

            if let Some(cycle) = state.wait_cycle(owner, holder, &key) {
                return Err(EvalError::CyclicDependency { cycle });
            }
            state.waiting.insert(owner, key.clone());
            state = self.changed.wait_timeout(state, timeout).unwrap_or_else(PoisonError::into_inner).0;
            state.waiting.remove(&owner);
            cancel.check()?;
        }
    }

    /// Drops every cached column; used when the population snapshot changes.
    pub fn clear(&self) {
        self.lock().slots.retain(|_, slot| matches!(slot, Slot::InFlight { .. }));
    }

    pub fn len(&self) -> usize { self.lock().slots.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn stats(&self) -> LedgerStats {
        LedgerStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

/// Exclusive right to compute one key. Dropping it without `fulfil` releases
/// the key and wakes the waiters, which then retry.
pub struct ClaimGuard<'a> {
    ledger: &'a Ledger,
    key: Key,
    done: bool,
}

impl ClaimGuard<'_> {
    pub fn fulfil(mut self, column: Column) {
        self.ledger.lock().slots.insert(self.key.clone(), Slot::Ready(column));
        self.done = true;
        self.ledger.changed.notify_all();
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.ledger.lock().slots.remove(&self.key);
            self.ledger.changed.notify_all();
        }
    }
}
