//! node.rs
//! The parameter tree itself: time series leaves, scales and named subtrees,
//! addressed by dotted paths such as `taxes.income_tax.rate`.

use super::error::ParameterError;
use super::scale::{BracketTable, Scale};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Values keyed by the date they take effect.
///
/// A `None` entry ends the validity of the preceding value; the parameter is
/// expired from that date until the next entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeSeries<T> {
    entries: BTreeMap<NaiveDate, Option<T>>,
}

/// Outcome of looking a time series up at an instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum At<'a, T> {
    Value(&'a T),
    /// The instant predates the first entry.
    Before,
    Expired,
}

impl<T> Default for TimeSeries<T> {
    fn default() -> Self { Self { entries: BTreeMap::new() } }
}

impl<T> TimeSeries<T> {
    pub fn new() -> Self { Self::default() }

    /// A series holding one value from `from` onward.
    pub fn starting(from: NaiveDate, value: T) -> Self { Self::new().with(from, value) }

    pub fn with(mut self, from: NaiveDate, value: T) -> Self {
        self.entries.insert(from, Some(value));
        self
    }

    pub fn expiring(mut self, from: NaiveDate) -> Self {
        self.entries.insert(from, None);
        self
    }

    pub fn at(&self, instant: NaiveDate) -> At<'_, T> {
        match self.entries.range(..=instant).next_back() {
            None => At::Before,
            Some((_, None)) => At::Expired,
            Some((_, Some(v))) => At::Value(v),
        }
    }

    /// Sets `value` from `from` onward, dropping every later entry.
    pub fn update_from(&mut self, from: NaiveDate, value: T) {
        self.entries.split_off(&from);
        self.entries.insert(from, Some(value));
    }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn len(&self) -> usize { self.entries.len() }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Number(f64),
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self { ParamValue::Number(v) }
}
impl From<bool> for ParamValue {
    fn from(v: bool) -> Self { ParamValue::Bool(v) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Leaf {
    pub values: TimeSeries<ParamValue>,
    /// Returned when the instant predates the first entry.
    #[serde(default)]
    pub default: Option<ParamValue>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl Leaf {
    pub fn new(values: TimeSeries<ParamValue>) -> Self {
        Self { values, default: None, unit: None, description: None }
    }

    pub fn with_default(mut self, default: impl Into<ParamValue>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.into());
        self
    }
}

/// A node of the parameter tree.
///
/// Deserializes from the nested map an external loader produces: objects with
/// a `values` key are leaves, objects with a `brackets` key are scales and
/// anything else is a subtree of named children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterNode {
    Leaf(Leaf),
    Scale(Scale),
    Subtree(BTreeMap<String, ParameterNode>),
}

/// What a path resolves to at an instant.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    Value(ParamValue),
    Scale(BracketTable),
}

impl Resolved {
    pub fn number(&self, path: &str) -> Result<f64, ParameterError> {
        match self {
            Resolved::Value(ParamValue::Number(v)) => Ok(*v),
            _ => Err(ParameterError::TypeMismatch { path: path.into(), expected: "number" }),
        }
    }

    pub fn flag(&self, path: &str) -> Result<bool, ParameterError> {
        match self {
            Resolved::Value(ParamValue::Bool(v)) => Ok(*v),
            _ => Err(ParameterError::TypeMismatch { path: path.into(), expected: "boolean" }),
        }
    }

    pub fn into_scale(self, path: &str) -> Result<BracketTable, ParameterError> {
        match self {
            Resolved::Scale(table) => Ok(table),
            _ => Err(ParameterError::TypeMismatch { path: path.into(), expected: "scale" }),
        }
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('.').filter(|s| !s.is_empty())
}

impl ParameterNode {
    pub fn empty() -> Self { ParameterNode::Subtree(BTreeMap::new()) }

    pub fn subtree<I, S>(children: I) -> Self
    where
        I: IntoIterator<Item = (S, ParameterNode)>,
        S: Into<String>,
    {
        ParameterNode::Subtree(children.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// A leaf holding a single value from `from` onward.
    pub fn constant(from: NaiveDate, value: impl Into<ParamValue>) -> Self {
        ParameterNode::Leaf(Leaf::new(TimeSeries::starting(from, value.into())))
    }

    /// Walks a dotted path. The empty path is the node itself.
    pub fn get(&self, path: &str) -> Result<&ParameterNode, ParameterError> {
        let mut node = self;
        for segment in segments(path) {
            node = match node {
                ParameterNode::Subtree(children) => children.get(segment),
                _ => None,
            }
            .ok_or_else(|| ParameterError::PathNotFound { path: path.into() })?;
        }
        Ok(node)
    }

    fn get_mut(&mut self, path: &str) -> Result<&mut ParameterNode, ParameterError> {
        let mut node = self;
        for segment in segments(path) {
            node = match node {
                ParameterNode::Subtree(children) => children.get_mut(segment),
                _ => None,
            }
            .ok_or_else(|| ParameterError::PathNotFound { path: path.into() })?;
        }
        Ok(node)
    }

    pub fn resolve(&self, path: &str, instant: NaiveDate) -> Result<Resolved, ParameterError> {
        match self.get(path)? {
            ParameterNode::Leaf(leaf) => match leaf.values.at(instant) {
                At::Value(v) => Ok(Resolved::Value(*v)),
                At::Expired => Err(ParameterError::Expired { path: path.into(), instant }),
                At::Before => leaf
                    .default
                    .map(Resolved::Value)
                    .ok_or_else(|| ParameterError::NoValueBeforeInstant { path: path.into(), instant }),
            },
            ParameterNode::Scale(scale) => scale.at(path, instant).map(Resolved::Scale),
            ParameterNode::Subtree(_) => Err(ParameterError::NotAValue { path: path.into() }),
        }
    }

    /// Grafts `subtree` as the new child `name` of the subtree at `path`.
    ///
    /// Additive only: an existing child of that name is an error and the tree
    /// is left untouched.
    pub fn merge_subtree(&mut self, path: &str, name: &str, subtree: ParameterNode) -> Result<(), ParameterError> {
        match self.get_mut(path)? {
            ParameterNode::Subtree(children) => {
                if children.contains_key(name) {
                    return Err(ParameterError::DuplicateChildName { path: path.into(), name: name.into() });
                }
                children.insert(name.to_string(), subtree);
                Ok(())
            }
            _ => Err(ParameterError::NotASubtree { path: path.into() }),
        }
    }

    /// Sets the leaf at `path` to `value` from `from` onward; later entries are dropped.
    pub fn update_value(&mut self, path: &str, from: NaiveDate, value: ParamValue) -> Result<(), ParameterError> {
        match self.get_mut(path)? {
            ParameterNode::Leaf(leaf) => {
                leaf.values.update_from(from, value);
                Ok(())
            }
            _ => Err(ParameterError::NotALeaf { path: path.into() }),
        }
    }

    /// Dotted paths of every leaf and scale, in lexical order.
    pub fn paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_paths(String::new(), &mut out);
        out
    }

    fn collect_paths(&self, prefix: String, out: &mut Vec<String>) {
        match self {
            ParameterNode::Subtree(children) => {
                for (name, child) in children {
                    let path = if prefix.is_empty() { name.clone() } else { format!("{}.{}", prefix, name) };
                    child.collect_paths(path, out);
                }
            }
            _ => out.push(prefix),
        }
    }
}
