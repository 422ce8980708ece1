//! column.rs
//! Typed value vectors, one entry per entity instance.
//!
//! Columns share their buffers through `Arc`, so handing a cached result to
//! several consumers never copies data. All operators are elementwise and
//! fail with `TypeMismatch` instead of coercing across value types; the only
//! implicit conversion is Int -> Float promotion in mixed arithmetic.

use super::error::EvalError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The declared value type of a rule node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Bool,
    Int,
    Float,
}

impl ValueType {
    pub fn zero(&self) -> Scalar {
        match self {
            ValueType::Bool => Scalar::Bool(false),
            ValueType::Int => Scalar::Int(0),
            ValueType::Float => Scalar::Float(0.0),
        }
    }

    fn is_numeric(&self) -> bool { !matches!(self, ValueType::Bool) }
}

/// A single typed value, used for defaults and fills.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl Scalar {
    pub fn value_type(&self) -> ValueType {
        match self {
            Scalar::Bool(_) => ValueType::Bool,
            Scalar::Int(_) => ValueType::Int,
            Scalar::Float(_) => ValueType::Float,
        }
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self { Scalar::Bool(v) }
}
impl From<i64> for Scalar {
    fn from(v: i64) -> Self { Scalar::Int(v) }
}
impl From<f64> for Scalar {
    fn from(v: f64) -> Self { Scalar::Float(v) }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Bool(Arc<[bool]>),
    Int(Arc<[i64]>),
    Float(Arc<[f64]>),
}

impl From<Vec<bool>> for Column {
    fn from(v: Vec<bool>) -> Self { Column::Bool(v.into()) }
}
impl From<Vec<i64>> for Column {
    fn from(v: Vec<i64>) -> Self { Column::Int(v.into()) }
}
impl From<Vec<f64>> for Column {
    fn from(v: Vec<f64>) -> Self { Column::Float(v.into()) }
}

type IntOp = fn(i64, i64) -> i64;
type FloatOp = fn(f64, f64) -> f64;

fn type_error(op: &str, left: ValueType, right: ValueType) -> EvalError {
    EvalError::TypeMismatch { context: op.to_string(), left, right }
}

impl Column {
    pub fn filled(value: Scalar, len: usize) -> Self {
        match value {
            Scalar::Bool(b) => Column::Bool(vec![b; len].into()),
            Scalar::Int(i) => Column::Int(vec![i; len].into()),
            Scalar::Float(f) => Column::Float(vec![f; len].into()),
        }
    }

    pub fn zeros(value_type: ValueType, len: usize) -> Self { Self::filled(value_type.zero(), len) }

    pub fn len(&self) -> usize {
        match self {
            Column::Bool(v) => v.len(),
            Column::Int(v) => v.len(),
            Column::Float(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn value_type(&self) -> ValueType {
        match self {
            Column::Bool(_) => ValueType::Bool,
            Column::Int(_) => ValueType::Int,
            Column::Float(_) => ValueType::Float,
        }
    }

    pub fn as_bools(&self) -> Option<&[bool]> {
        match self {
            Column::Bool(v) => Some(&v[..]),
            _ => None,
        }
    }

    pub fn as_ints(&self) -> Option<&[i64]> {
        match self {
            Column::Int(v) => Some(&v[..]),
            _ => None,
        }
    }

    pub fn as_floats(&self) -> Option<&[f64]> {
        match self {
            Column::Float(v) => Some(&v[..]),
            _ => None,
        }
    }

    pub fn get(&self, i: usize) -> Option<Scalar> {
        match self {
            Column::Bool(v) => v.get(i).copied().map(Scalar::Bool),
            Column::Int(v) => v.get(i).copied().map(Scalar::Int),
            Column::Float(v) => v.get(i).copied().map(Scalar::Float),
        }
    }

    /// Numeric values as floats. Booleans are rejected; use `to_float` to convert them explicitly.
    pub fn to_f64_vec(&self) -> Result<Vec<f64>, EvalError> {
        match self {
            Column::Int(v) => Ok(v.iter().map(|&x| x as f64).collect()),
            Column::Float(v) => Ok(v.to_vec()),
            Column::Bool(_) => Err(type_error("numeric conversion", ValueType::Bool, ValueType::Float)),
        }
    }

    /// Explicit conversion to Float; `true` becomes 1.0.
    pub fn to_float(&self) -> Column {
        match self {
            Column::Bool(v) => Column::Float(v.iter().map(|&b| if b { 1.0 } else { 0.0 }).collect()),
            Column::Int(v) => Column::Float(v.iter().map(|&x| x as f64).collect()),
            Column::Float(_) => self.clone(),
        }
    }

    pub fn sum(&self) -> Result<f64, EvalError> {
        Ok(self.to_f64_vec()?.iter().sum())
    }

    /// Picks entries by index; used to broadcast group values onto members.
    pub(crate) fn gather(&self, indices: &[usize]) -> Column {
        match self {
            Column::Bool(v) => Column::Bool(indices.iter().map(|&i| v[i]).collect()),
            Column::Int(v) => Column::Int(indices.iter().map(|&i| v[i]).collect()),
            Column::Float(v) => Column::Float(indices.iter().map(|&i| v[i]).collect()),
        }
    }

    pub fn round(&self, places: u32) -> Column {
        match self {
            Column::Float(v) => {
                let factor = 10f64.powi(places as i32);
                Column::Float(v.iter().map(|x| (x * factor).round() / factor).collect())
            }
            _ => self.clone(),
        }
    }

    fn check_len(&self, other: &Column, op: &str) -> Result<(), EvalError> {
        if self.len() != other.len() {
            return Err(EvalError::LengthMismatch { context: op.to_string(), expected: self.len(), actual: other.len() });
        }
        Ok(())
    }

    // --- Arithmetic ---

    fn numeric_binary(
        &self,
        other: &Column,
        op: &'static str,
        int_op: Option<IntOp>,
        float_op: FloatOp,
    ) -> Result<Column, EvalError> {
        self.check_len(other, op)?;
        match (self, other, int_op) {
            (Column::Int(l), Column::Int(r), Some(f)) => {
                Ok(Column::Int(l.iter().zip(r.iter()).map(|(&a, &b)| f(a, b)).collect()))
            }
            _ if self.value_type().is_numeric() && other.value_type().is_numeric() => {
                let l = self.to_f64_vec()?;
                let r = other.to_f64_vec()?;
                Ok(Column::Float(l.iter().zip(&r).map(|(&a, &b)| float_op(a, b)).collect()))
            }
            _ => Err(type_error(op, self.value_type(), other.value_type())),
        }
    }

    pub fn add(&self, other: &Column) -> Result<Column, EvalError> {
        self.numeric_binary(other, "add", Some(i64::saturating_add as IntOp), |a, b| a + b)
    }

    pub fn sub(&self, other: &Column) -> Result<Column, EvalError> {
        self.numeric_binary(other, "sub", Some(i64::saturating_sub as IntOp), |a, b| a - b)
    }

    pub fn mul(&self, other: &Column) -> Result<Column, EvalError> {
        self.numeric_binary(other, "mul", Some(i64::saturating_mul as IntOp), |a, b| a * b)
    }

    /// True division; integer operands produce a Float column.
    pub fn div(&self, other: &Column) -> Result<Column, EvalError> {
        self.numeric_binary(other, "div", None, |a, b| a / b)
    }

    pub fn max(&self, other: &Column) -> Result<Column, EvalError> {
        self.numeric_binary(other, "max", Some(<i64 as Ord>::max as IntOp), f64::max)
    }

    pub fn min(&self, other: &Column) -> Result<Column, EvalError> {
        self.numeric_binary(other, "min", Some(<i64 as Ord>::min as IntOp), f64::min)
    }

    fn scalar_op(&self, op: &str, f: impl Fn(f64) -> f64) -> Result<Column, EvalError> {
        match self {
            Column::Bool(_) => Err(type_error(op, ValueType::Bool, ValueType::Float)),
            _ => Ok(Column::Float(self.to_f64_vec()?.into_iter().map(f).collect())),
        }
    }

    pub fn add_scalar(&self, k: f64) -> Result<Column, EvalError> { self.scalar_op("add", |x| x + k) }
    pub fn mul_scalar(&self, k: f64) -> Result<Column, EvalError> { self.scalar_op("mul", |x| x * k) }
    pub fn max_scalar(&self, k: f64) -> Result<Column, EvalError> { self.scalar_op("max", |x| x.max(k)) }
    pub fn min_scalar(&self, k: f64) -> Result<Column, EvalError> { self.scalar_op("min", |x| x.min(k)) }

    // --- Comparison ---

    fn compare(&self, other: &Column, op: &'static str, f: fn(f64, f64) -> bool) -> Result<Column, EvalError> {
        self.check_len(other, op)?;
        if !(self.value_type().is_numeric() && other.value_type().is_numeric()) {
            return Err(type_error(op, self.value_type(), other.value_type()));
        }
        let l = self.to_f64_vec()?;
        let r = other.to_f64_vec()?;
        Ok(Column::Bool(l.iter().zip(&r).map(|(&a, &b)| f(a, b)).collect()))
    }

    pub fn gt(&self, other: &Column) -> Result<Column, EvalError> { self.compare(other, "gt", |a, b| a > b) }
    pub fn ge(&self, other: &Column) -> Result<Column, EvalError> { self.compare(other, "ge", |a, b| a >= b) }
    pub fn lt(&self, other: &Column) -> Result<Column, EvalError> { self.compare(other, "lt", |a, b| a < b) }
    pub fn le(&self, other: &Column) -> Result<Column, EvalError> { self.compare(other, "le", |a, b| a <= b) }

    /// Elementwise equality. Booleans compare with booleans, numbers with numbers.
    pub fn eq_(&self, other: &Column) -> Result<Column, EvalError> {
        if let (Column::Bool(l), Column::Bool(r)) = (self, other) {
            self.check_len(other, "eq")?;
            return Ok(Column::Bool(l.iter().zip(r.iter()).map(|(a, b)| a == b).collect()));
        }
        self.compare(other, "eq", |a, b| a == b)
    }

    fn compare_scalar(&self, op: &str, f: impl Fn(f64) -> bool) -> Result<Column, EvalError> {
        match self {
            Column::Bool(_) => Err(type_error(op, ValueType::Bool, ValueType::Float)),
            _ => Ok(Column::Bool(self.to_f64_vec()?.into_iter().map(f).collect())),
        }
    }

    pub fn gt_scalar(&self, k: f64) -> Result<Column, EvalError> { self.compare_scalar("gt", |x| x > k) }
    pub fn ge_scalar(&self, k: f64) -> Result<Column, EvalError> { self.compare_scalar("ge", |x| x >= k) }
    pub fn lt_scalar(&self, k: f64) -> Result<Column, EvalError> { self.compare_scalar("lt", |x| x < k) }
    pub fn le_scalar(&self, k: f64) -> Result<Column, EvalError> { self.compare_scalar("le", |x| x <= k) }

    // --- Boolean algebra ---

    fn logical(&self, other: &Column, op: &'static str, f: fn(bool, bool) -> bool) -> Result<Column, EvalError> {
        self.check_len(other, op)?;
        match (self, other) {
            (Column::Bool(l), Column::Bool(r)) => {
                Ok(Column::Bool(l.iter().zip(r.iter()).map(|(&a, &b)| f(a, b)).collect()))
            }
            _ => Err(type_error(op, self.value_type(), other.value_type())),
        }
    }

    pub fn and(&self, other: &Column) -> Result<Column, EvalError> { self.logical(other, "and", |a, b| a && b) }
    pub fn or(&self, other: &Column) -> Result<Column, EvalError> { self.logical(other, "or", |a, b| a || b) }

    pub fn not(&self) -> Result<Column, EvalError> {
        match self {
            Column::Bool(v) => Ok(Column::Bool(v.iter().map(|b| !b).collect())),
            _ => Err(type_error("not", self.value_type(), ValueType::Bool)),
        }
    }

    /// `self` is the mask: picks `then` where true, `otherwise` where false.
    pub fn select(&self, then: &Column, otherwise: &Column) -> Result<Column, EvalError> {
        let mask = self.as_bools().ok_or_else(|| type_error("select", self.value_type(), ValueType::Bool))?;
        self.check_len(then, "select")?;
        self.check_len(otherwise, "select")?;

        match (then, otherwise) {
            (Column::Bool(t), Column::Bool(o)) => {
                Ok(Column::Bool(mask.iter().enumerate().map(|(i, &m)| if m { t[i] } else { o[i] }).collect()))
            }
            (Column::Int(t), Column::Int(o)) => {
                Ok(Column::Int(mask.iter().enumerate().map(|(i, &m)| if m { t[i] } else { o[i] }).collect()))
            }
            _ if then.value_type().is_numeric() && otherwise.value_type().is_numeric() => {
                let t = then.to_f64_vec()?;
                let o = otherwise.to_f64_vec()?;
                Ok(Column::Float(mask.iter().enumerate().map(|(i, &m)| if m { t[i] } else { o[i] }).collect()))
            }
            _ => Err(type_error("select", then.value_type(), otherwise.value_type())),
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const SHOWN: usize = 4;
        let items: Vec<String> = match self {
            Column::Bool(v) => v.iter().take(SHOWN).map(|b| b.to_string()).collect(),
            Column::Int(v) => v.iter().take(SHOWN).map(|i| i.to_string()).collect(),
            Column::Float(v) => v.iter().take(SHOWN).map(|x| format!("{:.3}", x)).collect(),
        };
        let tail = if self.len() > SHOWN { ", ..." } else { "" };
        write!(f, "[{}{}]", items.join(", "), tail)
    }
}
