//! scale.rs
//! Marginal-rate scales: dated brackets in the tree, and the bracket table
//! they resolve to at one instant.

use super::error::ParameterError;
use super::node::{At, TimeSeries};
use crate::compute::{Column, EvalError};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Bracket {
    pub threshold: TimeSeries<f64>,
    pub rate: TimeSeries<f64>,
}

impl Bracket {
    pub fn constant(from: NaiveDate, threshold: f64, rate: f64) -> Self {
        Self { threshold: TimeSeries::starting(from, threshold), rate: TimeSeries::starting(from, rate) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scale {
    pub brackets: Vec<Bracket>,
    #[serde(default)]
    pub description: Option<String>,
}

impl Scale {
    pub fn new(brackets: Vec<Bracket>) -> Self { Self { brackets, description: None } }

    /// The table in force at `instant`. Brackets whose threshold or rate has no
    /// value at that instant are skipped.
    pub fn at(&self, path: &str, instant: NaiveDate) -> Result<BracketTable, ParameterError> {
        let active: Vec<(f64, f64)> = self
            .brackets
            .iter()
            .filter_map(|b| match (b.threshold.at(instant), b.rate.at(instant)) {
                (At::Value(t), At::Value(r)) => Some((*t, *r)),
                _ => None,
            })
            .collect();
        if active.is_empty() {
            return Err(ParameterError::NoValueBeforeInstant { path: path.into(), instant });
        }
        Ok(BracketTable::new(active))
    }
}

/// `(threshold, rate)` pairs in ascending threshold order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BracketTable {
    brackets: Vec<(f64, f64)>,
}

impl BracketTable {
    pub fn new(mut brackets: Vec<(f64, f64)>) -> Self {
        brackets.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self { brackets }
    }

    pub fn brackets(&self) -> &[(f64, f64)] { &self.brackets }

    /// Progressive tax on `amount`: each bracket's rate applies to the part of
    /// the amount between its threshold and the next one. Amounts below the
    /// first threshold owe nothing.
    pub fn calc(&self, amount: f64) -> f64 {
        let mut total = 0.0;
        for (i, &(threshold, rate)) in self.brackets.iter().enumerate() {
            if amount <= threshold {
                break;
            }
            let upper = self.brackets.get(i + 1).map_or(f64::INFINITY, |b| b.0);
            total += rate * (amount.min(upper) - threshold);
        }
        total
    }

    pub fn calc_column(&self, amounts: &Column) -> Result<Column, EvalError> {
        let values = amounts.to_f64_vec()?;
        Ok(Column::from(values.into_iter().map(|a| self.calc(a)).collect::<Vec<f64>>()))
    }

    /// Rate of the bracket `amount` falls in; zero below the first threshold.
    pub fn marginal_rate(&self, amount: f64) -> f64 {
        self.brackets
            .iter()
            .take_while(|(threshold, _)| *threshold <= amount)
            .last()
            .map_or(0.0, |&(_, rate)| rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate { NaiveDate::from_ymd_opt(y, m, d).unwrap() }

    fn table() -> BracketTable {
        // Deliberately unsorted input.
        BracketTable::new(vec![(1_000.0, 0.4), (0.0, 0.0), (200.0, 0.2)])
    }

    #[rstest]
    #[case(-50.0, 0.0)]
    #[case(0.0, 0.0)]
    #[case(200.0, 0.0)]
    #[case(700.0, 100.0)]
    #[case(1_000.0, 160.0)]
    #[case(1_500.0, 360.0)]
    fn test_progressive_calc(#[case] amount: f64, #[case] expected: f64) {
        assert!((table().calc(amount) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_calc_is_monotonic() {
        let t = table();
        let mut last = f64::NEG_INFINITY;
        for step in 0..400 {
            let v = t.calc(step as f64 * 5.0);
            assert!(v >= last);
            last = v;
        }
    }

    #[rstest]
    #[case(100.0, 0.0)]
    #[case(200.0, 0.2)]
    #[case(5_000.0, 0.4)]
    fn test_marginal_rate(#[case] amount: f64, #[case] expected: f64) {
        assert_eq!(table().marginal_rate(amount), expected);
    }

    #[test]
    fn test_calc_column_rejects_booleans() {
        let t = table();
        let taxed = t.calc_column(&Column::from(vec![0i64, 700, 1500])).unwrap();
        assert_eq!(taxed.as_floats().unwrap().len(), 3);
        assert!(t.calc_column(&Column::from(vec![true])).is_err());
    }

    #[test]
    fn test_scale_skips_inactive_brackets() {
        let scale = Scale::new(vec![
            Bracket::constant(date(2020, 1, 1), 0.0, 0.1),
            Bracket::constant(date(2022, 1, 1), 100.0, 0.5),
        ]);
        let early = scale.at("s", date(2021, 1, 1)).unwrap();
        assert_eq!(early.brackets(), &[(0.0, 0.1)]);
        let late = scale.at("s", date(2023, 1, 1)).unwrap();
        assert_eq!(late.calc(200.0), 60.0);
        assert!(matches!(scale.at("s", date(2019, 1, 1)), Err(ParameterError::NoValueBeforeInstant { .. })));
    }
}
