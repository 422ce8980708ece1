//! period.rs
//! Temporal scopes: eternity, single instants and spans of days, months or years.
//!
//! Every rule node declares the granularity its formulas accept (`DefinitionPeriod`).
//! Queries are normalized against that declaration before anything is cached, so a
//! yearly node asked for a month is rejected rather than silently widened.

use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeriodError {
    #[error("Operation '{op}' is undefined on ETERNITY")]
    EternityArithmetic { op: &'static str },
    #[error("Invalid period string '{0}'")]
    Parse(String),
    #[error("Date out of range while computing {0}")]
    OutOfRange(String),
    #[error("Cannot split {period} into {unit:?} sub-periods")]
    InvalidSubdivision { period: String, unit: PeriodUnit },
}

/// The unit a span is measured in. Declaration order is granularity order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodUnit {
    Day,
    Month,
    Year,
}

impl PeriodUnit {
    fn as_str(&self) -> &'static str {
        match self {
            PeriodUnit::Day => "day",
            PeriodUnit::Month => "month",
            PeriodUnit::Year => "year",
        }
    }
}

/// A temporal scope a value is defined over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Period {
    Eternity,
    Instant(NaiveDate),
    Span { unit: PeriodUnit, start: NaiveDate, size: u32 },
}

impl Period {
    pub fn eternity() -> Self { Period::Eternity }

    pub fn instant(date: NaiveDate) -> Self { Period::Instant(date) }

    pub fn year(year: i32) -> Result<Self, PeriodError> {
        let start = ymd(year, 1, 1)?;
        Ok(Period::Span { unit: PeriodUnit::Year, start, size: 1 })
    }

    pub fn month(year: i32, month: u32) -> Result<Self, PeriodError> {
        let start = ymd(year, month, 1)?;
        Ok(Period::Span { unit: PeriodUnit::Month, start, size: 1 })
    }

    pub fn day(date: NaiveDate) -> Self {
        Period::Span { unit: PeriodUnit::Day, start: date, size: 1 }
    }

    pub fn span(unit: PeriodUnit, start: NaiveDate, size: u32) -> Self {
        Period::Span { unit, start, size }
    }

    pub fn is_eternity(&self) -> bool { matches!(self, Period::Eternity) }

    pub fn unit(&self) -> Option<PeriodUnit> {
        match self {
            Period::Span { unit, .. } => Some(*unit),
            _ => None,
        }
    }

    pub fn size(&self) -> Option<u32> {
        match self {
            Period::Span { size, .. } => Some(*size),
            _ => None,
        }
    }

    /// The first instant covered by the scope.
    pub fn instant_of(&self) -> Result<NaiveDate, PeriodError> {
        match self {
            Period::Eternity => Err(PeriodError::EternityArithmetic { op: "instant_of" }),
            Period::Instant(date) => Ok(*date),
            Period::Span { start, .. } => Ok(*start),
        }
    }

    /// The last day covered by the scope (inclusive).
    pub fn stop(&self) -> Result<NaiveDate, PeriodError> {
        match self {
            Period::Eternity => Err(PeriodError::EternityArithmetic { op: "stop" }),
            Period::Instant(date) => Ok(*date),
            Period::Span { unit, start, size } => {
                let end = shift(*start, *size as i64, *unit)?;
                end.pred_opt().ok_or_else(|| PeriodError::OutOfRange(format!("stop of {}", self)))
            }
        }
    }

    /// Does `self` fully cover `other`?
    pub fn contains(&self, other: &Period) -> bool {
        match (self, other) {
            (Period::Eternity, _) => true,
            (_, Period::Eternity) => false,
            _ => match (self.instant_of(), self.stop(), other.instant_of(), other.stop()) {
                (Ok(a_start), Ok(a_stop), Ok(b_start), Ok(b_stop)) => a_start <= b_start && b_stop <= a_stop,
                _ => false,
            },
        }
    }

    /// Shifts the scope by `n` units of `unit`, keeping its own unit and size.
    pub fn offset(&self, n: i32, unit: PeriodUnit) -> Result<Period, PeriodError> {
        match self {
            Period::Eternity => Err(PeriodError::EternityArithmetic { op: "offset" }),
            Period::Instant(date) => Ok(Period::Instant(shift(*date, n as i64, unit)?)),
            Period::Span { unit: own, start, size } => Ok(Period::Span {
                unit: *own,
                start: shift(*start, n as i64, unit)?,
                size: *size,
            }),
        }
    }

    /// Consecutive single-unit periods covering the span, in order.
    pub fn subperiods(&self, unit: PeriodUnit) -> Result<Vec<Period>, PeriodError> {
        let own = match self {
            Period::Eternity => return Err(PeriodError::EternityArithmetic { op: "subperiods" }),
            Period::Instant(_) => None,
            Period::Span { unit, .. } => Some(*unit),
        };
        if own.map_or(true, |own| unit > own) {
            return Err(PeriodError::InvalidSubdivision { period: self.to_string(), unit });
        }

        let stop = self.stop()?;
        let mut cursor = self.instant_of()?;
        let mut out = Vec::new();
        while cursor <= stop {
            out.push(Period::Span { unit, start: cursor, size: 1 });
            cursor = shift(cursor, 1, unit)?;
        }
        Ok(out)
    }
}

fn ymd(year: i32, month: u32, day: u32) -> Result<NaiveDate, PeriodError> {
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| PeriodError::Parse(format!("{:04}-{:02}-{:02}", year, month, day)))
}

fn shift(date: NaiveDate, n: i64, unit: PeriodUnit) -> Result<NaiveDate, PeriodError> {
    let shifted = match unit {
        PeriodUnit::Day if n >= 0 => date.checked_add_days(Days::new(n as u64)),
        PeriodUnit::Day => date.checked_sub_days(Days::new(n.unsigned_abs())),
        PeriodUnit::Month | PeriodUnit::Year => {
            let months = if unit == PeriodUnit::Year { n * 12 } else { n };
            let magnitude = u32::try_from(months.unsigned_abs())
                .map_err(|_| PeriodError::OutOfRange(format!("{} {:?} offset", n, unit)))?;
            if months >= 0 {
                date.checked_add_months(Months::new(magnitude))
            } else {
                date.checked_sub_months(Months::new(magnitude))
            }
        }
    };
    shifted.ok_or_else(|| PeriodError::OutOfRange(format!("{} shifted by {} {:?}", date, n, unit)))
}

/// Shortest textual form of a start date that is still at least as fine as
/// `unit`: `2024`, `2024-03` or `2024-03-15`.
fn short_date(date: &NaiveDate, unit: PeriodUnit) -> String {
    if unit == PeriodUnit::Year && date.month() == 1 && date.day() == 1 {
        format!("{:04}", date.year())
    } else if unit >= PeriodUnit::Month && date.day() == 1 {
        format!("{:04}-{:02}", date.year(), date.month())
    } else {
        date.format("%Y-%m-%d").to_string()
    }
}

fn parse_short_date(s: &str) -> Result<(NaiveDate, PeriodUnit), PeriodError> {
    let err = || PeriodError::Parse(s.to_string());
    let parts: Vec<&str> = s.split('-').collect();
    let year: i32 = parts.first().ok_or_else(err)?.parse().map_err(|_| err())?;
    match parts.len() {
        1 => Ok((ymd(year, 1, 1)?, PeriodUnit::Year)),
        2 => {
            let month: u32 = parts[1].parse().map_err(|_| err())?;
            Ok((ymd(year, month, 1)?, PeriodUnit::Month))
        }
        3 => {
            let month: u32 = parts[1].parse().map_err(|_| err())?;
            let day: u32 = parts[2].parse().map_err(|_| err())?;
            Ok((ymd(year, month, day)?, PeriodUnit::Day))
        }
        _ => Err(err()),
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Eternity => write!(f, "ETERNITY"),
            Period::Instant(date) => write!(f, "instant:{}", date.format("%Y-%m-%d")),
            Period::Span { unit, start, size } => {
                let natural = match unit {
                    PeriodUnit::Year => start.month() == 1 && start.day() == 1,
                    PeriodUnit::Month => start.day() == 1,
                    PeriodUnit::Day => true,
                };
                if *size == 1 && natural {
                    match unit {
                        PeriodUnit::Year => write!(f, "{:04}", start.year()),
                        PeriodUnit::Month => write!(f, "{:04}-{:02}", start.year(), start.month()),
                        PeriodUnit::Day => write!(f, "{}", start.format("%Y-%m-%d")),
                    }
                } else {
                    write!(f, "{}:{}:{}", unit.as_str(), short_date(start, *unit), size)
                }
            }
        }
    }
}

impl FromStr for Period {
    type Err = PeriodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("eternity") {
            return Ok(Period::Eternity);
        }
        if let Some(rest) = s.strip_prefix("instant:") {
            let (date, unit) = parse_short_date(rest)?;
            if unit != PeriodUnit::Day {
                return Err(PeriodError::Parse(s.to_string()));
            }
            return Ok(Period::Instant(date));
        }

        let mut parts = s.split(':');
        let head = parts.next().unwrap_or_default();
        match (parts.next(), parts.next(), parts.next()) {
            (None, _, _) => {
                let (start, unit) = parse_short_date(head)?;
                Ok(Period::Span { unit, start, size: 1 })
            }
            (Some(start), size, None) => {
                let unit = match head {
                    "year" => PeriodUnit::Year,
                    "month" => PeriodUnit::Month,
                    "day" => PeriodUnit::Day,
                    _ => return Err(PeriodError::Parse(s.to_string())),
                };
                let (start, written) = parse_short_date(start)?;
                if written > unit {
                    // e.g. "month:2024:2" has no month to start from
                    return Err(PeriodError::Parse(s.to_string()));
                }
                let size = match size {
                    Some(raw) => raw.parse().map_err(|_| PeriodError::Parse(s.to_string()))?,
                    None => 1,
                };
                if size == 0 {
                    return Err(PeriodError::Parse(s.to_string()));
                }
                Ok(Period::Span { unit, start, size })
            }
            _ => Err(PeriodError::Parse(s.to_string())),
        }
    }
}

impl TryFrom<String> for Period {
    type Error = PeriodError;
    fn try_from(value: String) -> Result<Self, Self::Error> { value.parse() }
}

impl From<Period> for String {
    fn from(value: Period) -> Self { value.to_string() }
}

/// The granularity a rule node's formulas are written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefinitionPeriod {
    Eternity,
    Year,
    Month,
    Day,
}

impl DefinitionPeriod {
    /// Maps a requested scope to the scope values are stored under, or `None`
    /// when the node cannot be evaluated at that granularity.
    ///
    /// An eternal node covers every scope, so any request resolves to `ETERNITY`.
    pub fn normalize(&self, requested: &Period) -> Option<Period> {
        let wanted = match self {
            DefinitionPeriod::Eternity => return Some(Period::Eternity),
            DefinitionPeriod::Year => PeriodUnit::Year,
            DefinitionPeriod::Month => PeriodUnit::Month,
            DefinitionPeriod::Day => PeriodUnit::Day,
        };
        match requested {
            Period::Span { unit, size: 1, .. } if *unit == wanted => Some(*requested),
            _ => None,
        }
    }

    pub fn unit(&self) -> Option<PeriodUnit> {
        match self {
            DefinitionPeriod::Eternity => None,
            DefinitionPeriod::Year => Some(PeriodUnit::Year),
            DefinitionPeriod::Month => Some(PeriodUnit::Month),
            DefinitionPeriod::Day => Some(PeriodUnit::Day),
        }
    }
}
