//! aggregate.rs
//! Person -> group reductions and group -> person projections over a `Membership`.

use super::Membership;
use crate::compute::{Column, EvalError, ValueType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateOp {
    Sum,
    Max,
    Min,
    Any,
    All,
    /// Number of (role-matching) members; accepts any value type.
    Count,
}

/// Reduces a person column to one value per group.
///
/// Groups with no contributing member get the operator's identity: 0 for sum
/// and count, false for any, true for all, -inf / +inf for max / min
/// (`i64::MIN` / `i64::MAX` on integer columns). With `role` set, members
/// holding any other role do not contribute.
pub fn aggregate(
    membership: &Membership,
    values: &Column,
    op: AggregateOp,
    role: Option<&str>,
) -> Result<Column, EvalError> {
    if values.len() != membership.person_count() {
        return Err(EvalError::LengthMismatch {
            context: format!("{:?} aggregation", op),
            expected: membership.person_count(),
            actual: values.len(),
        });
    }

    let groups = membership.group_count();
    let contributes = |p: usize| role.map_or(true, |r| membership.role_of(p) == Some(r));
    let mismatch = |expected: ValueType| EvalError::TypeMismatch {
        context: format!("{:?} aggregation", op),
        left: values.value_type(),
        right: expected,
    };

    match (op, values) {
        (AggregateOp::Count, _) => {
            let mut out = vec![0i64; groups];
            for (p, &g) in membership.group_of().iter().enumerate() {
                if contributes(p) {
                    out[g] += 1;
                }
            }
            Ok(Column::from(out))
        }
        (AggregateOp::Any | AggregateOp::All, Column::Bool(v)) => {
            let is_any = op == AggregateOp::Any;
            let mut out = vec![!is_any; groups];
            for (p, &g) in membership.group_of().iter().enumerate() {
                if contributes(p) {
                    out[g] = if is_any { out[g] || v[p] } else { out[g] && v[p] };
                }
            }
            Ok(Column::from(out))
        }
        (AggregateOp::Any | AggregateOp::All, _) => Err(mismatch(ValueType::Bool)),
        (_, Column::Bool(_)) => Err(mismatch(ValueType::Float)),
        (_, Column::Int(v)) => {
            let identity = match op {
                AggregateOp::Sum => 0,
                AggregateOp::Max => i64::MIN,
                _ => i64::MAX,
            };
            let mut out = vec![identity; groups];
            for (p, &g) in membership.group_of().iter().enumerate() {
                if contributes(p) {
                    out[g] = match op {
                        AggregateOp::Sum => out[g].saturating_add(v[p]),
                        AggregateOp::Max => out[g].max(v[p]),
                        _ => out[g].min(v[p]),
                    };
                }
            }
            Ok(Column::from(out))
        }
        (_, Column::Float(v)) => {
            let identity = match op {
                AggregateOp::Sum => 0.0,
                AggregateOp::Max => f64::NEG_INFINITY,
                _ => f64::INFINITY,
            };
            let mut out = vec![identity; groups];
            for (p, &g) in membership.group_of().iter().enumerate() {
                if contributes(p) {
                    out[g] = match op {
                        AggregateOp::Sum => out[g] + v[p],
                        AggregateOp::Max => out[g].max(v[p]),
                        _ => out[g].min(v[p]),
                    };
                }
            }
            Ok(Column::from(out))
        }
    }
}

/// Broadcasts one value per group onto every member of that group.
pub fn project(membership: &Membership, group_values: &Column) -> Result<Column, EvalError> {
    if group_values.len() != membership.group_count() {
        return Err(EvalError::LengthMismatch {
            context: "group projection".into(),
            expected: membership.group_count(),
            actual: group_values.len(),
        });
    }
    Ok(group_values.gather(membership.group_of()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{EntityKind, EntityModel, Population, Role};
    use rstest::rstest;

    /// Persons p0..p3; family f0 = {p0, p1, p2}, f1 = {p3}, f2 = {}.
    fn membership() -> Membership {
        let model = EntityModel::new(
            EntityKind::new("person", "people"),
            vec![EntityKind::new("family", "families")
                .with_role(Role::new("adult", "adults"))
                .with_role(Role::new("child", "children"))],
        )
        .unwrap();
        let pop = Population::builder(&model)
            .persons(["p0", "p1", "p2", "p3"])
            .group("family", "f0", &[("p0", "adult"), ("p1", "adult"), ("p2", "child")])
            .group("family", "f1", &[("p3", "adult")])
            .group("family", "f2", &[])
            .build()
            .unwrap();
        pop.membership("family").unwrap().clone()
    }

    #[test]
    fn test_sum_three_members() {
        let m = membership();
        let incomes = Column::from(vec![100.0, 50.0, 0.0, 7.0]);
        let total = aggregate(&m, &incomes, AggregateOp::Sum, None).unwrap();
        assert_eq!(total, Column::from(vec![150.0, 7.0, 0.0]));
    }

    #[rstest]
    #[case(AggregateOp::Max, vec![100.0, 7.0, f64::NEG_INFINITY])]
    #[case(AggregateOp::Min, vec![0.0, 7.0, f64::INFINITY])]
    fn test_extrema_with_identity(#[case] op: AggregateOp, #[case] expected: Vec<f64>) {
        let m = membership();
        let incomes = Column::from(vec![100.0, 50.0, 0.0, 7.0]);
        assert_eq!(aggregate(&m, &incomes, op, None).unwrap(), Column::from(expected));
    }

    #[rstest]
    #[case(AggregateOp::Any, vec![true, false, false])]
    #[case(AggregateOp::All, vec![false, false, true])]
    fn test_boolean_reductions(#[case] op: AggregateOp, #[case] expected: Vec<bool>) {
        let m = membership();
        let flags = Column::from(vec![true, false, false, false]);
        assert_eq!(aggregate(&m, &flags, op, None).unwrap(), Column::from(expected));
    }

    #[test]
    fn test_role_filter_and_count() {
        let m = membership();
        let ages = Column::from(vec![40i64, 38, 9, 70]);
        let adults = aggregate(&m, &ages, AggregateOp::Count, Some("adult")).unwrap();
        assert_eq!(adults, Column::from(vec![2i64, 1, 0]));
        let child_ages = aggregate(&m, &ages, AggregateOp::Sum, Some("child")).unwrap();
        assert_eq!(child_ages, Column::from(vec![9i64, 0, 0]));
    }

    #[test]
    fn test_type_rules() {
        let m = membership();
        let flags = Column::from(vec![true, false, false, false]);
        assert!(aggregate(&m, &flags, AggregateOp::Sum, None).is_err());
        let nums = Column::from(vec![1.0, 2.0, 3.0, 4.0]);
        assert!(aggregate(&m, &nums, AggregateOp::Any, None).is_err());
    }

    #[test]
    fn test_project_back_to_members() {
        let m = membership();
        let per_family = Column::from(vec![1.5, 2.5, 3.5]);
        assert_eq!(project(&m, &per_family).unwrap(), Column::from(vec![1.5, 1.5, 1.5, 2.5]));
    }
}
