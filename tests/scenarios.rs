//! End-to-end scenarios: a small family/person system, reforms on top of it
//! and evaluation through `Simulation`.

use chrono::NaiveDate;
use std::time::Duration;
use taxben_core::entities::AggregateOp;
use taxben_core::parameters::{Bracket, Scale};
use taxben_core::reform::AmendmentError;
use taxben_core::{
    apply_all, Amend, Column, DefinitionPeriod, EngineConfig, EntityKind, EntityModel, EvalError, Formula,
    GraphError, ParameterError, ParameterNode, Period, PeriodError, PeriodUnit, Population, Reform, Role,
    RuleGraph, RuleNode, Simulation, System, ValueType,
};

fn date(y: i32, m: u32, d: u32) -> NaiveDate { NaiveDate::from_ymd_opt(y, m, d).unwrap() }

fn year(y: i32) -> Period { Period::year(y).unwrap() }

fn model() -> EntityModel {
    EntityModel::new(
        EntityKind::new("person", "people"),
        vec![EntityKind::new("family", "families")
            .with_role(Role::new("adult", "adults").with_max(2))
            .with_role(Role::new("child", "children"))],
    )
    .unwrap()
}

fn source(name: &str, value_type: ValueType, entity: &str) -> RuleNode {
    RuleNode::builder(name, value_type, entity, DefinitionPeriod::Year).build().unwrap()
}

fn parameters() -> ParameterNode {
    ParameterNode::subtree([(
        "gov",
        ParameterNode::subtree([
            ("benefits", ParameterNode::subtree([("child_benefit", ParameterNode::constant(date(2000, 1, 1), 21.8))])),
            (
                "hmrc",
                ParameterNode::subtree([(
                    "income_tax",
                    ParameterNode::Scale(Scale::new(vec![
                        Bracket::constant(date(2000, 1, 1), 0.0, 0.2),
                        Bracket::constant(date(2000, 1, 1), 37_500.0, 0.4),
                        Bracket::constant(date(2000, 1, 1), 150_000.0, 0.45),
                    ])),
                )]),
            ),
        ]),
    )])
}

/// age, taxable_income and income are inputs; income_tax is 20% of taxable
/// income; family_income sums member incomes.
fn baseline() -> System {
    let mut rules = RuleGraph::new();
    rules.add_node(source("age", ValueType::Int, "person")).unwrap();
    rules.add_node(source("taxable_income", ValueType::Float, "person")).unwrap();
    rules.add_node(source("income", ValueType::Float, "person")).unwrap();
    rules
        .add_node(
            RuleNode::builder("income_tax", ValueType::Float, "person", DefinitionPeriod::Year)
                .formula(
                    Formula::new(|ctx| ctx.get("taxable_income")?.mul_scalar(0.2)).reads("taxable_income"),
                )
                .build()
                .unwrap(),
        )
        .unwrap();
    rules
        .add_node(
            RuleNode::builder("family_income", ValueType::Float, "family", DefinitionPeriod::Year)
                .formula(Formula::new(|ctx| ctx.sum_members("income")).reads("income"))
                .build()
                .unwrap(),
        )
        .unwrap();
    System::new(model(), rules, parameters())
}

/// p0..p2 in f0, p3 in f1, p4 in f2, and f3 with nobody in it.
fn families(incomes: Vec<f64>) -> Population {
    Population::builder(&model())
        .persons(["p0", "p1", "p2", "p3", "p4"])
        .group("family", "f0", &[("p0", "adult"), ("p1", "adult"), ("p2", "child")])
        .group("family", "f1", &[("p3", "adult")])
        .group("family", "f2", &[("p4", "adult")])
        .group("family", "f3", &[])
        .input("income", "person", year(2024), Column::from(incomes))
        .build()
        .unwrap()
}

fn single_adult(age: i64, taxable_income: f64) -> Population {
    Population::builder(&model())
        .person("p0")
        .group("family", "f0", &[("p0", "adult")])
        .input("age", "person", year(2024), Column::from(vec![age]))
        .input("taxable_income", "person", year(2024), Column::from(vec![taxable_income]))
        .build()
        .unwrap()
}

fn floats(column: Column) -> Vec<f64> { column.as_floats().unwrap().to_vec() }

fn basic_income_reform() -> Reform {
    let basic_income = RuleNode::builder("basic_income", ValueType::Float, "person", DefinitionPeriod::Year)
        .label("Flat basic income for working-age adults")
        .formula(
            Formula::new(|ctx| {
                let age = ctx.get("age")?;
                let eligible = age.ge_scalar(24.0)?.and(&age.lt_scalar(65.0)?)?;
                eligible.select(&ctx.fill(65.0), &ctx.fill(0.0))
            })
            .reads("age"),
        )
        .build()
        .unwrap();
    let income_tax = RuleNode::builder("income_tax", ValueType::Float, "person", DefinitionPeriod::Year)
        .formula(Formula::new(|ctx| ctx.get("taxable_income")?.mul_scalar(0.45)).reads("taxable_income"))
        .build()
        .unwrap();
    Reform::new("basic_income").add_node(basic_income).replace_node(income_tax)
}

// --- Entities ---

#[test]
fn test_family_sum_ignores_other_groups() {
    let sim = Simulation::new(baseline(), families(vec![100.0, 50.0, 0.0, 30.0, 20.0]), EngineConfig::default());
    let family_income = floats(sim.evaluate("family_income", year(2024)).unwrap());
    assert_eq!(family_income, vec![150.0, 30.0, 20.0, 0.0]);
}

#[test]
fn test_group_value_projected_onto_members() {
    let system = Reform::new("share")
        .add_node(
            RuleNode::builder("household_income", ValueType::Float, "person", DefinitionPeriod::Year)
                .formula(Formula::new(|ctx| ctx.group("family", "family_income")).reads("family_income"))
                .build()
                .unwrap(),
        )
        .add_node(
            RuleNode::builder("adults", ValueType::Int, "family", DefinitionPeriod::Year)
                .formula(Formula::new(|ctx| ctx.members_count(Some("adult"))))
                .build()
                .unwrap(),
        )
        .add_node(
            RuleNode::builder("top_income", ValueType::Float, "family", DefinitionPeriod::Year)
                .formula(Formula::new(|ctx| ctx.aggregate_role("income", AggregateOp::Max, "adult")).reads("income"))
                .build()
                .unwrap(),
        )
        .apply(&baseline())
        .unwrap();

    let sim = Simulation::new(system, families(vec![100.0, 50.0, 0.0, 30.0, 20.0]), EngineConfig::default());
    assert_eq!(floats(sim.evaluate("household_income", year(2024)).unwrap()), vec![150.0, 150.0, 150.0, 30.0, 20.0]);
    assert_eq!(sim.evaluate("adults", year(2024)).unwrap(), Column::from(vec![2i64, 1, 1, 0]));
    let top = floats(sim.evaluate("top_income", year(2024)).unwrap());
    assert_eq!(&top[..3], &[100.0, 30.0, 20.0]);
    assert_eq!(top[3], f64::NEG_INFINITY);
}

#[test]
fn test_aggregating_a_group_node_is_an_entity_mismatch() {
    let system = Reform::new("bad")
        .add_node(
            RuleNode::builder("nested", ValueType::Float, "family", DefinitionPeriod::Year)
                .formula(Formula::new(|ctx| ctx.sum_members("family_income")).reads("family_income"))
                .build()
                .unwrap(),
        )
        .apply(&baseline())
        .unwrap();
    let sim = Simulation::new(system, families(vec![1.0; 5]), EngineConfig::default());
    assert!(matches!(sim.evaluate("nested", year(2024)), Err(EvalError::EntityMismatch { .. })));
}

// --- Reforms ---

#[test]
fn test_basic_income_reform_in_any_order() {
    let reformed = basic_income_reform().apply(&baseline()).unwrap();
    assert_eq!(reformed.applied_reforms(), &["basic_income".to_string()]);

    let first = Simulation::new(reformed.clone(), single_adult(30, 200.0), EngineConfig::default());
    let bi_first = floats(first.evaluate("basic_income", year(2024)).unwrap());
    let tax_second = floats(first.evaluate("income_tax", year(2024)).unwrap());

    let second = Simulation::new(reformed, single_adult(30, 200.0), EngineConfig::default());
    let tax_first = floats(second.evaluate("income_tax", year(2024)).unwrap());
    let bi_second = floats(second.evaluate("basic_income", year(2024)).unwrap());

    assert_eq!(bi_first, vec![65.0]);
    assert_eq!(bi_first, bi_second);
    assert!((tax_first[0] - 90.0).abs() < 1e-9);
    assert_eq!(tax_first, tax_second);
}

#[test]
fn test_reform_leaves_baseline_untouched() {
    let baseline = baseline();
    let _reformed = basic_income_reform().apply(&baseline).unwrap();

    assert!(!baseline.rules().contains("basic_income"));
    let sim = Simulation::new(baseline, single_adult(30, 200.0), EngineConfig::default());
    assert_eq!(floats(sim.evaluate("income_tax", year(2024)).unwrap()), vec![40.0]);
}

#[test]
fn test_basic_income_age_bounds() {
    let reformed = basic_income_reform().apply(&baseline()).unwrap();
    for (age, expected) in [(23, 0.0), (24, 65.0), (64, 65.0), (65, 0.0)] {
        let sim = Simulation::new(reformed.clone(), single_adult(age, 0.0), EngineConfig::default());
        assert_eq!(floats(sim.evaluate("basic_income", year(2024)).unwrap()), vec![expected], "age {}", age);
    }
}

#[test]
fn test_duplicate_parameter_merge_keeps_tree() {
    let mut tree = parameters();
    let before = tree.clone();
    let err = tree
        .merge_subtree("gov.benefits", "child_benefit", ParameterNode::constant(date(2024, 1, 1), 0.0))
        .unwrap_err();
    assert!(matches!(err, ParameterError::DuplicateChildName { .. }));
    assert_eq!(tree, before);

    let reform = Reform::new("dup").merge_parameters(
        "gov.benefits",
        "child_benefit",
        ParameterNode::constant(date(2024, 1, 1), 0.0),
    );
    let err = reform.apply(&baseline()).unwrap_err();
    assert_eq!(err.step, 0);
    assert!(matches!(err.source, AmendmentError::Parameter(ParameterError::DuplicateChildName { .. })));
}

#[test]
fn test_replace_absent_node_fails_and_others_are_unchanged() {
    let baseline = baseline();
    let ghost = source("ghost", ValueType::Float, "person");
    let err = Reform::new("ghost").replace_node(ghost).apply(&baseline).unwrap_err();
    assert_eq!(err.source, AmendmentError::Graph(GraphError::UnknownNode("ghost".to_string())));

    let reformed = basic_income_reform().apply(&baseline).unwrap();
    for name in baseline.rules().names().filter(|n| *n != "income_tax") {
        assert_eq!(baseline.rules().get(name), reformed.rules().get(name), "{} changed", name);
    }
}

#[test]
fn test_neutralized_node_is_zero_whatever_the_inputs() {
    let reformed = apply_all(&baseline(), &[&basic_income_reform(), &Reform::new("no_tax").neutralize("income_tax")])
        .unwrap();
    let population = Population::builder(&model())
        .person("p0")
        .group("family", "f0", &[("p0", "adult")])
        .input("taxable_income", "person", year(2024), Column::from(vec![1_000.0]))
        .input("income_tax", "person", year(2024), Column::from(vec![123.0]))
        .build()
        .unwrap();
    let sim = Simulation::new(reformed, population, EngineConfig::default());
    assert_eq!(floats(sim.evaluate("income_tax", year(2024)).unwrap()), vec![0.0]);
    assert_eq!(floats(sim.evaluate("income_tax", year(1990)).unwrap()), vec![0.0]);
}

// --- Cycles and recursion ---

fn with_counter(formula: Formula) -> System {
    let mut rules = RuleGraph::new();
    rules
        .add_node(
            RuleNode::builder("savings", ValueType::Float, "person", DefinitionPeriod::Year)
                .formula_from(date(2020, 1, 1), formula)
                .build()
                .unwrap(),
        )
        .unwrap();
    System::new(model(), rules, ParameterNode::empty())
}

#[test]
fn test_self_reference_is_a_cycle() {
    let system = with_counter(Formula::new(|ctx| ctx.get("savings")?.add_scalar(1.0)).reads("savings"));
    assert!(matches!(system.validate(), Err(GraphError::CyclicDependency { .. })));

    let sim = Simulation::new(system, single_adult(30, 0.0), EngineConfig::default());
    let err = sim.evaluate("savings", year(2024)).unwrap_err();
    assert_eq!(err, EvalError::CyclicDependency { cycle: vec!["savings".to_string(), "savings".to_string()] });
    // Errors are not cached: the same request fails the same way again.
    assert_eq!(sim.evaluate("savings", year(2024)).unwrap_err(), err);
}

#[test]
fn test_self_reference_one_year_back_succeeds() {
    let system = with_counter(
        Formula::new(|ctx| ctx.get_offset("savings", -1, PeriodUnit::Year)?.add_scalar(10.0))
            .reads_offset("savings", -1, PeriodUnit::Year),
    );
    assert!(system.validate().is_ok());

    let sim = Simulation::new(system, single_adult(30, 0.0), EngineConfig::default());
    assert_eq!(floats(sim.evaluate("savings", year(2022)).unwrap()), vec![30.0]);
    assert_eq!(floats(sim.evaluate("savings", year(2019)).unwrap()), vec![0.0]);
}

#[test]
fn test_recursion_limit() {
    let system = with_counter(
        Formula::new(|ctx| ctx.get_offset("savings", -1, PeriodUnit::Year)?.add_scalar(1.0))
            .reads_offset("savings", -1, PeriodUnit::Year),
    );
    let config = EngineConfig { max_depth: 3, ..EngineConfig::default() };
    let sim = Simulation::new(system, single_adult(30, 0.0), config);
    assert!(matches!(sim.evaluate("savings", year(2030)), Err(EvalError::RecursionLimit { limit: 3, .. })));
}

// --- Evaluation rules ---

#[test]
fn test_undeclared_read_is_rejected() {
    let system = Reform::new("sneaky")
        .add_node(
            RuleNode::builder("sneaky", ValueType::Float, "person", DefinitionPeriod::Year)
                .formula(Formula::new(|ctx| ctx.get("taxable_income")))
                .build()
                .unwrap(),
        )
        .apply(&baseline())
        .unwrap();
    let sim = Simulation::new(system, single_adult(30, 10.0), EngineConfig::default());
    assert_eq!(
        sim.evaluate("sneaky", year(2024)).unwrap_err(),
        EvalError::UndeclaredDependency { node: "sneaky".to_string(), dependency: "taxable_income".to_string() }
    );
}

#[test]
fn test_scope_must_match_definition() {
    let sim = Simulation::new(baseline(), single_adult(30, 10.0), EngineConfig::default());
    assert!(matches!(
        sim.evaluate("income_tax", Period::month(2024, 1).unwrap()),
        Err(EvalError::ScopeMismatch { .. })
    ));
    assert!(matches!(sim.evaluate("no_such_node", year(2024)), Err(EvalError::UnknownNode(_))));
}

#[test]
fn test_monthly_values_added_over_a_year() {
    let system = Reform::new("wages")
        .add_node(
            RuleNode::builder("monthly_wage", ValueType::Float, "person", DefinitionPeriod::Month)
                .formula(Formula::constant(100.0))
                .build()
                .unwrap(),
        )
        .add_node(
            RuleNode::builder("annual_wage", ValueType::Float, "person", DefinitionPeriod::Year)
                .formula(Formula::new(|ctx| ctx.get_added("monthly_wage")).reads_added("monthly_wage"))
                .build()
                .unwrap(),
        )
        .apply(&baseline())
        .unwrap();
    let sim = Simulation::new(system, single_adult(30, 0.0), EngineConfig::default());
    assert_eq!(floats(sim.evaluate("annual_wage", year(2024)).unwrap()), vec![1_200.0]);
    assert_eq!(sim.ledger_stats().entries, 13);
}

#[test]
fn test_scale_parameter_in_formula() {
    let system = Reform::new("progressive")
        .replace_node(
            RuleNode::builder("income_tax", ValueType::Float, "person", DefinitionPeriod::Year)
                .formula(
                    Formula::new(|ctx| ctx.scale("gov.hmrc.income_tax")?.calc_column(&ctx.get("taxable_income")?))
                        .reads("taxable_income"),
                )
                .build()
                .unwrap(),
        )
        .apply(&baseline())
        .unwrap();
    let sim = Simulation::new(system, single_adult(30, 50_000.0), EngineConfig::default());
    let tax = floats(sim.evaluate("income_tax", year(2024)).unwrap());
    assert!((tax[0] - 12_500.0).abs() < 1e-6);
}

#[test]
fn test_eternal_formula_reads_parameters_at_configured_instant() {
    let system = Reform::new("eternal")
        .add_node(
            RuleNode::builder("child_benefit_rate", ValueType::Float, "person", DefinitionPeriod::Eternity)
                .formula(Formula::new(|ctx| Ok(ctx.fill(ctx.param("gov.benefits.child_benefit")?))))
                .build()
                .unwrap(),
        )
        .apply(&baseline())
        .unwrap();

    let sim = Simulation::new(system.clone(), single_adult(30, 0.0), EngineConfig::default());
    assert_eq!(
        sim.evaluate("child_benefit_rate", year(2024)).unwrap_err(),
        EvalError::Period(PeriodError::EternityArithmetic { op: "instant_of" })
    );

    let config = EngineConfig::default().with_eternity_instant(date(2024, 4, 6));
    let sim = Simulation::new(system, single_adult(30, 0.0), config);
    assert_eq!(floats(sim.evaluate("child_benefit_rate", year(2024)).unwrap()), vec![21.8]);
    // Any scope maps to the single eternal value.
    assert_eq!(floats(sim.evaluate("child_benefit_rate", Period::month(2030, 2).unwrap()).unwrap()), vec![21.8]);
    assert_eq!(sim.ledger_stats().entries, 1);
}

// --- Simulation ---

#[test]
fn test_repeated_evaluation_is_identical_and_cached() {
    let sim = Simulation::new(baseline(), families(vec![100.0, 50.0, 0.0, 30.0, 20.0]), EngineConfig::default());
    let first = sim.evaluate("family_income", year(2024)).unwrap();
    let second = sim.evaluate("family_income", year(2024)).unwrap();
    assert_eq!(first, second);
    assert!(sim.ledger_stats().hits >= 1);
}

#[test]
fn test_evaluate_many_keeps_request_order() {
    let reformed = basic_income_reform().apply(&baseline()).unwrap();
    let sim = Simulation::new(reformed, single_adult(30, 200.0), EngineConfig::default());
    let results = sim.evaluate_many(&[
        ("income_tax", year(2024)),
        ("basic_income", year(2024)),
        ("taxable_income", year(2024)),
        ("missing", year(2024)),
    ]);
    assert_eq!(results.len(), 4);
    assert!((floats(results[0].clone().unwrap())[0] - 90.0).abs() < 1e-9);
    assert_eq!(floats(results[1].clone().unwrap()), vec![65.0]);
    assert_eq!(floats(results[2].clone().unwrap()), vec![200.0]);
    assert!(matches!(results[3], Err(EvalError::UnknownNode(_))));
}

#[test]
fn test_cancellation_and_resume() {
    let sim = Simulation::new(baseline(), single_adult(30, 200.0), EngineConfig::sequential());
    sim.cancel();
    assert_eq!(sim.evaluate("income_tax", year(2024)), Err(EvalError::Cancelled));
    sim.resume();
    assert!(sim.evaluate("income_tax", year(2024)).is_ok());
    assert_eq!(
        sim.evaluate_with_timeout("taxable_income", year(2025), Duration::ZERO),
        Err(EvalError::Cancelled)
    );
}

#[test]
fn test_new_population_invalidates_cache() {
    let mut sim = Simulation::new(baseline(), single_adult(30, 200.0), EngineConfig::default());
    assert_eq!(floats(sim.evaluate("income_tax", year(2024)).unwrap()), vec![40.0]);
    sim.set_population(single_adult(30, 1_000.0));
    assert_eq!(sim.ledger_stats().entries, 0);
    assert_eq!(floats(sim.evaluate("income_tax", year(2024)).unwrap()), vec![200.0]);
}

#[test]
fn test_fixed_decimal_rounds_formula_output() {
    let system = baseline().with_numeric(taxben_core::Numeric::FixedDecimal { places: 2 });
    let sim = Simulation::new(system, single_adult(30, 10.333), EngineConfig::default());
    assert_eq!(floats(sim.evaluate("income_tax", year(2024)).unwrap()), vec![2.07]);
}

#[test]
fn test_trace_shows_dependency_tree() {
    let sim = Simulation::new(
        baseline(),
        families(vec![100.0, 50.0, 0.0, 30.0, 20.0]),
        EngineConfig::default().with_trace(),
    );
    sim.evaluate("family_income", year(2024)).unwrap();
    let text = sim.format_trace("family_income", &year(2024));
    assert!(text.starts_with("AUDIT TRACE for node 'family_income' at 2024:"));
    assert!(text.contains("[L1] family_income@2024 [150.000, 30.000, 20.000, 0.000] <- Formula"));
    assert!(text.contains("`--[L2] income@2024"));
    assert!(text.contains("<- Input"));

    let json = sim.tracer().unwrap().to_json().unwrap();
    assert!(json.contains("\"source\": \"formula\""));
}
