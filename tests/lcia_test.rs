//! Impact aggregation integration tests.
//!
//! Covers the concrete GWP scenario, the per-node breakdown, missing-factor
//! policies, sign conventions, and unit-score cache behavior.

mod common;

use common::{FakeBackground, FakeFactors, assert_close, flow, gwp};
use tare::Error;
use tare::graph::anchor::Anchor;
use tare::graph::{DEFAULT_SCENARIO, FragmentGraph};
use tare::lcia::{MissingPolicy, fragment_lcia, lcia};
use tare::models::{Direction, ProcessRef};
use tare::providers::ExchangeLine;
use tare::traversal::{TraversalOptions, UnobservedPolicy, traverse};

fn options() -> TraversalOptions {
    TraversalOptions::new(UnobservedPolicy::Fail)
}

fn co2_line(amount: f64) -> ExchangeLine {
    ExchangeLine {
        flow_id: "f-co2".to_string(),
        context: Some(common::air()),
        direction: Direction::Output,
        amount,
    }
}

/// Widget at 780 units, electricity at 5.769 kWh/widget anchored to a grid
/// process emitting 0.4 kg CO2-eq/kWh: total GWP must be ~1800 kg CO2-eq.
#[test]
fn test_widget_gwp_total() {
    let mut graph = FragmentGraph::new();
    let widget = graph.add_reference_fragment(flow("f-widget", "widget"));
    let elec = graph
        .add_child(&widget, flow("f-elec", "electricity"), Direction::Input)
        .unwrap();
    graph.observe(&widget, DEFAULT_SCENARIO, Some(780.0)).unwrap();
    graph.observe(&elec, DEFAULT_SCENARIO, Some(5.769)).unwrap();
    graph
        .observe_anchor(
            &elec,
            DEFAULT_SCENARIO,
            Some(Anchor::process(ProcessRef::new("p-grid", "grid mix"))),
        )
        .unwrap();

    let background = FakeBackground::new().with_inventory("p-grid", vec![co2_line(0.4)]);
    let factors = FakeFactors::new().with("f-co2", 1.0);
    let quantity = gwp();

    let result = fragment_lcia(
        &mut graph,
        &widget,
        DEFAULT_SCENARIO,
        &quantity,
        &background,
        &factors,
        &options(),
        MissingPolicy::Abort,
    )
    .unwrap();

    assert_close(result.total, 780.0 * 5.769 * 0.4);
    assert_eq!(result.components.len(), 1);
    let component = &result.components[0];
    assert_eq!(component.fragment_id, elec);
    assert_close(component.unit_score, 0.4);
    assert_close(component.score, result.total);
    assert!(result.missing.is_empty());
}

#[test]
fn test_elementary_flows_scored_directly() {
    let (mut graph, root, _elec, co2) = model_with_process_and_context();
    let traversal = traverse(&graph, &root, DEFAULT_SCENARIO, &options()).unwrap();

    let background = FakeBackground::new().with_inventory("p-grid", vec![co2_line(0.4)]);
    let factors = FakeFactors::new().with("f-co2", 1.0);
    let result = lcia(
        &mut graph,
        &traversal,
        &gwp(),
        &background,
        &factors,
        MissingPolicy::Abort,
    )
    .unwrap();

    // 100 * 2 kWh * 0.4 direct process score plus 100 * 0.5 kg direct CO2.
    assert_close(result.total, 80.0 + 50.0);
    let direct = result
        .components
        .iter()
        .find(|c| c.fragment_id == co2)
        .unwrap();
    assert_close(direct.unit_score, 1.0);
    assert_close(direct.score, 50.0);
}

#[test]
fn test_environment_inputs_count_negative() {
    let mut graph = FragmentGraph::new();
    let root = graph.add_reference_fragment(flow("f-forest", "forestry"));
    let uptake = graph
        .add_child(&root, flow("f-co2", "carbon dioxide"), Direction::Input)
        .unwrap();
    graph.observe(&root, DEFAULT_SCENARIO, Some(10.0)).unwrap();
    graph.observe(&uptake, DEFAULT_SCENARIO, Some(2.0)).unwrap();
    graph
        .observe_anchor(&uptake, DEFAULT_SCENARIO, Some(Anchor::context(common::air())))
        .unwrap();

    let traversal = traverse(&graph, &root, DEFAULT_SCENARIO, &options()).unwrap();
    let result = lcia(
        &mut graph,
        &traversal,
        &gwp(),
        &FakeBackground::new(),
        &FakeFactors::new().with("f-co2", 1.0),
        MissingPolicy::Abort,
    )
    .unwrap();

    assert_close(result.total, -20.0);
}

#[test]
fn test_missing_factor_policies() {
    let (mut graph, root, _elec, _co2) = model_with_process_and_context();
    let traversal = traverse(&graph, &root, DEFAULT_SCENARIO, &options()).unwrap();
    let background = FakeBackground::new().with_inventory("p-grid", vec![co2_line(0.4)]);
    let empty_factors = FakeFactors::new();
    let quantity = gwp();

    let err = lcia(
        &mut graph,
        &traversal,
        &quantity,
        &background,
        &empty_factors,
        MissingPolicy::Abort,
    )
    .unwrap_err();
    assert!(matches!(err, Error::CharacterizationMissing { .. }));

    let result = lcia(
        &mut graph,
        &traversal,
        &quantity,
        &background,
        &empty_factors,
        MissingPolicy::Cutoff,
    )
    .unwrap();
    assert_close(result.total, 0.0);
    // One unscored line behind the process anchor, one elementary line.
    assert_eq!(result.missing.len(), 2);
}

#[test]
fn test_unit_score_cache_hit_matches_recomputation() {
    let (mut graph, root, elec, _co2) = model_with_process_and_context();
    let background = FakeBackground::new().with_inventory("p-grid", vec![co2_line(0.4)]);
    let factors = FakeFactors::new().with("f-co2", 1.0);
    let quantity = gwp();

    let traversal = traverse(&graph, &root, DEFAULT_SCENARIO, &options()).unwrap();
    let cold = lcia(&mut graph, &traversal, &quantity, &background, &factors, MissingPolicy::Abort)
        .unwrap();
    assert!(
        graph
            .cached_unit_score(&elec, &quantity.id, DEFAULT_SCENARIO)
            .is_some()
    );

    // Second aggregation hits the cache and must agree exactly.
    let warm = lcia(&mut graph, &traversal, &quantity, &background, &factors, MissingPolicy::Abort)
        .unwrap();
    assert_eq!(cold.total, warm.total);

    // Re-observing the same value invalidates the cache; the forced
    // recomputation must agree with the cached run.
    graph.observe(&elec, DEFAULT_SCENARIO, Some(2.0)).unwrap();
    assert!(
        graph
            .cached_unit_score(&elec, &quantity.id, DEFAULT_SCENARIO)
            .is_none()
    );
    let traversal = traverse(&graph, &root, DEFAULT_SCENARIO, &options()).unwrap();
    let recomputed =
        lcia(&mut graph, &traversal, &quantity, &background, &factors, MissingPolicy::Abort)
            .unwrap();
    assert_eq!(cold.total, recomputed.total);
}

/// The process delivers 2 kWh of electricity per unit activity, so the
/// per-kWh unit score is half the per-activity inventory, and missing
/// flows are reported at process-activity scale.
#[test]
fn test_scaled_process_anchor_divides_by_exchange_value() {
    let mut graph = FragmentGraph::new();
    let root = graph.add_reference_fragment(flow("f-widget", "widget"));
    let elec = graph
        .add_child(&root, flow("f-elec", "electricity"), Direction::Input)
        .unwrap();
    graph.observe(&root, DEFAULT_SCENARIO, Some(100.0)).unwrap();
    graph.observe(&elec, DEFAULT_SCENARIO, Some(2.0)).unwrap();
    graph
        .observe_anchor(
            &elec,
            DEFAULT_SCENARIO,
            Some(Anchor::process_scaled(
                ProcessRef::new("p-grid", "grid mix"),
                2.0,
            )),
        )
        .unwrap();

    let background = FakeBackground::new().with_inventory("p-grid", vec![co2_line(0.4)]);
    let quantity = gwp();

    let result = fragment_lcia(
        &mut graph,
        &root,
        DEFAULT_SCENARIO,
        &quantity,
        &background,
        &FakeFactors::new().with("f-co2", 1.0),
        &options(),
        MissingPolicy::Abort,
    )
    .unwrap();
    assert_close(result.components[0].unit_score, 0.2);
    assert_close(result.total, 200.0 * 0.2);

    // Re-observe to drop the cached score, then run without factors: the
    // missing line's magnitude is node weight * amount / exchange value.
    graph.observe(&elec, DEFAULT_SCENARIO, Some(2.0)).unwrap();
    let unscored = fragment_lcia(
        &mut graph,
        &root,
        DEFAULT_SCENARIO,
        &quantity,
        &background,
        &FakeFactors::new(),
        &options(),
        MissingPolicy::Cutoff,
    )
    .unwrap();
    assert_close(unscored.total, 0.0);
    assert_eq!(unscored.missing.len(), 1);
    assert_close(unscored.missing[0].magnitude, 200.0 * 0.4 / 2.0);
}

#[test]
fn test_elementary_scores_served_from_cache() {
    let (mut graph, root, _elec, co2) = model_with_process_and_context();
    let background = FakeBackground::new().with_inventory("p-grid", vec![co2_line(0.4)]);
    let quantity = gwp();

    let traversal = traverse(&graph, &root, DEFAULT_SCENARIO, &options()).unwrap();
    let cold = lcia(
        &mut graph,
        &traversal,
        &quantity,
        &background,
        &FakeFactors::new().with("f-co2", 1.0),
        MissingPolicy::Abort,
    )
    .unwrap();
    assert_eq!(
        graph.cached_unit_score(&co2, &quantity.id, DEFAULT_SCENARIO),
        Some(1.0)
    );

    // A warm cache answers every entry without consulting the factor
    // source at all, so an empty source under Abort still succeeds.
    let warm = lcia(
        &mut graph,
        &traversal,
        &quantity,
        &background,
        &FakeFactors::new(),
        MissingPolicy::Abort,
    )
    .unwrap();
    assert_eq!(cold.total, warm.total);
    assert!(warm.missing.is_empty());
}

#[test]
fn test_scenario_specific_scores_cached_separately() {
    let (mut graph, root, elec, _co2) = model_with_process_and_context();
    graph
        .observe_anchor(
            &elec,
            "renewable",
            Some(Anchor::process(ProcessRef::new("p-wind", "wind power"))),
        )
        .unwrap();
    let background = FakeBackground::new()
        .with_inventory("p-grid", vec![co2_line(0.4)])
        .with_inventory("p-wind", vec![co2_line(0.02)]);
    let factors = FakeFactors::new().with("f-co2", 1.0);
    let quantity = gwp();

    let base = fragment_lcia(
        &mut graph,
        &root,
        DEFAULT_SCENARIO,
        &quantity,
        &background,
        &factors,
        &options(),
        MissingPolicy::Abort,
    )
    .unwrap();
    let renewable = fragment_lcia(
        &mut graph,
        &root,
        "renewable",
        &quantity,
        &background,
        &factors,
        &options(),
        MissingPolicy::Abort,
    )
    .unwrap();

    assert_close(base.total, 80.0 + 50.0);
    assert_close(renewable.total, 4.0 + 50.0);
    assert_eq!(
        graph.cached_unit_score(&elec, &quantity.id, DEFAULT_SCENARIO),
        Some(0.4)
    );
    assert_eq!(
        graph.cached_unit_score(&elec, &quantity.id, "renewable"),
        Some(0.02)
    );
}

/// 100 widgets; 2 kWh/widget electricity from a background process; 0.5 kg
/// CO2/widget directly to air.
fn model_with_process_and_context() -> (FragmentGraph, String, String, String) {
    let mut graph = FragmentGraph::new();
    let root = graph.add_reference_fragment(flow("f-widget", "widget"));
    let elec = graph
        .add_child(&root, flow("f-elec", "electricity"), Direction::Input)
        .unwrap();
    let co2 = graph
        .add_child(&root, flow("f-co2", "carbon dioxide"), Direction::Output)
        .unwrap();
    graph.observe(&root, DEFAULT_SCENARIO, Some(100.0)).unwrap();
    graph.observe(&elec, DEFAULT_SCENARIO, Some(2.0)).unwrap();
    graph.observe(&co2, DEFAULT_SCENARIO, Some(0.5)).unwrap();
    graph
        .observe_anchor(
            &elec,
            DEFAULT_SCENARIO,
            Some(Anchor::process(ProcessRef::new("p-grid", "grid mix"))),
        )
        .unwrap();
    graph
        .observe_anchor(&co2, DEFAULT_SCENARIO, Some(Anchor::context(common::air())))
        .unwrap();
    (graph, root, elec, co2)
}
