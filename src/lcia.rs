//! Impact aggregation (LCIA) over a traversal.
//!
//! Scores a traversal against one LCIA quantity. Two kinds of contribution
//! carry impact:
//!
//! - `Process`-terminated activity entries: the background process's
//!   per-unit inventory is characterized line by line into a **unit score**,
//!   cached on the graph per (fragment, quantity, scenario) and multiplied
//!   by the node weight.
//! - Elementary inventory lines: the flow's factor (with compartment
//!   fallback) times the line's magnitude.
//!
//! Reference, interior, and sub-model entries are pass-throughs; their
//! impact arrives via the merged sub-model entries and elementary lines, so
//! scoring them too would double count.
//!
//! Sign convention: outputs to the environment count positive, inputs from
//! it negative.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::graph::FragmentGraph;
use crate::models::{Context, Direction, Quantity};
use crate::providers::{AnchorProvider, CharacterizationSource};
use crate::traversal::{Termination, Traversal, TraversalOptions, traverse};
use crate::{Error, Result};

/// What to do when a flow has no characterization factor under the
/// requested quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingPolicy {
    /// Treat the flow as a cutoff: zero contribution, listed in
    /// [`LciaResult::missing`].
    Cutoff,

    /// Abort aggregation with [`Error::CharacterizationMissing`].
    Abort,
}

/// One scored contribution, in activity order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LciaComponent {
    pub fragment_id: String,
    pub flow_id: String,
    pub node_weight: f64,
    /// Impact per unit node weight (signed)
    pub unit_score: f64,
    /// `node_weight * unit_score`
    pub score: f64,
}

/// A flow skipped under [`MissingPolicy::Cutoff`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissingFlow {
    pub fragment_id: String,
    pub flow_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,
    pub magnitude: f64,
}

/// Total impact plus the per-node breakdown for contribution analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LciaResult {
    pub quantity_id: String,
    pub scenario: String,
    pub total: f64,
    pub components: Vec<LciaComponent>,
    pub missing: Vec<MissingFlow>,
}

/// Score `traversal` against `quantity`.
///
/// Takes the graph mutably for the unit-score cache; recomputation is
/// idempotent, and invalidation rides the graph's mutation path.
pub fn lcia(
    graph: &mut FragmentGraph,
    traversal: &Traversal,
    quantity: &Quantity,
    anchors: &dyn AnchorProvider,
    factors: &dyn CharacterizationSource,
    missing: MissingPolicy,
) -> Result<LciaResult> {
    let scenario = traversal.scenario.as_str();
    let mut components = Vec::new();
    let mut missing_flows = Vec::new();

    for entry in &traversal.activity {
        let Termination::Process {
            process,
            exchange_value,
        } = &entry.termination
        else {
            continue;
        };
        if *exchange_value == 0.0 {
            return Err(Error::InvalidInput(format!(
                "Process anchor on fragment {} has a zero exchange value",
                entry.fragment_id
            )));
        }

        let unit_score = match graph.cached_unit_score(&entry.fragment_id, &quantity.id, scenario) {
            Some(score) => {
                trace!(fragment = %entry.fragment_id, score, "unit score cache hit");
                score
            }
            None => {
                let ref_flow = {
                    let fragment = graph.fragment(&entry.fragment_id)?;
                    Arc::clone(&fragment.flow)
                };
                let lines = anchors.unit_inventory(process, &ref_flow)?;
                let mut unit = 0.0;
                let mut incomplete = false;
                for line in &lines {
                    match lookup_factor(factors, &line.flow_id, &quantity.id, line.context.as_ref())
                    {
                        Some(factor) => {
                            unit += emission_sign(line.direction) * line.amount * factor;
                        }
                        None => match missing {
                            MissingPolicy::Abort => {
                                return Err(Error::CharacterizationMissing {
                                    flow: line.flow_id.clone(),
                                    quantity: quantity.id.clone(),
                                });
                            }
                            MissingPolicy::Cutoff => {
                                incomplete = true;
                                missing_flows.push(MissingFlow {
                                    fragment_id: entry.fragment_id.clone(),
                                    flow_id: line.flow_id.clone(),
                                    context: line.context.clone(),
                                    magnitude: entry.node_weight * line.amount / exchange_value,
                                });
                            }
                        },
                    }
                }
                let unit = unit / exchange_value;
                // A score computed around missing factors is not cached, so
                // a later call under a stricter policy recomputes it.
                if !incomplete {
                    graph.store_unit_score(&entry.fragment_id, &quantity.id, scenario, unit);
                }
                unit
            }
        };
        components.push(LciaComponent {
            fragment_id: entry.fragment_id.clone(),
            flow_id: entry.flow_id.clone(),
            node_weight: entry.node_weight,
            unit_score,
            score: entry.node_weight * unit_score,
        });
    }

    for line in &traversal.inventory.elementary {
        let unit_score = match graph.cached_unit_score(&line.fragment_id, &quantity.id, scenario) {
            Some(score) => {
                trace!(fragment = %line.fragment_id, score, "unit score cache hit");
                Some(score)
            }
            None => match lookup_factor(factors, &line.flow_id, &quantity.id, Some(&line.context)) {
                Some(factor) => {
                    let unit_score = emission_sign(line.direction) * factor;
                    graph.store_unit_score(&line.fragment_id, &quantity.id, scenario, unit_score);
                    Some(unit_score)
                }
                None => None,
            },
        };
        match unit_score {
            Some(unit_score) => components.push(LciaComponent {
                fragment_id: line.fragment_id.clone(),
                flow_id: line.flow_id.clone(),
                node_weight: line.magnitude,
                unit_score,
                score: line.magnitude * unit_score,
            }),
            None => match missing {
                MissingPolicy::Abort => {
                    return Err(Error::CharacterizationMissing {
                        flow: line.flow_id.clone(),
                        quantity: quantity.id.clone(),
                    });
                }
                MissingPolicy::Cutoff => missing_flows.push(MissingFlow {
                    fragment_id: line.fragment_id.clone(),
                    flow_id: line.flow_id.clone(),
                    context: Some(line.context.clone()),
                    magnitude: line.magnitude,
                }),
            },
        }
    }

    let total = components.iter().map(|c| c.score).sum();
    debug!(
        quantity = %quantity.id,
        scenario,
        total,
        components = components.len(),
        missing = missing_flows.len(),
        "aggregated impact"
    );
    Ok(LciaResult {
        quantity_id: quantity.id.clone(),
        scenario: traversal.scenario.clone(),
        total,
        components,
        missing: missing_flows,
    })
}

/// Traverse and score in one call.
pub fn fragment_lcia(
    graph: &mut FragmentGraph,
    root_id: &str,
    scenario: &str,
    quantity: &Quantity,
    anchors: &dyn AnchorProvider,
    factors: &dyn CharacterizationSource,
    options: &TraversalOptions,
    missing: MissingPolicy,
) -> Result<LciaResult> {
    let traversal = traverse(graph, root_id, scenario, options)?;
    lcia(graph, &traversal, quantity, anchors, factors, missing)
}

/// Outputs to the environment count positive, inputs negative.
fn emission_sign(direction: Direction) -> f64 {
    match direction {
        Direction::Output => 1.0,
        Direction::Input => -1.0,
    }
}

/// Factor lookup with compartment fallback: most specific context first,
/// then each enclosing compartment, then the context-free factor.
fn lookup_factor(
    source: &dyn CharacterizationSource,
    flow_id: &str,
    quantity_id: &str,
    context: Option<&Context>,
) -> Option<f64> {
    let mut cursor = context;
    while let Some(ctx) = cursor {
        if let Some(factor) = source.factor(flow_id, quantity_id, Some(ctx)) {
            return Some(factor);
        }
        cursor = ctx.parent.as_deref();
    }
    source.factor(flow_id, quantity_id, None)
}
