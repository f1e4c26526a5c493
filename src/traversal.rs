//! Recursive fragment traversal.
//!
//! `traverse` walks one fragment tree under a scenario, depth first and in
//! stable child order, computing every node's weight (parent weight times
//! intensive exchange value), solving balance flows, recursing into
//! `Node`-anchored sub-models, and collecting two projections of the same
//! pass:
//!
//! - **Activity**: ordered `(fragment, node weight)` entries for every
//!   visited node, the input to LCIA.
//! - **Inventory**: the reference flow's magnitude plus every terminal
//!   cutoff and elementary-context entry, the model's externally visible
//!   result.
//!
//! Cutoffs of a nested sub-model are not final: they are forwarded to the
//! enclosing level and matched against the anchored fragment's own child
//! flows. Matched cutoffs drive those children's node weights; unmatched
//! ones propagate further out, becoming inventory entries only at the top.
//!
//! Node weights depend multiplicatively on ancestor weights, so the walk is
//! single-threaded and synchronous; order affects presentation only, never
//! values.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace};

use crate::balance::{balance_child, solve_balance};
use crate::graph::FragmentGraph;
use crate::graph::anchor::{self, AnchorResolution};
use crate::models::{Context, Direction, ProcessRef};
use crate::{Error, Result};

/// Cooperative cancellation handle, checked at every node visit.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of any traversal holding a clone of this token.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// What to do when a non-balance fragment has no exchange value for the
/// scenario in effect, after default fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnobservedPolicy {
    /// Abort the traversal with [`Error::Unobserved`].
    Fail,

    /// Treat the missing value as zero flow.
    Zero,
}

/// Caller-selected traversal behavior.
///
/// There is deliberately no `Default`: "no data" handling is a modeling
/// decision the caller must make explicitly.
#[derive(Debug, Clone)]
pub struct TraversalOptions {
    pub unobserved: UnobservedPolicy,
    pub cancel: Option<CancelToken>,
}

impl TraversalOptions {
    pub fn new(unobserved: UnobservedPolicy) -> Self {
        Self {
            unobserved,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// How a visited or anchored fragment terminated during the traversal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Termination {
    /// A visited tree root (the top-level model or an anchored sub-model).
    Reference,

    /// An in-tree node with children and no anchor; a pass-through.
    Interior,

    /// A fragment anchored into another tree.
    SubModel { target: String },

    /// A fragment anchored to a background process; terminal here, scored
    /// against the process's per-unit inventory in LCIA.
    Process {
        process: ProcessRef,
        exchange_value: f64,
    },
}

/// One visited node: the unit of the activity projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub fragment_id: String,
    pub flow_id: String,
    pub node_weight: f64,
    pub termination: Termination,
}

/// Magnitude of the traversed model's reference flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceLine {
    pub fragment_id: String,
    pub flow_id: String,
    pub magnitude: f64,
}

/// A flow terminated into an environmental compartment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementaryLine {
    pub fragment_id: String,
    pub flow_id: String,
    pub context: Context,
    pub direction: Direction,
    pub magnitude: f64,
}

/// A flow that exits the system boundary unresolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CutoffLine {
    pub fragment_id: String,
    pub flow_id: String,
    pub direction: Direction,
    pub magnitude: f64,
}

/// The model's externally visible inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inventory {
    pub reference: ReferenceLine,
    pub elementary: Vec<ElementaryLine>,
    pub cutoffs: Vec<CutoffLine>,
}

/// Both projections of one traversal pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Traversal {
    pub scenario: String,
    pub activity: Vec<ActivityEntry>,
    pub inventory: Inventory,
}

/// Traverse the tree rooted at `root_id` under `scenario`.
///
/// `root_id` must be a reference fragment; its observed exchange value is
/// the starting node weight (absolute, not intensive). The scenario name
/// propagates unchanged into anchored sub-models, each applying its own
/// default fallback.
pub fn traverse(
    graph: &FragmentGraph,
    root_id: &str,
    scenario: &str,
    options: &TraversalOptions,
) -> Result<Traversal> {
    let root = graph.fragment(root_id)?;
    if !root.is_reference() {
        return Err(Error::InvalidInput(format!(
            "Fragment {} is not a reference fragment",
            root_id
        )));
    }
    let weight = graph
        .effective_exchange_value(root_id, scenario)
        .map_err(|err| match err {
            Error::Unobserved { fragment, scenario } => {
                Error::UnobservedReference { fragment, scenario }
            }
            other => other,
        })?;
    debug!(root = %root_id, scenario, weight, "starting traversal");

    let mut walker = Walker {
        graph,
        scenario,
        options,
        stack: vec![root_id.to_string()],
        activity: Vec::new(),
        elementary: Vec::new(),
    };
    let mut cutoffs = Vec::new();
    walker.visit_node(root_id, weight, Termination::Reference, &mut cutoffs)?;

    Ok(Traversal {
        scenario: scenario.to_string(),
        activity: walker.activity,
        inventory: Inventory {
            reference: ReferenceLine {
                fragment_id: root_id.to_string(),
                flow_id: root.flow.id.clone(),
                magnitude: weight,
            },
            elementary: walker.elementary,
            cutoffs,
        },
    })
}

struct Walker<'a> {
    graph: &'a FragmentGraph,
    scenario: &'a str,
    options: &'a TraversalOptions,

    /// Reference fragments on the active anchor-recursion path. Scenario
    /// propagation is identity, so the ids alone identify the
    /// (fragment, scenario) pairs of the visited-stack.
    stack: Vec<String>,

    activity: Vec<ActivityEntry>,
    elementary: Vec<ElementaryLine>,
}

impl Walker<'_> {
    /// Visit one node: record it, then resolve and descend into its
    /// children. `cutoffs` collects the unresolved flows of the tree this
    /// node belongs to.
    fn visit_node(
        &mut self,
        node_id: &str,
        node_weight: f64,
        termination: Termination,
        cutoffs: &mut Vec<CutoffLine>,
    ) -> Result<()> {
        if self.options.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Err(Error::TraversalCancelled);
        }
        let fragment = self.graph.fragment(node_id)?;
        trace!(fragment = %node_id, weight = node_weight, "visiting node");
        self.activity.push(ActivityEntry {
            fragment_id: node_id.to_string(),
            flow_id: fragment.flow.id.clone(),
            node_weight,
            termination,
        });
        self.process_children(node_id, node_weight, cutoffs, &HashMap::new())
    }

    /// Resolve the intensive values of every child of `parent_id` (solving
    /// at most one balance flow), then descend in stored order.
    ///
    /// `driven` maps child ids to absolute node weights imposed by matched
    /// sub-model cutoffs; driven children skip the intensive computation.
    fn process_children(
        &mut self,
        parent_id: &str,
        parent_weight: f64,
        cutoffs: &mut Vec<CutoffLine>,
        driven: &HashMap<String, f64>,
    ) -> Result<()> {
        let child_ids = self.graph.children(parent_id)?.to_vec();
        if child_ids.is_empty() {
            return Ok(());
        }

        let mut infos = Vec::with_capacity(child_ids.len());
        for id in &child_ids {
            let child = self.graph.fragment(id)?;
            infos.push((id.clone(), child.direction, child.is_balance));
        }
        let balance_id = balance_child(
            parent_id,
            infos.iter().map(|(id, _, is_bal)| (id.as_str(), *is_bal)),
        )?
        .map(str::to_string);

        // Pass 1: intensive values of all non-balance children.
        let mut values = vec![0.0_f64; infos.len()];
        for (i, (id, _, is_balance)) in infos.iter().enumerate() {
            if *is_balance {
                continue;
            }
            values[i] = match driven.get(id) {
                Some(magnitude) if parent_weight != 0.0 => magnitude / parent_weight,
                Some(_) => 0.0,
                None => self.child_value(id)?,
            };
        }

        // Balance flow closes the conservation equation over its siblings.
        if let Some(bid) = &balance_id {
            if driven.contains_key(bid) {
                return Err(Error::InvalidInput(format!(
                    "Balance fragment {} cannot be driven by a matched cutoff",
                    bid
                )));
            }
            let resolved: Vec<(Direction, f64)> = infos
                .iter()
                .zip(&values)
                .filter(|((id, _, _), _)| id != bid)
                .map(|((_, direction, _), value)| (*direction, *value))
                .collect();
            let index = infos
                .iter()
                .position(|(id, _, _)| id == bid)
                .expect("balance child comes from infos");
            values[index] = solve_balance(&resolved, infos[index].1);
            trace!(fragment = %bid, value = values[index], "solved balance flow");
        }

        // Pass 2: descend in stored order.
        for ((id, _, _), value) in infos.iter().zip(&values) {
            let child_weight = driven
                .get(id)
                .copied()
                .unwrap_or(parent_weight * value);
            self.process_child(id, child_weight, cutoffs)?;
        }
        Ok(())
    }

    /// Dispatch one child on its resolved termination.
    fn process_child(
        &mut self,
        child_id: &str,
        child_weight: f64,
        cutoffs: &mut Vec<CutoffLine>,
    ) -> Result<()> {
        let child = self.graph.fragment(child_id)?;
        match anchor::resolve(self.graph, child_id, self.scenario)? {
            AnchorResolution::Cutoff => {
                if child.children().is_empty() {
                    trace!(fragment = %child_id, weight = child_weight, "cutoff");
                    cutoffs.push(CutoffLine {
                        fragment_id: child_id.to_string(),
                        flow_id: child.flow.id.clone(),
                        direction: child.direction,
                        magnitude: child_weight,
                    });
                } else {
                    // Unanchored node with children: an in-tree pass-through.
                    self.visit_node(child_id, child_weight, Termination::Interior, cutoffs)?;
                }
            }
            AnchorResolution::Context(ctx) => {
                trace!(fragment = %child_id, context = %ctx, weight = child_weight, "elementary flow");
                self.elementary.push(ElementaryLine {
                    fragment_id: child_id.to_string(),
                    flow_id: child.flow.id.clone(),
                    context: (*ctx).clone(),
                    direction: child.direction,
                    magnitude: child_weight,
                });
            }
            AnchorResolution::Process {
                process,
                exchange_value,
            } => {
                trace!(fragment = %child_id, process = %process.id, weight = child_weight, "process anchor");
                self.activity.push(ActivityEntry {
                    fragment_id: child_id.to_string(),
                    flow_id: child.flow.id.clone(),
                    node_weight: child_weight,
                    termination: Termination::Process {
                        process,
                        exchange_value,
                    },
                });
            }
            AnchorResolution::Node(target) => {
                self.descend_into_anchor(child_id, child_weight, &target, cutoffs)?;
            }
        }
        Ok(())
    }

    /// Recurse into an anchored sub-model, then re-match its cutoffs
    /// against the anchored fragment's own child flows.
    fn descend_into_anchor(
        &mut self,
        child_id: &str,
        child_weight: f64,
        target: &str,
        cutoffs: &mut Vec<CutoffLine>,
    ) -> Result<()> {
        if self.stack.iter().any(|id| id == target) {
            let mut path = self.stack.clone();
            path.push(target.to_string());
            return Err(Error::CircularAnchor { path });
        }
        // Anchors point at whole models, never into the middle of one; a
        // mid-tree target would silently produce partial-model numbers.
        if !self.graph.fragment(target)?.is_reference() {
            return Err(Error::InvalidInput(format!(
                "Anchor target {} is not a reference fragment",
                target
            )));
        }
        let child = self.graph.fragment(child_id)?;
        self.activity.push(ActivityEntry {
            fragment_id: child_id.to_string(),
            flow_id: child.flow.id.clone(),
            node_weight: child_weight,
            termination: Termination::SubModel {
                target: target.to_string(),
            },
        });

        debug!(fragment = %child_id, target = %target, weight = child_weight, "descending into sub-model");
        self.stack.push(target.to_string());
        let mut forwarded = Vec::new();
        let result = self.visit_node(target, child_weight, Termination::Reference, &mut forwarded);
        self.stack.pop();
        result?;

        // Match forwarded cutoffs against this fragment's own child flows:
        // same flow identity, same direction across the boundary. Matched
        // magnitudes accumulate per child and drive its node weight;
        // unmatched cutoffs escalate to the enclosing level.
        let mut driven: HashMap<String, f64> = HashMap::new();
        let kid_ids = self.graph.children(child_id)?.to_vec();
        'cutoff: for cutoff in forwarded {
            for kid_id in &kid_ids {
                let kid = self.graph.fragment(kid_id)?;
                if kid.flow.id == cutoff.flow_id && kid.direction == cutoff.direction {
                    debug!(
                        cutoff_flow = %cutoff.flow_id,
                        matched = %kid_id,
                        magnitude = cutoff.magnitude,
                        "matched forwarded cutoff"
                    );
                    *driven.entry(kid_id.clone()).or_insert(0.0) += cutoff.magnitude;
                    continue 'cutoff;
                }
            }
            cutoffs.push(cutoff);
        }

        if !kid_ids.is_empty() {
            self.process_children(child_id, child_weight, cutoffs, &driven)?;
        }
        Ok(())
    }

    /// A child's intensive exchange value under the traversal's policy.
    fn child_value(&self, child_id: &str) -> Result<f64> {
        match self.graph.effective_exchange_value(child_id, self.scenario) {
            Ok(value) => Ok(value),
            Err(Error::Unobserved { .. }) if self.options.unobserved == UnobservedPolicy::Zero => {
                Ok(0.0)
            }
            Err(err) => Err(err),
        }
    }
}
