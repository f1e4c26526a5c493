//! The fragment graph: trees of scenario-observable flow fragments.
//!
//! Fragments are stored in a flat arena keyed by id; parent, child, and
//! anchor relations are id references. This keeps ownership simple (the
//! graph owns every fragment) while still letting anchors point anywhere,
//! including across trees. Acyclicity within one tree is enforced by
//! construction; anchor cycles across trees are possible and are detected
//! at traversal time.
//!
//! Each fragment carries a sparse, scenario-keyed observation table with a
//! reserved default key. Most fragments are scenario-invariant, so lookups
//! fall back to the default observation when no scenario-specific one
//! exists.

pub mod anchor;

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::models::{Direction, Flow};
use crate::{Error, Result};
use anchor::Anchor;

/// Reserved scenario key holding the fallback observation.
pub const DEFAULT_SCENARIO: &str = "default";

/// What has been observed about a fragment under one scenario.
#[derive(Debug, Clone, Default)]
pub struct Observation {
    /// Amount of the fragment's flow per unit node weight of the parent
    /// (absolute magnitude for a reference fragment). `None` if unobserved.
    pub exchange_value: Option<f64>,

    /// Termination of the flow; `None` designates a cutoff.
    pub anchor: Option<Anchor>,
}

impl Observation {
    fn is_empty(&self) -> bool {
        self.exchange_value.is_none() && self.anchor.is_none()
    }
}

/// A node in a fragment tree.
#[derive(Debug, Clone)]
pub struct Fragment {
    /// Unique identifier (e.g., "fr-7f3a...")
    pub id: String,

    /// The flow this fragment represents
    pub flow: Arc<Flow>,

    /// Direction relative to the parent node. Meaningless for a reference
    /// fragment, which instead defines the model's reference flow.
    pub direction: Direction,

    /// Owning fragment; `None` for a reference (root) fragment
    pub parent: Option<String>,

    /// If set, the exchange value is derived by the balance solver during
    /// traversal instead of being observed
    pub is_balance: bool,

    /// Direct children, in insertion order
    children: Vec<String>,

    /// Scenario-keyed observations, with the reserved default key
    observations: HashMap<String, Observation>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

impl Fragment {
    fn new(id: String, flow: Arc<Flow>, direction: Direction, parent: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            flow,
            direction,
            parent,
            is_balance: false,
            children: Vec::new(),
            observations: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Direct children in stable insertion order.
    pub fn children(&self) -> &[String] {
        &self.children
    }

    /// Whether this is a tree root (reference fragment).
    pub fn is_reference(&self) -> bool {
        self.parent.is_none()
    }

    /// The raw observation stored for a scenario, without fallback.
    pub fn observation(&self, scenario: &str) -> Option<&Observation> {
        self.observations.get(scenario)
    }
}

/// Arena of fragments plus the per-fragment unit-score cache.
#[derive(Debug, Default)]
pub struct FragmentGraph {
    fragments: HashMap<String, Fragment>,

    /// Reference fragments (tree roots), in creation order
    references: Vec<String>,

    /// Cached unit impact scores: fragment id -> (quantity id, scenario) -> score.
    /// Invalidated for the whole ancestor path on any mutation below it.
    unit_scores: HashMap<String, HashMap<(String, String), f64>>,
}

impl FragmentGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of fragments across all trees.
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Create a new tree whose reference fragment represents `flow`.
    ///
    /// Returns the generated fragment id.
    pub fn add_reference_fragment(&mut self, flow: Arc<Flow>) -> String {
        let id = new_fragment_id();
        self.add_reference_fragment_with_id(id.clone(), flow)
            .expect("generated fragment id collided");
        id
    }

    /// Create a new tree with a caller-supplied fragment id.
    pub fn add_reference_fragment_with_id(&mut self, id: String, flow: Arc<Flow>) -> Result<()> {
        if self.fragments.contains_key(&id) {
            return Err(Error::InvalidInput(format!(
                "Fragment id already exists: {}",
                id
            )));
        }
        debug!(fragment = %id, flow = %flow.id, "creating reference fragment");
        // Direction is meaningless for a root; store the produced reference
        // flow as an output of the model.
        self.fragments.insert(
            id.clone(),
            Fragment::new(id.clone(), flow, Direction::Output, None),
        );
        self.references.push(id);
        Ok(())
    }

    /// Append a child fragment to `parent`, preserving insertion order.
    ///
    /// Returns the generated fragment id.
    pub fn add_child(&mut self, parent: &str, flow: Arc<Flow>, direction: Direction) -> Result<String> {
        let id = new_fragment_id();
        self.add_child_with_id(id.clone(), parent, flow, direction)?;
        Ok(id)
    }

    /// Append a child fragment with a caller-supplied id.
    pub fn add_child_with_id(
        &mut self,
        id: String,
        parent: &str,
        flow: Arc<Flow>,
        direction: Direction,
    ) -> Result<()> {
        if self.fragments.contains_key(&id) {
            return Err(Error::InvalidInput(format!(
                "Fragment id already exists: {}",
                id
            )));
        }
        if !self.fragments.contains_key(parent) {
            return Err(Error::NotFound(format!("Fragment not found: {}", parent)));
        }
        debug!(fragment = %id, parent = %parent, flow = %flow.id, "creating child fragment");
        self.fragments.insert(
            id.clone(),
            Fragment::new(id.clone(), flow, direction, Some(parent.to_string())),
        );
        let parent = self
            .fragments
            .get_mut(parent)
            .expect("parent checked above");
        parent.children.push(id);
        parent.updated_at = Utc::now();
        Ok(())
    }

    /// Look up a fragment by id.
    pub fn fragment(&self, id: &str) -> Result<&Fragment> {
        self.fragments
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("Fragment not found: {}", id)))
    }

    /// Ids of a fragment's direct children, in stable insertion order.
    pub fn children(&self, id: &str) -> Result<&[String]> {
        Ok(self.fragment(id)?.children())
    }

    /// Reference fragments (tree roots) in creation order.
    pub fn reference_fragments(&self) -> &[String] {
        &self.references
    }

    /// Observe or clear a fragment's exchange value for a scenario.
    ///
    /// Fails with [`Error::ObservedBalanceFlow`] for balance-flagged
    /// fragments, whose value is always derived. Invalidates cached unit
    /// scores along the path to the root.
    pub fn observe(&mut self, id: &str, scenario: &str, value: Option<f64>) -> Result<()> {
        let fragment = self.fragment_mut(id)?;
        if fragment.is_balance && value.is_some() {
            return Err(Error::ObservedBalanceFlow(id.to_string()));
        }
        if let Some(v) = value {
            if !v.is_finite() || v < 0.0 {
                return Err(Error::InvalidInput(format!(
                    "Exchange value must be a non-negative number, got {}",
                    v
                )));
            }
        }
        let entry = fragment.observations.entry(scenario.to_string()).or_default();
        entry.exchange_value = value;
        if entry.is_empty() {
            fragment.observations.remove(scenario);
        }
        fragment.updated_at = Utc::now();
        self.invalidate_scores(id);
        Ok(())
    }

    /// Observe or clear a fragment's anchor for a scenario.
    ///
    /// Clearing (passing `None`) makes the fragment a cutoff under that
    /// scenario, unless the default observation still carries an anchor.
    pub fn observe_anchor(&mut self, id: &str, scenario: &str, anchor: Option<Anchor>) -> Result<()> {
        let fragment = self.fragment_mut(id)?;
        let entry = fragment.observations.entry(scenario.to_string()).or_default();
        entry.anchor = anchor;
        if entry.is_empty() {
            fragment.observations.remove(scenario);
        }
        fragment.updated_at = Utc::now();
        self.invalidate_scores(id);
        Ok(())
    }

    /// Set or clear the balance flag.
    ///
    /// Setting it clears every observed exchange value for the fragment
    /// (the value becomes derived). Reference fragments cannot be balance
    /// flows: their observed value is the traversal's starting weight.
    pub fn set_balance(&mut self, id: &str, on: bool) -> Result<()> {
        let fragment = self.fragment_mut(id)?;
        if on && fragment.is_reference() {
            return Err(Error::InvalidInput(format!(
                "Reference fragment {} cannot be a balance flow",
                id
            )));
        }
        fragment.is_balance = on;
        if on {
            for obs in fragment.observations.values_mut() {
                obs.exchange_value = None;
            }
            fragment.observations.retain(|_, obs| !obs.is_empty());
        }
        fragment.updated_at = Utc::now();
        self.invalidate_scores(id);
        Ok(())
    }

    /// Recursively delete a fragment and its subtree.
    ///
    /// Detaches the fragment from its parent (or from the reference list if
    /// it is a root). Anchors elsewhere that pointed into the deleted
    /// subtree dangle and surface as `NotFound` at traversal time.
    pub fn delete_subtree(&mut self, id: &str) -> Result<()> {
        let parent = self.fragment(id)?.parent.clone();
        // Invalidate before detaching so the whole ancestor path is walked.
        self.invalidate_scores(id);

        let mut doomed = vec![id.to_string()];
        let mut i = 0;
        while i < doomed.len() {
            if let Some(fragment) = self.fragments.get(&doomed[i]) {
                doomed.extend(fragment.children.iter().cloned());
            }
            i += 1;
        }
        debug!(fragment = %id, count = doomed.len(), "deleting subtree");
        for fid in &doomed {
            self.fragments.remove(fid);
            self.unit_scores.remove(fid);
        }

        match parent {
            Some(pid) => {
                if let Some(p) = self.fragments.get_mut(&pid) {
                    p.children.retain(|c| c != id);
                    p.updated_at = Utc::now();
                }
            }
            None => self.references.retain(|r| r != id),
        }
        Ok(())
    }

    /// Effective exchange value for a scenario, with default fallback.
    ///
    /// Fails with [`Error::Unobserved`] when neither the scenario nor the
    /// default observation carries a value; callers choose whether that
    /// aborts the traversal or is treated as zero flow.
    pub fn effective_exchange_value(&self, id: &str, scenario: &str) -> Result<f64> {
        let fragment = self.fragment(id)?;
        fragment
            .observation(scenario)
            .and_then(|obs| obs.exchange_value)
            .or_else(|| {
                fragment
                    .observation(DEFAULT_SCENARIO)
                    .and_then(|obs| obs.exchange_value)
            })
            .ok_or_else(|| Error::Unobserved {
                fragment: id.to_string(),
                scenario: scenario.to_string(),
            })
    }

    /// Effective anchor for a scenario, with default fallback.
    ///
    /// `None` is not an error; it designates a cutoff.
    pub fn effective_anchor(&self, id: &str, scenario: &str) -> Result<Option<&Anchor>> {
        let fragment = self.fragment(id)?;
        Ok(fragment
            .observation(scenario)
            .and_then(|obs| obs.anchor.as_ref())
            .or_else(|| {
                fragment
                    .observation(DEFAULT_SCENARIO)
                    .and_then(|obs| obs.anchor.as_ref())
            }))
    }

    /// Every scenario name observed anywhere in the graph, sorted, with the
    /// default key excluded.
    pub fn scenarios(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .fragments
            .values()
            .flat_map(|f| f.observations.keys())
            .filter(|name| name.as_str() != DEFAULT_SCENARIO)
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Cached unit impact score for (fragment, quantity, scenario).
    pub fn cached_unit_score(&self, id: &str, quantity_id: &str, scenario: &str) -> Option<f64> {
        self.unit_scores
            .get(id)
            .and_then(|m| m.get(&(quantity_id.to_string(), scenario.to_string())))
            .copied()
    }

    /// Store a computed unit impact score. Idempotent for identical inputs;
    /// last write wins.
    pub fn store_unit_score(&mut self, id: &str, quantity_id: &str, scenario: &str, score: f64) {
        self.unit_scores
            .entry(id.to_string())
            .or_default()
            .insert((quantity_id.to_string(), scenario.to_string()), score);
    }

    fn fragment_mut(&mut self, id: &str) -> Result<&mut Fragment> {
        self.fragments
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("Fragment not found: {}", id)))
    }

    /// Drop cached unit scores for `id` and every ancestor up to the root.
    ///
    /// Cached scores are per-fragment aggregates over the subtree, so a
    /// mutation anywhere below invalidates the whole path.
    fn invalidate_scores(&mut self, id: &str) {
        let mut cursor = Some(id.to_string());
        while let Some(fid) = cursor {
            self.unit_scores.remove(&fid);
            cursor = self.fragments.get(&fid).and_then(|f| f.parent.clone());
        }
    }
}

fn new_fragment_id() -> String {
    format!("fr-{}", Uuid::new_v4())
}
