//! Anchor variants and their resolution.
//!
//! A fragment's anchor describes how its flow terminates: into an
//! environmental compartment, into another fragment tree (a sub-model), or
//! into a background process. A fragment with no anchor for the scenario in
//! effect (after default fallback) is a cutoff: the flow exits the system
//! boundary.

use std::sync::Arc;

use crate::Result;
use crate::graph::FragmentGraph;
use crate::models::{Context, ProcessRef};

/// Termination of a fragment's flow, as stored per scenario.
#[derive(Debug, Clone)]
pub enum Anchor {
    /// Elementary flow into an environmental compartment; terminal.
    Context(Arc<Context>),

    /// Anchored to another tree's reference fragment; triggers recursive
    /// traversal of that tree.
    Node(String),

    /// Anchored to a background process outside the fragment graph;
    /// terminal from this core's perspective. `exchange_value` is the
    /// amount of the fragment's flow delivered per unit activity of the
    /// process (process activity level = node weight / exchange_value).
    Process {
        process: ProcessRef,
        exchange_value: f64,
    },
}

impl Anchor {
    /// Anchor into an environmental compartment.
    pub fn context(ctx: Context) -> Self {
        Anchor::Context(Arc::new(ctx))
    }

    /// Anchor to another tree's reference fragment.
    pub fn node(fragment_id: impl Into<String>) -> Self {
        Anchor::Node(fragment_id.into())
    }

    /// Anchor to a background process with a unit exchange value.
    pub fn process(process: ProcessRef) -> Self {
        Anchor::Process {
            process,
            exchange_value: 1.0,
        }
    }

    /// Anchor to a background process delivering `exchange_value` units of
    /// the fragment's flow per unit process activity.
    pub fn process_scaled(process: ProcessRef, exchange_value: f64) -> Self {
        Anchor::Process {
            process,
            exchange_value,
        }
    }
}

/// Runtime classification of a fragment's termination under a scenario.
///
/// Mirrors [`Anchor`] plus the cutoff case (no anchor stored after
/// default-scenario fallback).
#[derive(Debug, Clone)]
pub enum AnchorResolution {
    /// No anchor: the flow exits the system boundary.
    Cutoff,

    /// Elementary flow into a compartment.
    Context(Arc<Context>),

    /// Recursion into the named tree's reference fragment.
    Node(String),

    /// Background process termination.
    Process {
        process: ProcessRef,
        exchange_value: f64,
    },
}

/// Resolve a fragment's termination for a scenario.
///
/// A pure read against current graph state: applies the default-scenario
/// fallback and classifies the stored anchor. Absence of any anchor is not
/// an error; it designates a cutoff.
pub fn resolve(graph: &FragmentGraph, fragment_id: &str, scenario: &str) -> Result<AnchorResolution> {
    let resolution = match graph.effective_anchor(fragment_id, scenario)? {
        None => AnchorResolution::Cutoff,
        Some(Anchor::Context(ctx)) => AnchorResolution::Context(Arc::clone(ctx)),
        Some(Anchor::Node(target)) => AnchorResolution::Node(target.clone()),
        Some(Anchor::Process {
            process,
            exchange_value,
        }) => AnchorResolution::Process {
            process: process.clone(),
            exchange_value: *exchange_value,
        },
    };
    Ok(resolution)
}
