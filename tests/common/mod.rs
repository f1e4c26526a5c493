//! Shared fixtures for Tare integration tests.
//!
//! Provides in-memory fakes for the external collaborators (background
//! process inventories, characterization factors) plus small helpers used
//! across the suites.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use tare::Result;
use tare::models::{Context, Flow, ProcessRef, Quantity};
use tare::providers::{AnchorProvider, CharacterizationSource, ExchangeLine};

/// Assert two floats agree within 1e-9 relative tolerance.
pub fn assert_close(actual: f64, expected: f64) {
    let tolerance = 1e-9 * expected.abs().max(1.0);
    assert!(
        (actual - expected).abs() <= tolerance,
        "expected {expected}, got {actual}"
    );
}

/// The GWP indicator used across the suites.
pub fn gwp() -> Quantity {
    Quantity::indicator("gwp-100", "GWP 100a", "kg CO2-eq", "climate change")
}

pub fn flow(id: &str, name: &str) -> Arc<Flow> {
    Flow::new(id, name, "unit").shared()
}

pub fn air() -> Context {
    Context::new("air")
}

/// In-memory background database keyed by process id.
#[derive(Default)]
pub struct FakeBackground {
    inventories: HashMap<String, Vec<ExchangeLine>>,
}

impl FakeBackground {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_inventory(mut self, process_id: &str, lines: Vec<ExchangeLine>) -> Self {
        self.inventories.insert(process_id.to_string(), lines);
        self
    }
}

impl AnchorProvider for FakeBackground {
    fn unit_inventory(&self, process: &ProcessRef, _ref_flow: &Flow) -> Result<Vec<ExchangeLine>> {
        Ok(self
            .inventories
            .get(&process.id)
            .cloned()
            .unwrap_or_default())
    }
}

/// In-memory factor table keyed by flow id, context-insensitive.
#[derive(Default)]
pub struct FakeFactors {
    factors: HashMap<String, f64>,
}

impl FakeFactors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, flow_id: &str, factor: f64) -> Self {
        self.factors.insert(flow_id.to_string(), factor);
        self
    }
}

impl CharacterizationSource for FakeFactors {
    fn factor(&self, flow_id: &str, _quantity_id: &str, _context: Option<&Context>) -> Option<f64> {
        self.factors.get(flow_id).copied()
    }
}
