//! Interfaces to the excluded subsystems.
//!
//! The engine never reaches into a catalog, a background LCI matrix, or a
//! quantity database directly. Background process results and
//! characterization factors arrive through these traits, dependency-injected
//! into traversal and LCIA so the core stays testable with in-memory fakes.

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::models::{Context, Direction, Flow, ProcessRef};

/// One exchange of a background process's per-unit-activity inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeLine {
    /// Flow crossing the system boundary
    pub flow_id: String,

    /// Environmental compartment, if the exchange is elementary
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,

    /// Direction relative to the process
    pub direction: Direction,

    /// Amount per unit process activity
    pub amount: f64,
}

/// Resolves `Process`-anchored fragments against the background system.
pub trait AnchorProvider {
    /// The intervention inventory of a background process per unit of
    /// activity, expressed relative to `ref_flow`.
    fn unit_inventory(&self, process: &ProcessRef, ref_flow: &Flow) -> Result<Vec<ExchangeLine>>;
}

/// Looks up characterization factors from the quantity database.
pub trait CharacterizationSource {
    /// Factor for a flow under an LCIA quantity, specific to an
    /// environmental context when one is given. `None` means no factor is
    /// available at that specificity; callers handle compartment fallback.
    fn factor(&self, flow_id: &str, quantity_id: &str, context: Option<&Context>) -> Option<f64>;
}
