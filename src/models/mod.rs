//! Entity and flow model for Tare.
//!
//! This module defines the immutable identity objects referenced by the
//! fragment graph:
//! - `Flow` - a material/energy/service type
//! - `Quantity` - a unit of measure or LCIA indicator
//! - `Context` - a hierarchical environmental compartment
//! - `ProcessRef` - a reference to a background process outside the graph
//!
//! These carry no traversal logic. Flows and quantities are shared by
//! reference (`Arc`) across many fragments and are never mutated after
//! creation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Direction of a flow, relative to the fragment's parent node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    /// The opposite direction.
    pub fn complement(self) -> Self {
        match self {
            Direction::Input => Direction::Output,
            Direction::Output => Direction::Input,
        }
    }

    /// Sign used by the balance solver: inputs positive, outputs negative.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Input => 1.0,
            Direction::Output => -1.0,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
        }
    }
}

/// A unit of measure or an LCIA impact indicator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    /// Unique reference identifier (e.g., "gwp-100")
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Reference unit (e.g., "kWh", "kg CO2-eq")
    pub ref_unit: String,

    /// Indicator metadata; present when this quantity is an LCIA indicator
    /// rather than a plain unit of measure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indicator: Option<String>,
}

impl Quantity {
    /// Create a plain unit-of-measure quantity.
    pub fn new(id: impl Into<String>, name: impl Into<String>, ref_unit: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ref_unit: ref_unit.into(),
            indicator: None,
        }
    }

    /// Create an LCIA indicator quantity.
    pub fn indicator(
        id: impl Into<String>,
        name: impl Into<String>,
        ref_unit: impl Into<String>,
        indicator: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ref_unit: ref_unit.into(),
            indicator: Some(indicator.into()),
        }
    }

    /// Whether this quantity is an LCIA indicator.
    pub fn is_lcia(&self) -> bool {
        self.indicator.is_some()
    }
}

/// A hierarchical environmental compartment (e.g., air -> urban air).
///
/// Contexts form a tree through their parent links; they are looked up by
/// name and compared structurally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    /// Compartment name (e.g., "urban air")
    pub name: String,

    /// Enclosing compartment; `None` for a top-level compartment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<Box<Context>>,
}

impl Context {
    /// Create a top-level compartment.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
        }
    }

    /// Create a subcompartment of `parent`.
    pub fn within(name: impl Into<String>, parent: Context) -> Self {
        Self {
            name: name.into(),
            parent: Some(Box::new(parent)),
        }
    }

    /// Whether this context equals `other` or sits anywhere below it.
    pub fn is_within(&self, other: &Context) -> bool {
        if self == other {
            return true;
        }
        match &self.parent {
            Some(parent) => parent.is_within(other),
            None => false,
        }
    }

    /// Full path from the top-level compartment down to this one.
    pub fn path(&self) -> Vec<&str> {
        let mut path = match &self.parent {
            Some(parent) => parent.path(),
            None => Vec::new(),
        };
        path.push(self.name.as_str());
        path
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.path().join(", "))
    }
}

/// Identity for a material, energy, or service type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    /// Unique reference identifier
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Id of the reference quantity (unit basis) for this flow
    pub ref_quantity: String,

    /// Default environmental context classification, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,
}

impl Flow {
    /// Create a flow with no default context.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        ref_quantity: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ref_quantity: ref_quantity.into(),
            context: None,
        }
    }

    /// Create an elementary flow classified under a context.
    pub fn elementary(
        id: impl Into<String>,
        name: impl Into<String>,
        ref_quantity: impl Into<String>,
        context: Context,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ref_quantity: ref_quantity.into(),
            context: Some(context),
        }
    }

    /// Wrap in an `Arc` for sharing across fragments.
    pub fn shared(self) -> Arc<Flow> {
        Arc::new(self)
    }
}

/// Reference to a background process resolved outside the fragment graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRef {
    /// Unique reference identifier in the catalog
    pub id: String,

    /// Human-readable name
    pub name: String,
}

impl ProcessRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}
