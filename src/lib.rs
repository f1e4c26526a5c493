//! Tare - a fragment-based life cycle assessment engine.
//!
//! This library implements the computational core of an LCA product-modeling
//! system: a scenario-parameterized fragment graph, the recursive traversal
//! that turns it into an activity report and a cutoff inventory, and the
//! impact aggregation (LCIA) that scores the traversal against a quantity's
//! characterization factors.
//!
//! The crate is a library-level engine. Storage, catalog resolution,
//! background matrix construction, and any UI are collaborators behind the
//! narrow traits in [`providers`].

pub mod balance;
pub mod graph;
pub mod lcia;
pub mod models;
pub mod providers;
pub mod traversal;

/// Library-level error type for Tare operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No exchange value observed for the scenario, after default fallback.
    /// Recoverable: callers pick a policy (abort, or treat as zero flow).
    #[error("Fragment {fragment} has no observed exchange value under scenario '{scenario}'")]
    Unobserved { fragment: String, scenario: String },

    /// The reference fragment itself carries no magnitude, so the traversal
    /// has no starting node weight.
    #[error("Reference fragment {fragment} has no observed magnitude under scenario '{scenario}'")]
    UnobservedReference { fragment: String, scenario: String },

    #[error("Fragment {0} is balance-flagged; its exchange value is derived, not observed")]
    ObservedBalanceFlow(String),

    #[error("Node {0} has more than one balance-flagged child")]
    MultipleBalanceFlows(String),

    /// Anchors formed a cycle across model boundaries. The path lists the
    /// reference fragments on the active recursion stack, ending with the
    /// repeated one.
    #[error("Circular anchor reference: {}", path.join(" -> "))]
    CircularAnchor { path: Vec<String> },

    #[error("Traversal cancelled")]
    TraversalCancelled,

    #[error("No characterization factor for flow {flow} under quantity {quantity}")]
    CharacterizationMissing { flow: String, quantity: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for Tare operations.
pub type Result<T> = std::result::Result<T, Error>;
