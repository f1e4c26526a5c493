//! Per-node conservation solving for balance-flagged fragments.
//!
//! A node may designate one child as its balance flow. During traversal that
//! child's intensive exchange value is derived so that the signed sum of all
//! child values at the node is zero.
//!
//! Sign convention: inputs are positive, outputs negative (see
//! [`Direction::sign`]). A balance-flagged output therefore absorbs surplus
//! inputs, and a balance-flagged input covers a deficit. A solved value may
//! come out negative; that is surfaced as-is and left to modeling QA.

use crate::models::Direction;
use crate::{Error, Result};

/// Derive the balance child's intensive exchange value from the resolved
/// values of its non-balance siblings.
///
/// `resolved` holds `(direction, intensive value)` for every other child of
/// the node. The returned value closes the conservation equation
/// `sum(sign(direction) * value) == 0` over all children.
pub fn solve_balance(resolved: &[(Direction, f64)], balance_direction: Direction) -> f64 {
    let residual: f64 = resolved.iter().map(|(d, v)| d.sign() * v).sum();
    -residual / balance_direction.sign()
}

/// Find the single balance-flagged child among `children`, if any.
///
/// More than one balance designation at a node is contradictory; fail fast
/// with [`Error::MultipleBalanceFlows`] rather than guessing which child
/// closes the conservation law.
pub fn balance_child<'a, I>(node_id: &str, children: I) -> Result<Option<&'a str>>
where
    I: IntoIterator<Item = (&'a str, bool)>,
{
    let mut found = None;
    for (id, is_balance) in children {
        if is_balance {
            if found.is_some() {
                return Err(Error::MultipleBalanceFlows(node_id.to_string()));
            }
            found = Some(id);
        }
    }
    Ok(found)
}
