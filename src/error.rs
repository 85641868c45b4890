use thiserror::Error;

/// A structural defect found by [`AvlTree::validate`].
///
/// Keys are rendered with their `Debug` implementation.
///
/// [`AvlTree::validate`]: crate::AvlTree::validate
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("root node {key} has a parent link")]
    RootHasParent { key: String },

    #[error("child {child} of node {parent} does not link back to its parent")]
    ParentMismatch { parent: String, child: String },

    #[error("keys out of order: {prev} is not less than {next}")]
    OutOfOrder { prev: String, next: String },

    #[error("node {key} stores balance {stored}, but its subtree heights differ by {actual}")]
    BalanceMismatch { key: String, stored: i8, actual: isize },

    #[error("node {key} has balance {balance}, outside of -1..=1")]
    Unbalanced { key: String, balance: i8 },

    #[error("tree reports {expected} elements, but {found} are reachable from the root")]
    LenMismatch { expected: usize, found: usize },
}
