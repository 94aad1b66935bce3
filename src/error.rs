//! [`Error`]: the facade's aggregate error type — conflict, invalid argument, backend I/O, and
//! traversal bounds each get their own variant. "Not found" and "concurrent update" are *not*
//! variants here: those travel as plain values (`Option::None`, `bool`) everywhere except the
//! `get`/`get_head` family, which this module's [`Error::InvalidArgument`] backs.

use strata_graph::TraversalBound;
use strata_objects::BranchName;
use strata_objects::Conflict;

/// Aggregates every child crate's error type the way `mononoke_types::MononokeTypeError` and
/// friends are aggregated by call sites using `anyhow`, except here the aggregation is a typed
/// `thiserror` enum so library callers can match on it instead of downcasting.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("backend I/O error: {0}")]
    Store(#[from] strata_store::Error),

    #[error(transparent)]
    Node(#[from] strata_objects::NodeError),

    #[error("tree error: {0}")]
    Tree(#[from] strata_tree::TreeError),

    #[error(transparent)]
    History(#[from] strata_graph::HistoryError),

    #[error(transparent)]
    Conflict(#[from] Conflict),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("branch {0} not found")]
    BranchNotFound(BranchName),

    #[error("branch {0} already exists")]
    BranchAlreadyExists(BranchName),

    #[error("concurrent update: branch head changed before this write could apply")]
    ConcurrentUpdate,
}

impl Error {
    /// Traversal bounds (`max-depth-reached`, `too-many-lcas`) are returned as values, not errors,
    /// at the engine layer; at the facade boundary they still have to travel through a `Result`
    /// (there's no other channel), so this extracts the underlying [`TraversalBound`] back out for
    /// callers that want to match on it without a second `Err` variant shadowing `History`.
    pub fn traversal_bound(&self) -> Option<TraversalBound> {
        match self {
            Error::History(strata_graph::HistoryError::Bounded(bound)) => Some(*bound),
            _ => None,
        }
    }

    /// Whether this error is the result of a caller-supplied `CancellationToken` firing mid
    /// traversal: on cancellation an operation releases its locks and returns an aborted error
    /// rather than leaving partial state behind.
    pub fn is_aborted(&self) -> bool {
        matches!(
            self,
            Error::History(strata_graph::HistoryError::Aborted) | Error::Node(strata_objects::NodeError::Aborted)
        )
    }
}
