//! The L3 graph & history engine (`spec.md` §4.3): the commit-DAG half of the layer (LCA search,
//! three-way commit merge, fast-forward detection, bounded traversal). The node-DAG half (node
//! closure/path navigation) already lives on [`strata_objects::NodeStore`] — [`NodeGraph`]
//! re-exports it under this crate's name for callers that think of the two halves as one layer,
//! mirroring how `dag::ops::DagAlgorithm` sits above a plain id/vertex map.

mod history;

pub use crate::history::HistoryEngine;
pub use crate::history::HistoryError;
pub use crate::history::TraversalBound;
pub use strata_objects::NodeStore as NodeGraph;
