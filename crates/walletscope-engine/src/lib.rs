//! Analysis passes over the walletscope identity graph.
//!
//! Three batch passes, each taking a [`GraphStore`] snapshot for the
//! duration of its run: the common-ownership cluster builder, the
//! confidence-decay label propagator, and the conflict resolver. The
//! passes are single-writer; callers must not run them concurrently
//! with each other or with relationship writes.

pub mod cleanup;
pub mod cluster;
pub mod error;
pub mod params;
pub mod propagate;
pub mod reassess;
mod unionfind;

pub use cleanup::{CleanupReport, run_cleanup};
pub use cluster::{ClusterReport, TransferObservation, run_clustering};
pub use error::{Error, Result};
pub use params::EngineParams;
pub use propagate::{PropagationReport, run_propagation};
pub use reassess::reassess_entity;

#[cfg(test)]
mod tests;
