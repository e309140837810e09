//! Dependency-graph execution.
//!
//! A `DagStep` holds named `DagNode`s. Construction validates the graph and
//! fixes a topological order; execution dispatches every node the moment its
//! last dependency completes, so independent nodes run concurrently. Timing
//! per node feeds the critical-path figure reported alongside the result.

pub mod executor;
pub mod node;
pub mod scheduler;

pub use executor::{DagReport, DagStep, NodeResult};
pub use node::DagNode;
pub use scheduler::{critical_path, DagPlan};
