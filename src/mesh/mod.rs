//! The two mesh representations and the partition description.

pub mod adaptation;
pub mod partition;
pub mod solver;

pub use adaptation::AdaptationMesh;
pub use partition::{partition_by_element_blocks, PartitionedMesh};
pub use solver::SolverMesh;
