//! Conversion, exchange and sizing algorithms.

pub mod communicator;
pub mod convert;
pub mod exchange;
pub mod field_transfer;
pub mod meshgen;
pub mod recovery;
pub mod size_field;
pub mod tagger;
pub mod wire;

pub use convert::{construct_from_parallel, construct_from_serial, construct_solver_mesh_back};
