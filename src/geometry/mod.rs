//! Geometry utilities for simplicial cells.

pub mod metrics;
