//! Adaptive-meshing engines.
//!
//! An [`AdaptEngine`] mutates an [`AdaptationMesh`] in place so its edge
//! lengths follow a [`SizeField`]. Engines interpolate every attached vertex
//! field onto the vertices they create and keep cell and boundary tags on the
//! entities they preserve or split.

pub mod line_remesher;

use serde::{Deserialize, Serialize};

use crate::data::size_field::SizeField;
use crate::mesh::adaptation::AdaptationMesh;
use crate::topology::dimension::EntityDim;

pub use line_remesher::LineRemesher;

pub trait AdaptEngine {
    fn name(&self) -> &str;

    /// Adapt `mesh` to `size_field`; the error is a human-readable reason.
    fn adapt(&mut self, mesh: &mut AdaptationMesh, size_field: &SizeField) -> Result<AdaptReport, String>;
}

impl<E: AdaptEngine + ?Sized> AdaptEngine for Box<E> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn adapt(&mut self, mesh: &mut AdaptationMesh, size_field: &SizeField) -> Result<AdaptReport, String> {
        (**self).adapt(mesh, size_field)
    }
}

/// Entity counts around one engine run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdaptReport {
    pub vertices_before: usize,
    pub vertices_after: usize,
    pub cells_before: usize,
    pub cells_after: usize,
    pub vertices_created: usize,
    pub vertices_removed: usize,
}

impl AdaptReport {
    /// Report with the "before" counts of `mesh` filled in.
    pub fn start(mesh: &AdaptationMesh) -> Self {
        Self {
            vertices_before: mesh.count(EntityDim::Vertex),
            cells_before: mesh.count(mesh.cell_dim()),
            ..Default::default()
        }
    }

    /// Fill in the "after" counts.
    pub fn finish(mut self, mesh: &AdaptationMesh) -> Self {
        self.vertices_after = mesh.count(EntityDim::Vertex);
        self.cells_after = mesh.count(mesh.cell_dim());
        self
    }
}
