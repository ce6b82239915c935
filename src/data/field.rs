//! Named vertex fields attached to an adaptation mesh.
//!
//! A [`Field`] stores a fixed number of components per vertex slot. Storage is
//! dense over vertex storage indices; slots of removed vertices keep stale
//! values that are never read through a live handle.

use crate::mesh_error::MeshAdaptError;
use crate::topology::dimension::EntityDim;
use crate::topology::handle::EntityHandle;

#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    name: String,
    components: usize,
    values: Vec<f64>,
}

impl Field {
    pub fn new(name: &str, components: usize, vertex_slots: usize) -> Self {
        Self {
            name: name.to_string(),
            components,
            values: vec![0.0; components * vertex_slots],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn components(&self) -> usize {
        self.components
    }

    /// Grow storage to cover `vertex_slots` slots, filling with zeros.
    pub(crate) fn ensure_slots(&mut self, vertex_slots: usize) {
        let needed = vertex_slots * self.components;
        if self.values.len() < needed {
            self.values.resize(needed, 0.0);
        }
    }

    fn range(&self, vertex: EntityHandle) -> Result<std::ops::Range<usize>, MeshAdaptError> {
        if vertex.dim() != EntityDim::Vertex {
            return Err(MeshAdaptError::MissingEntity(vertex));
        }
        let start = vertex.index() * self.components;
        let end = start + self.components;
        if end > self.values.len() {
            return Err(MeshAdaptError::MissingEntity(vertex));
        }
        Ok(start..end)
    }

    pub fn get(&self, vertex: EntityHandle) -> Result<&[f64], MeshAdaptError> {
        let range = self.range(vertex)?;
        Ok(&self.values[range])
    }

    pub fn set(&mut self, vertex: EntityHandle, value: &[f64]) -> Result<(), MeshAdaptError> {
        if value.len() != self.components {
            return Err(MeshAdaptError::ShapeMismatch {
                name: self.name.clone(),
                expected: self.components,
                found: value.len(),
            });
        }
        let range = self.range(vertex)?;
        self.values[range].copy_from_slice(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get_components() {
        let mut field = Field::new("velocity", 2, 3);
        let v2 = EntityHandle::new(EntityDim::Vertex, 2).unwrap();
        field.set(v2, &[1.5, -2.0]).unwrap();
        assert_eq!(field.get(v2).unwrap(), &[1.5, -2.0]);
        assert!(field.set(v2, &[1.0]).is_err());
    }

    #[test]
    fn rejects_non_vertex_and_out_of_range() {
        let field = Field::new("p", 1, 1);
        let e = EntityHandle::new(EntityDim::Edge, 1).unwrap();
        let v9 = EntityHandle::new(EntityDim::Vertex, 9).unwrap();
        assert!(field.get(e).is_err());
        assert!(field.get(v9).is_err());
    }
}
