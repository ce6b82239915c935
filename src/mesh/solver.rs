//! Solver-side mesh arrays.
//!
//! [`SolverMesh`] mirrors the flat arrays a finite-element solver keeps for a
//! simplicial mesh: coordinates, element-node connectivity, and the derived
//! element-boundary, adjacency and edge tables. Boundaries follow the
//! opposite-vertex convention of [`simplex::boundaries`].
//!
//! The derived tables are always rebuilt from `element_nodes` by
//! [`SolverMesh::rebuild_topology`], so a mesh assembled by
//! [`SolverMesh::from_elements`] and one reconstructed from an adaptation mesh
//! agree on boundary numbering when their elements agree.

use std::collections::HashMap;

use crate::mesh_error::MeshAdaptError;
use crate::topology::dimension::EntityDim;
use crate::topology::simplex;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SolverMesh {
    /// Number of meaningful coordinate components (1..=3).
    pub n_space_dim: usize,
    /// Nodes per element: 2 (segments), 3 (triangles) or 4 (tetrahedra).
    pub nodes_per_element: usize,
    /// Node coordinates, padded with zeros beyond `n_space_dim`.
    pub node_coords: Vec<[f64; 3]>,
    /// Flat element-node connectivity, `nodes_per_element` entries per element.
    pub element_nodes: Vec<usize>,
    /// Flat element adjacency across each local boundary (`None` on the exterior).
    pub element_neighbors: Vec<Option<usize>>,
    /// Flat element → element-boundary table.
    pub element_boundaries: Vec<usize>,
    /// Flat element-boundary node connectivity.
    pub element_boundary_nodes: Vec<usize>,
    /// Left/right elements of each element boundary.
    pub element_boundary_elements: Vec<[Option<usize>; 2]>,
    pub interior_boundaries: Vec<usize>,
    pub exterior_boundaries: Vec<usize>,
    pub edge_nodes: Vec<[usize; 2]>,
    pub node_material: Vec<i32>,
    pub element_material: Vec<i32>,
    pub element_boundary_material: Vec<i32>,
}

impl SolverMesh {
    /// Build a mesh from coordinates and connectivity; derived tables are
    /// computed and all materials start at zero.
    pub fn from_elements(
        n_space_dim: usize,
        node_coords: Vec<[f64; 3]>,
        element_nodes: Vec<usize>,
        nodes_per_element: usize,
    ) -> Result<Self, MeshAdaptError> {
        let mut mesh = SolverMesh {
            n_space_dim,
            nodes_per_element,
            node_coords,
            element_nodes,
            ..Default::default()
        };
        mesh.check_connectivity()
            .map_err(MeshAdaptError::Conversion)?;
        mesh.rebuild_topology();
        Ok(mesh)
    }

    /// Dimension of the elements.
    pub fn cell_dim(&self) -> Option<EntityDim> {
        simplex::cell_dim_for_nodes(self.nodes_per_element)
    }

    pub fn n_nodes(&self) -> usize {
        self.node_coords.len()
    }

    pub fn n_elements(&self) -> usize {
        if self.nodes_per_element == 0 {
            0
        } else {
            self.element_nodes.len() / self.nodes_per_element
        }
    }

    pub fn n_element_boundaries(&self) -> usize {
        self.element_boundary_elements.len()
    }

    pub fn nodes_per_boundary(&self) -> usize {
        self.nodes_per_element.saturating_sub(1)
    }

    pub fn boundaries_per_element(&self) -> usize {
        self.nodes_per_element
    }

    /// Nodes of element `e`.
    pub fn element(&self, e: usize) -> &[usize] {
        let n = self.nodes_per_element;
        &self.element_nodes[e * n..(e + 1) * n]
    }

    /// Nodes of element boundary `b`.
    pub fn boundary(&self, b: usize) -> &[usize] {
        let n = self.nodes_per_boundary();
        &self.element_boundary_nodes[b * n..(b + 1) * n]
    }

    /// Check that connectivity is rectangular and every index is in range.
    pub fn check_connectivity(&self) -> Result<(), String> {
        if !(1..=3).contains(&self.n_space_dim) {
            return Err(format!("space dimension {} not in 1..=3", self.n_space_dim));
        }
        let cell = self.cell_dim().ok_or_else(|| {
            format!(
                "{} nodes per element is not a simplex",
                self.nodes_per_element
            )
        })?;
        if cell.index() > self.n_space_dim {
            return Err(format!(
                "{cell:?} elements cannot live in {} space dimensions",
                self.n_space_dim
            ));
        }
        if self.element_nodes.len() % self.nodes_per_element != 0 {
            return Err(format!(
                "element connectivity length {} is not a multiple of {}",
                self.element_nodes.len(),
                self.nodes_per_element
            ));
        }
        let n_nodes = self.n_nodes();
        if let Some(pos) = self.element_nodes.iter().position(|&n| n >= n_nodes) {
            return Err(format!(
                "element {} references node {} but the mesh has {n_nodes} nodes",
                pos / self.nodes_per_element,
                self.element_nodes[pos]
            ));
        }
        Ok(())
    }

    /// Check array lengths of the derived and material tables.
    pub fn check_shape(&self) -> Result<(), String> {
        self.check_connectivity()?;
        let n_el = self.n_elements();
        let n_bdy = self.n_element_boundaries();
        let checks = [
            ("element_neighbors", self.element_neighbors.len(), n_el * self.boundaries_per_element()),
            ("element_boundaries", self.element_boundaries.len(), n_el * self.boundaries_per_element()),
            ("element_boundary_nodes", self.element_boundary_nodes.len(), n_bdy * self.nodes_per_boundary()),
            ("node_material", self.node_material.len(), self.n_nodes()),
            ("element_material", self.element_material.len(), n_el),
            ("element_boundary_material", self.element_boundary_material.len(), n_bdy),
        ];
        for (name, found, expected) in checks {
            if found != expected {
                return Err(format!("{name} has {found} entries, expected {expected}"));
            }
        }
        if let Some(&b) = self.element_boundaries.iter().find(|&&b| b >= n_bdy) {
            return Err(format!("element boundary {b} out of range ({n_bdy} boundaries)"));
        }
        if let Some(&n) = self.element_boundary_nodes.iter().find(|&&n| n >= self.n_nodes()) {
            return Err(format!("boundary node {n} out of range"));
        }
        Ok(())
    }

    /// Recompute boundaries, adjacency and edges from `element_nodes`.
    ///
    /// Boundaries and edges are numbered in first-seen order while walking
    /// elements in order and their local sub-entities in template order.
    /// Material arrays are resized with zeros where their length no longer
    /// matches.
    pub fn rebuild_topology(&mut self) {
        let Some(cell) = self.cell_dim() else {
            return;
        };
        let n_el = self.n_elements();
        let templates = simplex::boundaries(cell);
        let nb = templates.len();

        self.element_boundaries = vec![0; n_el * nb];
        self.element_neighbors = vec![None; n_el * nb];
        self.element_boundary_nodes.clear();
        self.element_boundary_elements.clear();

        let mut boundary_of: HashMap<Vec<usize>, usize> = HashMap::new();
        for e in 0..n_el {
            for (i, local) in templates.iter().enumerate() {
                let nodes: Vec<usize> = local.iter().map(|&l| self.element(e)[l]).collect();
                let mut key = nodes.clone();
                key.sort_unstable();
                let b = match boundary_of.get(&key) {
                    Some(&b) => {
                        self.element_boundary_elements[b][1] = Some(e);
                        b
                    }
                    None => {
                        let b = self.element_boundary_elements.len();
                        boundary_of.insert(key, b);
                        self.element_boundary_nodes.extend_from_slice(&nodes);
                        self.element_boundary_elements.push([Some(e), None]);
                        b
                    }
                };
                self.element_boundaries[e * nb + i] = b;
            }
        }

        for e in 0..n_el {
            for i in 0..nb {
                let b = self.element_boundaries[e * nb + i];
                let [left, right] = self.element_boundary_elements[b];
                self.element_neighbors[e * nb + i] = if left == Some(e) { right } else { left };
            }
        }

        self.interior_boundaries.clear();
        self.exterior_boundaries.clear();
        for (b, [_, right]) in self.element_boundary_elements.iter().enumerate() {
            if right.is_some() {
                self.interior_boundaries.push(b);
            } else {
                self.exterior_boundaries.push(b);
            }
        }

        self.edge_nodes.clear();
        let mut seen_edges: HashMap<[usize; 2], usize> = HashMap::new();
        for e in 0..n_el {
            for [a, b] in simplex::edges(cell) {
                let edge = [self.element(e)[*a], self.element(e)[*b]];
                let key = [edge[0].min(edge[1]), edge[0].max(edge[1])];
                if !seen_edges.contains_key(&key) {
                    seen_edges.insert(key, self.edge_nodes.len());
                    self.edge_nodes.push(edge);
                }
            }
        }

        let n_bdy = self.n_element_boundaries();
        if self.node_material.len() != self.n_nodes() {
            self.node_material = vec![0; self.n_nodes()];
        }
        if self.element_material.len() != n_el {
            self.element_material = vec![0; n_el];
        }
        if self.element_boundary_material.len() != n_bdy {
            self.element_boundary_material = vec![0; n_bdy];
        }
    }

    /// Index of the boundary with exactly the given nodes, if any.
    pub fn find_boundary(&self, nodes: &[usize]) -> Option<usize> {
        let mut key = nodes.to_vec();
        key.sort_unstable();
        (0..self.n_element_boundaries()).find(|&b| {
            let mut cand = self.boundary(b).to_vec();
            cand.sort_unstable();
            cand == key
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_triangles() -> SolverMesh {
        let coords = vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [0.0, 1.0, 0.0],
        ];
        SolverMesh::from_elements(2, coords, vec![0, 1, 2, 0, 2, 3], 3).unwrap()
    }

    #[test]
    fn derived_tables_for_two_triangles() {
        let mesh = two_triangles();
        assert_eq!(mesh.n_elements(), 2);
        assert_eq!(mesh.n_element_boundaries(), 5);
        assert_eq!(mesh.interior_boundaries.len(), 1);
        assert_eq!(mesh.exterior_boundaries.len(), 4);
        assert_eq!(mesh.edge_nodes.len(), 5);
        // boundary 1 of element 0 is opposite node 1: nodes (0, 2), shared with element 1
        assert_eq!(mesh.element_neighbors[1], Some(1));
        assert_eq!(mesh.element_neighbors[3 + 2], Some(0));
        assert!(mesh.check_shape().is_ok());
    }

    #[test]
    fn out_of_range_node_is_rejected() {
        let err = SolverMesh::from_elements(1, vec![[0.0; 3]; 2], vec![0, 2], 2).unwrap_err();
        assert!(matches!(err, MeshAdaptError::Conversion(_)));
    }

    #[test]
    fn find_boundary_ignores_order() {
        let mesh = two_triangles();
        let b = mesh.find_boundary(&[2, 0]).unwrap();
        assert!(mesh.interior_boundaries.contains(&b));
        assert_eq!(mesh.find_boundary(&[1, 3]), None);
    }

    #[test]
    fn shape_check_catches_material_length() {
        let mut mesh = two_triangles();
        mesh.node_material.pop();
        assert!(mesh.check_shape().is_err());
    }
}
