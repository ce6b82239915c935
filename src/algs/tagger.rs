//! Material tag propagation between solver arrays and the adaptation mesh.
//!
//! Node materials tag vertices, element materials tag cells, and every
//! non-zero element-boundary material tags the boundary entity spanned by the
//! same vertices. Each array keeps its own [`Material`] label, so in 1-D a
//! vertex carries its node and boundary materials side by side. Values are
//! carried bit-exact in both directions.

use std::collections::{BTreeMap, HashSet};

use log::debug;

use crate::mesh::adaptation::AdaptationMesh;
use crate::mesh::solver::SolverMesh;
use crate::mesh_error::MeshAdaptError;
use crate::topology::dimension::EntityDim;
use crate::topology::handle::EntityHandle;
use crate::topology::labels::Material;

/// Attach solver materials to the entities converted from them. Idempotent.
///
/// Boundaries whose nodes are not all present in `mesh` (parts of a ghost
/// layer) are skipped; a boundary whose nodes are present but span no entity
/// is a [`MeshAdaptError::TagMismatch`].
pub fn apply(solver: &SolverMesh, mesh: &mut AdaptationMesh) -> Result<(), MeshAdaptError> {
    solver.check_shape().map_err(MeshAdaptError::Load)?;
    let boundary_dim = mesh
        .cell_dim()
        .boundary()
        .ok_or_else(|| MeshAdaptError::Conversion("mesh has no boundary dimension".into()))?;

    let vertex_of = mesh.vertices_by_source();
    let cells: Vec<(EntityHandle, usize)> = mesh
        .handles(mesh.cell_dim())
        .filter_map(|c| mesh.source_index(c).map(|e| (c, e)))
        .collect();

    // resolve boundary targets before touching any tag
    let mut boundary_tags = Vec::new();
    for b in 0..solver.n_element_boundaries() {
        let material = solver.element_boundary_material[b];
        if material == 0 {
            continue;
        }
        let Some(verts) = solver
            .boundary(b)
            .iter()
            .map(|n| vertex_of.get(n).copied())
            .collect::<Option<Vec<_>>>()
        else {
            continue;
        };
        let target = mesh
            .find(&verts)
            .filter(|h| h.dim() == boundary_dim)
            .ok_or(MeshAdaptError::TagMismatch {
                dim: boundary_dim,
                index: b,
                matches: 0,
            })?;
        boundary_tags.push((target, material));
    }

    for (&n, &v) in &vertex_of {
        let material = solver.node_material.get(n).copied().ok_or_else(|| {
            MeshAdaptError::Conversion(format!("vertex {v} comes from missing node {n}"))
        })?;
        mesh.set_tag(Material::Node, v, material)?;
    }
    for (c, e) in cells {
        let material = solver.element_material.get(e).copied().ok_or_else(|| {
            MeshAdaptError::Conversion(format!("cell {c} comes from missing element {e}"))
        })?;
        mesh.set_tag(Material::Element, c, material)?;
    }
    let n_boundary_tags = boundary_tags.len();
    for (target, material) in boundary_tags {
        mesh.set_tag(Material::Boundary, target, material)?;
    }
    debug!(
        "tagged {} vertices, {} cells, {n_boundary_tags} boundaries (materials {:?})",
        vertex_of.len(),
        mesh.count(mesh.cell_dim()),
        mesh.labels().stratum_values(Material::Boundary.label())
    );
    Ok(())
}

/// Copy entity tags onto a solver mesh rebuilt from `mesh`.
///
/// `solver` must come from
/// [`construct_solver_mesh_back`](crate::algs::convert::construct_solver_mesh_back)
/// on the same mesh: nodes and elements follow vertex and cell iteration order.
/// Untagged entities read as material 0.
pub fn restore_materials(solver: &mut SolverMesh, mesh: &AdaptationMesh) -> Result<(), MeshAdaptError> {
    let vertices = reconstructed_vertices(solver, mesh)?;
    solver.node_material = vertices
        .iter()
        .map(|&v| mesh.tag(Material::Node, v).unwrap_or(0))
        .collect();
    let cells: Vec<EntityHandle> = mesh.handles(mesh.cell_dim()).collect();
    if cells.len() != solver.n_elements() {
        return Err(MeshAdaptError::Reconstruction(format!(
            "{} cells for {} elements",
            cells.len(),
            solver.n_elements()
        )));
    }
    solver.element_material = cells
        .iter()
        .map(|&c| mesh.tag(Material::Element, c).unwrap_or(0))
        .collect();
    solver.element_boundary_material = (0..solver.n_element_boundaries())
        .map(|b| {
            boundary_entity(solver, &vertices, b, mesh)
                .and_then(|h| mesh.tag(Material::Boundary, h))
                .unwrap_or(0)
        })
        .collect();
    Ok(())
}

/// Stamp `boundary_id` on every solver boundary (and its nodes) whose
/// adaptation entity carries boundary material `model_tag`. Returns the
/// number of boundaries stamped.
pub fn update_material_arrays(
    solver: &mut SolverMesh,
    mesh: &AdaptationMesh,
    boundary_id: i32,
    model_tag: i32,
) -> Result<usize, MeshAdaptError> {
    let vertices = reconstructed_vertices(solver, mesh)?;
    if solver.element_boundary_material.len() != solver.n_element_boundaries()
        || solver.node_material.len() != solver.n_nodes()
    {
        return Err(MeshAdaptError::Reconstruction(
            "material arrays do not match the rebuilt mesh".into(),
        ));
    }
    let carriers: HashSet<EntityHandle> = mesh
        .labels()
        .stratum_points(Material::Boundary.label(), model_tag)
        .into_iter()
        .collect();
    let mut stamped = 0;
    for b in 0..solver.n_element_boundaries() {
        let tagged = boundary_entity(solver, &vertices, b, mesh).is_some_and(|h| carriers.contains(&h));
        if tagged {
            solver.element_boundary_material[b] = boundary_id;
            let nodes = solver.boundary(b).to_vec();
            for n in nodes {
                solver.node_material[n] = boundary_id;
            }
            stamped += 1;
        }
    }
    Ok(stamped)
}

fn reconstructed_vertices(
    solver: &SolverMesh,
    mesh: &AdaptationMesh,
) -> Result<Vec<EntityHandle>, MeshAdaptError> {
    let vertices: Vec<EntityHandle> = mesh.handles(EntityDim::Vertex).collect();
    if vertices.len() != solver.n_nodes() {
        return Err(MeshAdaptError::Reconstruction(format!(
            "{} vertices for {} nodes",
            vertices.len(),
            solver.n_nodes()
        )));
    }
    Ok(vertices)
}

fn boundary_entity(
    solver: &SolverMesh,
    vertices: &[EntityHandle],
    b: usize,
    mesh: &AdaptationMesh,
) -> Option<EntityHandle> {
    let verts: Vec<EntityHandle> = solver.boundary(b).iter().map(|&n| vertices[n]).collect();
    mesh.find(&verts)
}

/// Every material tag keyed by label name and handle, for comparing two
/// tagging passes.
pub fn tag_snapshot(mesh: &AdaptationMesh) -> BTreeMap<(String, EntityHandle), i32> {
    mesh.labels()
        .iter()
        .map(|(name, h, t)| ((name.to_string(), h), t))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::convert::{construct_from_serial, construct_solver_mesh_back};
    use crate::algs::meshgen;

    fn tagged_rectangle() -> SolverMesh {
        let mut solver = meshgen::rectangle(2, 2, [0.0, 0.0], [1.0, 1.0]).unwrap();
        solver.element_material = (0..solver.n_elements() as i32).map(|e| e % 3 + 1).collect();
        solver.node_material[4] = 9;
        let b = solver.exterior_boundaries[0];
        solver.element_boundary_material[b] = -7;
        solver
    }

    #[test]
    fn tags_survive_round_trip() {
        let solver = tagged_rectangle();
        let mut mesh = construct_from_serial(&solver).unwrap();
        apply(&solver, &mut mesh).unwrap();
        let mut back = construct_solver_mesh_back(&mesh).unwrap();
        restore_materials(&mut back, &mesh).unwrap();
        assert_eq!(back.node_material, solver.node_material);
        assert_eq!(back.element_material, solver.element_material);
        assert_eq!(back.element_boundary_material, solver.element_boundary_material);
    }

    #[test]
    fn line_keeps_node_and_boundary_materials_apart() {
        // in 1-D boundary b is the single node `solver.boundary(b)[0]`
        let mut solver = meshgen::line(4, 0.0, 1.0).unwrap();
        solver.node_material[0] = 1;
        let b = (0..solver.n_element_boundaries())
            .find(|&b| solver.boundary(b) == [0])
            .unwrap();
        solver.element_boundary_material[b] = 2;
        solver.element_material = vec![3, 3, 4, 4];

        let mut mesh = construct_from_serial(&solver).unwrap();
        apply(&solver, &mut mesh).unwrap();
        let mut back = construct_solver_mesh_back(&mesh).unwrap();
        restore_materials(&mut back, &mesh).unwrap();
        assert_eq!(back.node_material, vec![1, 0, 0, 0, 0]);
        assert_eq!(back.element_material, solver.element_material);
        assert_eq!(back.element_boundary_material, solver.element_boundary_material);
    }

    #[test]
    fn stamping_boundary_ids() {
        let solver = tagged_rectangle();
        let mut mesh = construct_from_serial(&solver).unwrap();
        apply(&solver, &mut mesh).unwrap();
        let mut back = construct_solver_mesh_back(&mesh).unwrap();
        restore_materials(&mut back, &mesh).unwrap();
        let stamped = update_material_arrays(&mut back, &mesh, 42, -7).unwrap();
        assert_eq!(stamped, 1);
        let b = back.exterior_boundaries[0];
        assert_eq!(back.element_boundary_material[b], 42);
        for &n in back.boundary(b) {
            assert_eq!(back.node_material[n], 42);
        }
    }
}
