//! Field transfer between solver buffers and adaptation-mesh vertex fields.
//!
//! Solver buffers are node-major: `buffer[node * n_var + var]`. On the way in,
//! each vertex takes the values of the solver node it was converted from; on
//! the way out, nodes follow vertex iteration order, matching
//! [`construct_solver_mesh_back`](crate::algs::convert::construct_solver_mesh_back).

use log::trace;

use crate::mesh::adaptation::AdaptationMesh;
use crate::mesh_error::MeshAdaptError;
use crate::topology::dimension::EntityDim;

/// Copy a solver buffer onto the mesh as vertex field `name`.
///
/// `n_nodes` must be the length of the solver node array the mesh was built
/// from and `buffer` must hold exactly `n_var * n_nodes` values; nothing is
/// attached on failure.
pub fn to_adaptation(
    mesh: &mut AdaptationMesh,
    name: &str,
    buffer: &[f64],
    n_var: usize,
    n_nodes: usize,
) -> Result<(), MeshAdaptError> {
    let expected_nodes = match mesh.source_node_count() {
        0 => mesh.count(EntityDim::Vertex),
        n => n,
    };
    if n_nodes != expected_nodes {
        return Err(MeshAdaptError::ShapeMismatch {
            name: name.to_string(),
            expected: expected_nodes,
            found: n_nodes,
        });
    }
    let expected = n_var.checked_mul(n_nodes);
    if n_var == 0 || expected != Some(buffer.len()) {
        return Err(MeshAdaptError::ShapeMismatch {
            name: name.to_string(),
            expected: expected.unwrap_or(usize::MAX),
            found: buffer.len(),
        });
    }

    let mut rows = Vec::with_capacity(mesh.count(EntityDim::Vertex));
    for (pos, v) in mesh.handles(EntityDim::Vertex).enumerate() {
        let node = mesh.source_index(v).unwrap_or(pos);
        if node >= n_nodes {
            return Err(MeshAdaptError::ShapeMismatch {
                name: name.to_string(),
                expected: n_nodes,
                found: node + 1,
            });
        }
        rows.push((v, node));
    }

    let field = mesh.attach_field(name, n_var);
    for (v, node) in rows {
        field.set(v, &buffer[node * n_var..(node + 1) * n_var])?;
    }
    trace!("field `{name}`: {n_nodes} nodes x {n_var} in");
    Ok(())
}

/// Read vertex field `name` back into a node-major buffer; returns the buffer
/// and its component count.
pub fn to_solver(mesh: &AdaptationMesh, name: &str) -> Result<(Vec<f64>, usize), MeshAdaptError> {
    let field = mesh.field(name).ok_or_else(|| {
        MeshAdaptError::Reconstruction(format!("no vertex field named `{name}`"))
    })?;
    let n_var = field.components();
    let mut buffer = Vec::with_capacity(n_var * mesh.count(EntityDim::Vertex));
    for v in mesh.handles(EntityDim::Vertex) {
        buffer.extend_from_slice(field.get(v)?);
    }
    Ok((buffer, n_var))
}
