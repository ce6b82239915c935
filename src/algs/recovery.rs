//! Least-squares derivative recovery on vertex neighborhoods.
//!
//! Gradients come from a linear fit of `u(x_n) - u(x_v)` over the neighbors
//! of `v`; Hessians from a quadratic fit. Fits use only the first
//! `space_dim` coordinates, with columns scaled to unit max norm before the
//! SVD solve.

use std::collections::{BTreeMap, BTreeSet};

use nalgebra::{DMatrix, DVector, Matrix3, Vector3};

use crate::mesh::adaptation::AdaptationMesh;
use crate::mesh_error::MeshAdaptError;
use crate::topology::dimension::EntityDim;
use crate::topology::handle::EntityHandle;

/// Fits whose scaled singular values spread more than this are rejected.
const MAX_CONDITION: f64 = 1e10;

pub type Neighborhoods = BTreeMap<EntityHandle, BTreeSet<EntityHandle>>;

/// One component of a vertex field, read for every live vertex.
pub fn field_values(
    mesh: &AdaptationMesh,
    name: &str,
    component: usize,
) -> Result<BTreeMap<EntityHandle, f64>, MeshAdaptError> {
    let field = mesh
        .field(name)
        .ok_or_else(|| MeshAdaptError::SizeField(format!("no vertex field named `{name}`")))?;
    if component >= field.components() {
        return Err(MeshAdaptError::SizeField(format!(
            "field `{name}` has {} components, asked for {component}",
            field.components()
        )));
    }
    mesh.handles(EntityDim::Vertex)
        .map(|v| Ok((v, field.get(v)?[component])))
        .collect()
}

/// Least-squares gradient at every vertex; vertices without neighbors get zero.
pub fn gradients(
    mesh: &AdaptationMesh,
    values: &BTreeMap<EntityHandle, f64>,
    neighbors: &Neighborhoods,
) -> Result<BTreeMap<EntityHandle, Vector3<f64>>, MeshAdaptError> {
    let d = mesh.space_dim();
    let mut out = BTreeMap::new();
    for (&v, nbrs) in neighbors {
        let xv = mesh.point(v)?;
        let uv = value(values, v)?;
        let mut a = DMatrix::zeros(nbrs.len(), d);
        let mut b = DVector::zeros(nbrs.len());
        for (row, &n) in nbrs.iter().enumerate() {
            let xn = mesh.point(n)?;
            for k in 0..d {
                a[(row, k)] = xn[k] - xv[k];
            }
            b[row] = value(values, n)? - uv;
        }
        let g = solve_scaled(a, b).unwrap_or_else(|| DVector::zeros(d));
        let mut grad = Vector3::zeros();
        for k in 0..d {
            grad[k] = g[k];
        }
        out.insert(v, grad);
    }
    Ok(out)
}

/// Quadratic-fit Hessian at `v`, or `None` when the fit is under-determined
/// or ill-conditioned. Uses the 1-ring, widened to the 2-ring when the 1-ring
/// has too few points.
pub fn hessian_at(
    mesh: &AdaptationMesh,
    values: &BTreeMap<EntityHandle, f64>,
    neighbors: &Neighborhoods,
    v: EntityHandle,
) -> Result<Option<Matrix3<f64>>, MeshAdaptError> {
    let d = mesh.space_dim();
    let n_quad = d * (d + 1) / 2;
    let n_unknowns = d + n_quad;

    let mut stencil: BTreeSet<EntityHandle> = neighbors.get(&v).cloned().unwrap_or_default();
    if stencil.len() <= n_unknowns {
        let ring2: Vec<EntityHandle> = stencil
            .iter()
            .filter_map(|n| neighbors.get(n))
            .flatten()
            .copied()
            .collect();
        stencil.extend(ring2);
        stencil.remove(&v);
    }
    if stencil.len() < n_unknowns {
        return Ok(None);
    }

    let xv = mesh.point(v)?;
    let uv = value(values, v)?;
    let mut a = DMatrix::zeros(stencil.len(), n_unknowns);
    let mut b = DVector::zeros(stencil.len());
    for (row, &n) in stencil.iter().enumerate() {
        let xn = mesh.point(n)?;
        let dx: Vec<f64> = (0..d).map(|k| xn[k] - xv[k]).collect();
        for k in 0..d {
            a[(row, k)] = dx[k];
        }
        let mut col = d;
        for i in 0..d {
            for j in i..d {
                // u ≈ ... + ½ Σ H_ij dx_i dx_j, off-diagonals counted twice
                a[(row, col)] = if i == j { 0.5 * dx[i] * dx[i] } else { dx[i] * dx[j] };
                col += 1;
            }
        }
        b[row] = value(values, n)? - uv;
    }

    let Some(coef) = solve_scaled(a, b) else {
        return Ok(None);
    };
    let mut h = Matrix3::zeros();
    let mut col = d;
    for i in 0..d {
        for j in i..d {
            h[(i, j)] = coef[col];
            h[(j, i)] = coef[col];
            col += 1;
        }
    }
    Ok(Some(h))
}

fn value(values: &BTreeMap<EntityHandle, f64>, v: EntityHandle) -> Result<f64, MeshAdaptError> {
    values.get(&v).copied().ok_or(MeshAdaptError::MissingEntity(v))
}

/// Column-scaled SVD least squares; `None` if rank-deficient or ill-conditioned.
fn solve_scaled(mut a: DMatrix<f64>, b: DVector<f64>) -> Option<DVector<f64>> {
    if a.nrows() < a.ncols() || a.ncols() == 0 {
        return None;
    }
    let scales: Vec<f64> = (0..a.ncols()).map(|c| a.column(c).amax()).collect();
    if scales.iter().any(|&s| !(s > 0.0) || !s.is_finite()) {
        return None;
    }
    for (c, &s) in scales.iter().enumerate() {
        a.column_mut(c).scale_mut(1.0 / s);
    }
    let svd = a.svd(true, true);
    let smax = svd.singular_values.max();
    let smin = svd.singular_values.min();
    if !(smin > 0.0) || smax / smin > MAX_CONDITION {
        return None;
    }
    let mut x = svd.solve(&b, 0.0).ok()?;
    for (c, &s) in scales.iter().enumerate() {
        x[c] /= s;
    }
    x.iter().all(|c| c.is_finite()).then_some(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::convert::construct_from_serial;
    use crate::algs::field_transfer::to_adaptation;
    use crate::algs::meshgen;
    use approx::assert_relative_eq;

    fn mesh_with(f: impl Fn([f64; 3]) -> f64) -> AdaptationMesh {
        let solver = meshgen::rectangle(4, 4, [0.0, 0.0], [1.0, 1.0]).unwrap();
        let buffer: Vec<f64> = solver.node_coords.iter().map(|&x| f(x)).collect();
        let mut mesh = construct_from_serial(&solver).unwrap();
        to_adaptation(&mut mesh, "u", &buffer, 1, solver.n_nodes()).unwrap();
        mesh
    }

    #[test]
    fn linear_field_has_exact_gradient() {
        let mesh = mesh_with(|x| 2.0 * x[0] - 3.0 * x[1] + 1.0);
        let values = field_values(&mesh, "u", 0).unwrap();
        let grads = gradients(&mesh, &values, &mesh.vertex_neighbors()).unwrap();
        for g in grads.values() {
            assert_relative_eq!(g[0], 2.0, epsilon = 1e-10);
            assert_relative_eq!(g[1], -3.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn quadratic_field_has_exact_hessian() {
        let mesh = mesh_with(|x| x[0] * x[0] + 3.0 * x[0] * x[1] - x[1] * x[1]);
        let values = field_values(&mesh, "u", 0).unwrap();
        let nbrs = mesh.vertex_neighbors();
        let centre = mesh
            .handles(EntityDim::Vertex)
            .find(|&v| mesh.point(v).unwrap() == [0.5, 0.5, 0.0])
            .unwrap();
        let h = hessian_at(&mesh, &values, &nbrs, centre).unwrap().unwrap();
        assert_relative_eq!(h[(0, 0)], 2.0, epsilon = 1e-8);
        assert_relative_eq!(h[(0, 1)], 3.0, epsilon = 1e-8);
        assert_relative_eq!(h[(1, 1)], -2.0, epsilon = 1e-8);
    }

    #[test]
    fn jittered_interior_keeps_linear_gradient() {
        use rand::{Rng, SeedableRng, rngs::StdRng};
        let mut rng = StdRng::seed_from_u64(7);
        let mut solver = meshgen::rectangle(5, 5, [0.0, 0.0], [1.0, 1.0]).unwrap();
        for x in solver.node_coords.iter_mut() {
            if x[0] > 0.0 && x[0] < 1.0 && x[1] > 0.0 && x[1] < 1.0 {
                x[0] += rng.gen_range(-0.04..0.04);
                x[1] += rng.gen_range(-0.04..0.04);
            }
        }
        let buffer: Vec<f64> = solver.node_coords.iter().map(|x| 0.5 * x[0] + 4.0 * x[1]).collect();
        let mut mesh = construct_from_serial(&solver).unwrap();
        to_adaptation(&mut mesh, "u", &buffer, 1, solver.n_nodes()).unwrap();
        let values = field_values(&mesh, "u", 0).unwrap();
        let grads = gradients(&mesh, &values, &mesh.vertex_neighbors()).unwrap();
        for g in grads.values() {
            assert_relative_eq!(g[0], 0.5, epsilon = 1e-8);
            assert_relative_eq!(g[1], 4.0, epsilon = 1e-8);
        }
    }

    #[test]
    fn missing_component_is_rejected() {
        let mesh = mesh_with(|x| x[0]);
        assert!(field_values(&mesh, "u", 1).is_err());
        assert!(field_values(&mesh, "w", 0).is_err());
    }
}
