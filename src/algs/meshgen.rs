//! Basic structured simplex mesh generators.
//!
//! All generators return a [`SolverMesh`] with derived tables built and
//! materials set to zero.

use crate::mesh::solver::SolverMesh;
use crate::mesh_error::MeshAdaptError;

fn invalid_geometry(message: impl Into<String>) -> MeshAdaptError {
    MeshAdaptError::Load(message.into())
}

/// `n` equal segments on `[x0, x1]`.
pub fn line(n: usize, x0: f64, x1: f64) -> Result<SolverMesh, MeshAdaptError> {
    if n == 0 || !(x1 > x0) {
        return Err(invalid_geometry(format!(
            "line needs n > 0 and x1 > x0, got n = {n} on [{x0}, {x1}]"
        )));
    }
    let h = (x1 - x0) / n as f64;
    let coords = (0..=n).map(|i| [x0 + i as f64 * h, 0.0, 0.0]).collect();
    let elements = (0..n).flat_map(|i| [i, i + 1]).collect();
    SolverMesh::from_elements(1, coords, elements, 2)
}

/// `nx × ny` quads over `[lo, hi]`, each split into two triangles along the
/// same diagonal.
pub fn rectangle(
    nx: usize,
    ny: usize,
    lo: [f64; 2],
    hi: [f64; 2],
) -> Result<SolverMesh, MeshAdaptError> {
    if nx == 0 || ny == 0 || !(hi[0] > lo[0] && hi[1] > lo[1]) {
        return Err(invalid_geometry("rectangle needs positive cell counts and extent"));
    }
    let node = |i: usize, j: usize| j * (nx + 1) + i;
    let mut coords = Vec::with_capacity((nx + 1) * (ny + 1));
    for j in 0..=ny {
        for i in 0..=nx {
            coords.push([
                lo[0] + (hi[0] - lo[0]) * i as f64 / nx as f64,
                lo[1] + (hi[1] - lo[1]) * j as f64 / ny as f64,
                0.0,
            ]);
        }
    }
    let mut elements = Vec::with_capacity(6 * nx * ny);
    for j in 0..ny {
        for i in 0..nx {
            let (a, b, c, d) = (node(i, j), node(i + 1, j), node(i + 1, j + 1), node(i, j + 1));
            elements.extend_from_slice(&[a, b, c, a, c, d]);
        }
    }
    SolverMesh::from_elements(2, coords, elements, 3)
}

/// `nx × ny × nz` cubes over `[0, extent]`, each split into six tetrahedra
/// around its main diagonal.
pub fn box_tets(
    nx: usize,
    ny: usize,
    nz: usize,
    extent: [f64; 3],
) -> Result<SolverMesh, MeshAdaptError> {
    if nx == 0 || ny == 0 || nz == 0 || extent.iter().any(|&e| !(e > 0.0)) {
        return Err(invalid_geometry("box needs positive cell counts and extent"));
    }
    let node = |i: usize, j: usize, k: usize| (k * (ny + 1) + j) * (nx + 1) + i;
    let mut coords = Vec::with_capacity((nx + 1) * (ny + 1) * (nz + 1));
    for k in 0..=nz {
        for j in 0..=ny {
            for i in 0..=nx {
                coords.push([
                    extent[0] * i as f64 / nx as f64,
                    extent[1] * j as f64 / ny as f64,
                    extent[2] * k as f64 / nz as f64,
                ]);
            }
        }
    }
    const AXIS_ORDERS: [[usize; 3]; 6] =
        [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];
    let mut elements = Vec::with_capacity(24 * nx * ny * nz);
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                for order in AXIS_ORDERS {
                    let mut at = [i, j, k];
                    elements.push(node(at[0], at[1], at[2]));
                    for axis in order {
                        at[axis] += 1;
                        elements.push(node(at[0], at[1], at[2]));
                    }
                }
            }
        }
    }
    SolverMesh::from_elements(3, coords, elements, 4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_spacing() {
        let mesh = line(4, 0.0, 2.0).unwrap();
        assert_eq!(mesh.n_nodes(), 5);
        assert_eq!(mesh.node_coords[3][0], 1.5);
        assert_eq!(mesh.exterior_boundaries.len(), 2);
    }

    #[test]
    fn rectangle_counts() {
        let mesh = rectangle(2, 3, [0.0, 0.0], [1.0, 1.0]).unwrap();
        assert_eq!(mesh.n_nodes(), 12);
        assert_eq!(mesh.n_elements(), 12);
        // boundary edges: 2 * (2 + 3)
        assert_eq!(mesh.exterior_boundaries.len(), 10);
    }

    #[test]
    fn box_tets_conform() {
        let mesh = box_tets(2, 1, 1, [2.0, 1.0, 1.0]).unwrap();
        assert_eq!(mesh.n_elements(), 12);
        // each cube face is split in two triangles: 2 * (2*1 + 2*1 + 1*1) * 2
        assert_eq!(mesh.exterior_boundaries.len(), 20);
    }

    #[test]
    fn empty_line_is_rejected() {
        assert!(line(0, 0.0, 1.0).is_err());
        assert!(line(3, 1.0, 1.0).is_err());
    }
}
