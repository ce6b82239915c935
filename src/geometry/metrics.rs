//! Simplex measures used to reject degenerate or inverted cells.
//!
//! The reference elements use the following vertex ordering:
//! - Segment: `[v0, v1]`.
//! - Triangle: `[v0, v1, v2]`.
//! - Tetrahedron: `[v0, v1, v2, v3]`, positive when `v3` lies on the side of
//!   `(v1 - v0) x (v2 - v0)`.

use crate::mesh_error::MeshAdaptError;
use crate::topology::dimension::EntityDim;

/// Measures at or below this value count as degenerate.
pub const DEGENERATE_EPS: f64 = 1e-14;

/// Unsigned measure (length, area, volume) of a simplex.
pub fn simplex_measure(cell: EntityDim, vertices: &[[f64; 3]]) -> Result<f64, MeshAdaptError> {
    let expected = cell.simplex_vertex_count();
    if vertices.len() != expected {
        return Err(MeshAdaptError::Conversion(format!(
            "vertex count mismatch for {cell:?}: expected {expected}, got {}",
            vertices.len()
        )));
    }
    Ok(match cell {
        EntityDim::Vertex => 0.0,
        EntityDim::Edge => norm(sub(vertices[1], vertices[0])),
        EntityDim::Face => {
            0.5 * norm(cross(
                sub(vertices[1], vertices[0]),
                sub(vertices[2], vertices[0]),
            ))
        }
        EntityDim::Region => {
            signed_volume(vertices[0], vertices[1], vertices[2], vertices[3]).abs()
        }
    })
}

/// Signed measure in the cell's own space dimension.
///
/// Segments are signed along `x` when `space_dim == 1`, triangles by their
/// `z` normal component when `space_dim == 2`, tetrahedra by orientation.
/// Cells embedded in a higher space dimension return their unsigned measure.
pub fn signed_measure(
    cell: EntityDim,
    space_dim: usize,
    vertices: &[[f64; 3]],
) -> Result<f64, MeshAdaptError> {
    let unsigned = simplex_measure(cell, vertices)?;
    Ok(match (cell, space_dim) {
        (EntityDim::Edge, 1) => vertices[1][0] - vertices[0][0],
        (EntityDim::Face, 2) => {
            0.5 * cross(
                sub(vertices[1], vertices[0]),
                sub(vertices[2], vertices[0]),
            )[2]
        }
        (EntityDim::Region, _) => {
            signed_volume(vertices[0], vertices[1], vertices[2], vertices[3])
        }
        _ => unsigned,
    })
}

pub fn is_degenerate(cell: EntityDim, vertices: &[[f64; 3]]) -> Result<bool, MeshAdaptError> {
    Ok(simplex_measure(cell, vertices)? <= DEGENERATE_EPS)
}

pub fn distance(a: [f64; 3], b: [f64; 3]) -> f64 {
    norm(sub(b, a))
}

fn signed_volume(a: [f64; 3], b: [f64; 3], c: [f64; 3], d: [f64; 3]) -> f64 {
    let ab = sub(b, a);
    let ac = sub(c, a);
    let ad = sub(d, a);
    dot(ab, cross(ac, ad)) / 6.0
}

pub(crate) fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn norm(a: [f64; 3]) -> f64 {
    dot(a, a).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_simplices() {
        let seg = [[0.0, 0.0, 0.0], [2.0, 0.0, 0.0]];
        assert_eq!(simplex_measure(EntityDim::Edge, &seg).unwrap(), 2.0);
        let tri = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        assert_eq!(simplex_measure(EntityDim::Face, &tri).unwrap(), 0.5);
        let tet = [
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
        ];
        assert!((simplex_measure(EntityDim::Region, &tet).unwrap() - 1.0 / 6.0).abs() < 1e-15);
        assert!(signed_measure(EntityDim::Region, 3, &tet).unwrap() > 0.0);
    }

    #[test]
    fn flipped_segment_is_negative_in_1d() {
        let seg = [[1.0, 0.0, 0.0], [0.5, 0.0, 0.0]];
        assert!(signed_measure(EntityDim::Edge, 1, &seg).unwrap() < 0.0);
    }

    #[test]
    fn collinear_triangle_is_degenerate() {
        let tri = [[0.0, 0.0, 0.0], [1.0, 1.0, 0.0], [2.0, 2.0, 0.0]];
        assert!(is_degenerate(EntityDim::Face, &tri).unwrap());
    }

    #[test]
    fn wrong_vertex_count_is_an_error() {
        assert!(simplex_measure(EntityDim::Face, &[[0.0; 3]]).is_err());
    }
}
