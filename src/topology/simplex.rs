//! Local sub-entity templates for simplicial cells.
//!
//! Boundaries are listed in "opposite vertex" order: boundary `i` of a cell is
//! the sub-simplex that does not contain local vertex `i`. Element adjacency
//! and element-boundary arrays in [`SolverMesh`](crate::mesh::solver::SolverMesh)
//! follow the same convention.

use crate::topology::dimension::EntityDim;

const SEGMENT_BOUNDARIES: [&[usize]; 2] = [&[1], &[0]];
const TRIANGLE_BOUNDARIES: [&[usize]; 3] = [&[1, 2], &[0, 2], &[0, 1]];
const TETRAHEDRON_BOUNDARIES: [&[usize]; 4] = [&[1, 2, 3], &[0, 2, 3], &[0, 1, 3], &[0, 1, 2]];

const SEGMENT_EDGES: [[usize; 2]; 1] = [[0, 1]];
const TRIANGLE_EDGES: [[usize; 2]; 3] = [[0, 1], [1, 2], [0, 2]];
const TETRAHEDRON_EDGES: [[usize; 2]; 6] = [[0, 1], [1, 2], [0, 2], [0, 3], [1, 3], [2, 3]];

/// Boundary sub-simplices of a cell of dimension `cell`, in opposite-vertex order.
pub fn boundaries(cell: EntityDim) -> &'static [&'static [usize]] {
    match cell {
        EntityDim::Vertex => &[],
        EntityDim::Edge => &SEGMENT_BOUNDARIES,
        EntityDim::Face => &TRIANGLE_BOUNDARIES,
        EntityDim::Region => &TETRAHEDRON_BOUNDARIES,
    }
}

/// Edges of a cell of dimension `cell`.
pub fn edges(cell: EntityDim) -> &'static [[usize; 2]] {
    match cell {
        EntityDim::Vertex => &[],
        EntityDim::Edge => &SEGMENT_EDGES,
        EntityDim::Face => &TRIANGLE_EDGES,
        EntityDim::Region => &TETRAHEDRON_EDGES,
    }
}

/// Local vertex tuples of every sub-entity of dimension `sub` of a cell of
/// dimension `cell`. `sub == cell` yields the cell itself.
pub fn sub_entities(cell: EntityDim, sub: EntityDim) -> Vec<Vec<usize>> {
    let n = cell.simplex_vertex_count();
    if sub > cell {
        return Vec::new();
    }
    if sub == cell {
        return vec![(0..n).collect()];
    }
    match sub {
        EntityDim::Vertex => (0..n).map(|i| vec![i]).collect(),
        EntityDim::Edge => edges(cell).iter().map(|e| e.to_vec()).collect(),
        // only reachable for regions: faces are their boundaries
        EntityDim::Face => boundaries(cell).iter().map(|b| b.to_vec()).collect(),
        EntityDim::Region => Vec::new(),
    }
}

/// Element dimension implied by a nodes-per-element count.
pub fn cell_dim_for_nodes(nodes_per_element: usize) -> Option<EntityDim> {
    match nodes_per_element {
        2 => Some(EntityDim::Edge),
        3 => Some(EntityDim::Face),
        4 => Some(EntityDim::Region),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_i_excludes_vertex_i() {
        for cell in [EntityDim::Edge, EntityDim::Face, EntityDim::Region] {
            for (i, b) in boundaries(cell).iter().enumerate() {
                assert!(!b.contains(&i));
                assert_eq!(b.len(), cell.simplex_vertex_count() - 1);
            }
        }
    }

    #[test]
    fn sub_entity_counts() {
        assert_eq!(sub_entities(EntityDim::Region, EntityDim::Vertex).len(), 4);
        assert_eq!(sub_entities(EntityDim::Region, EntityDim::Edge).len(), 6);
        assert_eq!(sub_entities(EntityDim::Region, EntityDim::Face).len(), 4);
        assert_eq!(sub_entities(EntityDim::Region, EntityDim::Region).len(), 1);
        assert_eq!(sub_entities(EntityDim::Face, EntityDim::Edge).len(), 3);
        assert!(sub_entities(EntityDim::Edge, EntityDim::Face).is_empty());
    }

    #[test]
    fn nodes_per_element_to_dim() {
        assert_eq!(cell_dim_for_nodes(3), Some(EntityDim::Face));
        assert_eq!(cell_dim_for_nodes(8), None);
    }
}
