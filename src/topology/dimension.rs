//! Entity dimensions of an unstructured mesh.

use serde::{Deserialize, Serialize};

/// Topological dimension of a mesh entity.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum EntityDim {
    Vertex,
    Edge,
    Face,
    Region,
}

impl EntityDim {
    /// All dimensions in ascending order.
    pub const ALL: [EntityDim; 4] = [
        EntityDim::Vertex,
        EntityDim::Edge,
        EntityDim::Face,
        EntityDim::Region,
    ];

    /// Index in `0..4`, used for dimension-indexed tables.
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            EntityDim::Vertex => 0,
            EntityDim::Edge => 1,
            EntityDim::Face => 2,
            EntityDim::Region => 3,
        }
    }

    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(EntityDim::Vertex),
            1 => Some(EntityDim::Edge),
            2 => Some(EntityDim::Face),
            3 => Some(EntityDim::Region),
            _ => None,
        }
    }

    /// Number of vertices of the simplex of this dimension.
    #[inline]
    pub const fn simplex_vertex_count(self) -> usize {
        self.index() + 1
    }

    /// Dimension of the boundary entities of a cell of this dimension.
    pub const fn boundary(self) -> Option<Self> {
        match self {
            EntityDim::Vertex => None,
            EntityDim::Edge => Some(EntityDim::Vertex),
            EntityDim::Face => Some(EntityDim::Edge),
            EntityDim::Region => Some(EntityDim::Face),
        }
    }

    /// Dimensions from `Vertex` up to and including `self`.
    pub fn up_to(self) -> impl Iterator<Item = EntityDim> {
        Self::ALL.into_iter().take(self.index() + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_round_trips() {
        for dim in EntityDim::ALL {
            assert_eq!(EntityDim::from_index(dim.index()), Some(dim));
        }
        assert_eq!(EntityDim::from_index(4), None);
    }

    #[test]
    fn boundary_and_closure() {
        assert_eq!(EntityDim::Region.boundary(), Some(EntityDim::Face));
        assert_eq!(EntityDim::Vertex.boundary(), None);
        let dims: Vec<_> = EntityDim::Face.up_to().collect();
        assert_eq!(dims, vec![EntityDim::Vertex, EntityDim::Edge, EntityDim::Face]);
    }
}
