//! `EntityHandle`: a process-local handle for adaptation-mesh entities.
//!
//! Every vertex, edge, face and region in an [`AdaptationMesh`] is referred to
//! by a handle made of its [`EntityDim`] and a nonzero slot number. Slot 0 is
//! reserved as an invalid sentinel, so a handle maps onto `slot - 1` in the
//! per-dimension storage.
//!
//! Handles are only meaningful on the process that created them. Identity
//! across processes goes through the remote-copy table in
//! [`Ownership`](crate::topology::ownership::Ownership) or through
//! [`GlobalNumbering`](crate::data::numbering::GlobalNumbering).
//!
//! [`AdaptationMesh`]: crate::mesh::adaptation::AdaptationMesh

use std::{fmt, num::NonZeroU32};

use crate::mesh_error::MeshAdaptError;
use crate::topology::dimension::EntityDim;

#[derive(
    Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct EntityHandle {
    dim: EntityDim,
    slot: NonZeroU32,
}

impl EntityHandle {
    /// Creates a handle from a raw slot number.
    ///
    /// Fails with a conversion error if `slot == 0`.
    #[inline]
    pub fn new(dim: EntityDim, slot: u32) -> Result<Self, MeshAdaptError> {
        NonZeroU32::new(slot)
            .map(|slot| EntityHandle { dim, slot })
            .ok_or_else(|| MeshAdaptError::Conversion("entity slot 0 is reserved".into()))
    }

    /// Handle for the zero-based storage index `index`.
    #[inline]
    pub(crate) fn from_index(dim: EntityDim, index: usize) -> Self {
        let slot = u32::try_from(index + 1).unwrap_or(u32::MAX);
        // index + 1 >= 1
        EntityHandle {
            dim,
            slot: NonZeroU32::new(slot).unwrap_or(NonZeroU32::MIN),
        }
    }

    #[inline]
    pub const fn dim(self) -> EntityDim {
        self.dim
    }

    #[inline]
    pub const fn slot(self) -> u32 {
        self.slot.get()
    }

    /// Zero-based storage index.
    #[inline]
    pub const fn index(self) -> usize {
        (self.slot.get() - 1) as usize
    }

    /// Slot number as carried on the wire.
    #[inline]
    pub fn to_wire(self) -> u64 {
        u64::from(self.slot.get())
    }

    pub fn from_wire(dim: EntityDim, raw: u64) -> Result<Self, MeshAdaptError> {
        let slot = u32::try_from(raw)
            .map_err(|_| MeshAdaptError::Conversion(format!("entity slot {raw} out of range")))?;
        Self::new(dim, slot)
    }
}

impl fmt::Debug for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EntityHandle")
            .field(&self.dim)
            .field(&self.slot.get())
            .finish()
    }
}

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.dim {
            EntityDim::Vertex => 'v',
            EntityDim::Edge => 'e',
            EntityDim::Face => 'f',
            EntityDim::Region => 'r',
        };
        write!(f, "{prefix}{}", self.slot.get())
    }
}

#[cfg(test)]
mod layout_tests {
    use super::*;
    use static_assertions::assert_eq_size;

    assert_eq_size!(EntityHandle, Option<EntityHandle>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_slot_is_rejected() {
        assert!(EntityHandle::new(EntityDim::Vertex, 0).is_err());
    }

    #[test]
    fn index_and_slot() {
        let h = EntityHandle::from_index(EntityDim::Edge, 4);
        assert_eq!(h.slot(), 5);
        assert_eq!(h.index(), 4);
        assert_eq!(h.dim(), EntityDim::Edge);
    }

    #[test]
    fn debug_and_display() {
        let h = EntityHandle::new(EntityDim::Face, 7).unwrap();
        assert_eq!(format!("{h:?}"), "EntityHandle(Face, 7)");
        assert_eq!(format!("{h}"), "f7");
    }

    #[test]
    fn orders_by_dimension_then_slot() {
        let v = EntityHandle::new(EntityDim::Vertex, 9).unwrap();
        let e = EntityHandle::new(EntityDim::Edge, 1).unwrap();
        let e2 = EntityHandle::new(EntityDim::Edge, 2).unwrap();
        assert!(v < e);
        assert!(e < e2);
    }

    #[test]
    fn wire_round_trip() {
        let h = EntityHandle::new(EntityDim::Region, 31).unwrap();
        assert_eq!(EntityHandle::from_wire(EntityDim::Region, h.to_wire()).unwrap(), h);
        assert!(EntityHandle::from_wire(EntityDim::Region, u64::MAX).is_err());
    }
}
