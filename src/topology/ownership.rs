//! Ownership metadata for adaptation-mesh entities.
//!
//! An [`Ownership`] records the owning rank of an entity and, for entities on
//! a partition boundary, the handle of every copy held by another rank. The
//! owner of a shared entity is always the lowest rank holding a copy; every
//! other copy is a ghost.

use std::collections::BTreeMap;

use crate::topology::handle::EntityHandle;

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Ownership {
    owner: usize,
    remotes: BTreeMap<usize, EntityHandle>,
}

impl Ownership {
    /// Entity held by `rank` alone.
    pub fn local(rank: usize) -> Self {
        Self {
            owner: rank,
            remotes: BTreeMap::new(),
        }
    }

    pub fn owner(&self) -> usize {
        self.owner
    }

    /// Returns true if the entity is a ghost copy on `my_rank`.
    pub fn is_ghost(&self, my_rank: usize) -> bool {
        self.owner != my_rank
    }

    pub fn is_owned_by(&self, rank: usize) -> bool {
        self.owner == rank
    }

    /// Returns true when copies exist on other ranks.
    pub fn is_shared(&self) -> bool {
        !self.remotes.is_empty()
    }

    /// Remote copies as `(rank, handle on that rank)`, ascending by rank.
    pub fn remotes(&self) -> impl Iterator<Item = (usize, EntityHandle)> + '_ {
        self.remotes.iter().map(|(&rank, &handle)| (rank, handle))
    }

    pub fn remote(&self, rank: usize) -> Option<EntityHandle> {
        self.remotes.get(&rank).copied()
    }

    /// Record the copy held by `rank`; ownership moves to `rank` if it is lower.
    pub fn add_remote(&mut self, rank: usize, handle: EntityHandle) {
        self.remotes.insert(rank, handle);
        self.owner = self.owner.min(rank);
    }

    /// Recompute the owner as the lowest of `my_rank` and all remote ranks.
    pub fn set_owner_min(&mut self, my_rank: usize) {
        self.owner = self
            .remotes
            .keys()
            .copied()
            .chain(std::iter::once(my_rank))
            .min()
            .unwrap_or(my_rank);
    }

    /// All ranks holding a copy, including `my_rank`.
    pub fn sharers(&self, my_rank: usize) -> Vec<usize> {
        let mut ranks: Vec<usize> = self.remotes.keys().copied().collect();
        ranks.push(my_rank);
        ranks.sort_unstable();
        ranks.dedup();
        ranks
    }

    pub fn clear_remotes(&mut self, my_rank: usize) {
        self.remotes.clear();
        self.owner = my_rank;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::dimension::EntityDim;

    fn v(slot: u32) -> EntityHandle {
        EntityHandle::new(EntityDim::Vertex, slot).unwrap()
    }

    #[test]
    fn lowest_rank_owns() {
        let mut own = Ownership::local(2);
        assert!(!own.is_ghost(2));
        own.add_remote(3, v(4));
        assert_eq!(own.owner(), 2);
        own.add_remote(1, v(9));
        assert_eq!(own.owner(), 1);
        assert!(own.is_ghost(2));
        assert_eq!(own.sharers(2), vec![1, 2, 3]);
        assert_eq!(own.remote(3), Some(v(4)));
    }

    #[test]
    fn clear_restores_local() {
        let mut own = Ownership::local(1);
        own.add_remote(0, v(1));
        own.clear_remotes(1);
        assert!(!own.is_shared());
        assert!(own.is_owned_by(1));
    }
}
