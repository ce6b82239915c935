//! Partition-consistent entity numbering.
//!
//! [`GlobalNumbering`] gives every entity of one dimension an id in
//! `0..total` that agrees across ranks: owners number their entities
//! `base(rank) + local` in iteration order, where `base` is the sum of the
//! owned counts of lower ranks, then push each id to the ranks holding ghost
//! copies. [`LocalNumbering`] numbers owned entities only.

use std::collections::{BTreeMap, HashMap};

use log::debug;

use crate::algs::communicator::{agree, tags, Communicator};
use crate::algs::exchange::exchange_records;
use crate::algs::wire::WireGid;
use crate::mesh::adaptation::AdaptationMesh;
use crate::mesh_error::MeshAdaptError;
use crate::topology::dimension::EntityDim;
use crate::topology::handle::EntityHandle;

#[derive(Clone, Debug, PartialEq)]
pub struct GlobalNumbering {
    dim: EntityDim,
    ids: BTreeMap<EntityHandle, u64>,
    by_id: HashMap<u64, EntityHandle>,
    base: u64,
    owned: u64,
    total: u64,
}

impl GlobalNumbering {
    /// Number the entities of `dim`. Collective over `comm`.
    pub fn build<C>(mesh: &AdaptationMesh, dim: EntityDim, comm: &C) -> Result<Self, MeshAdaptError>
    where
        C: Communicator + ?Sized,
    {
        let rank = comm.rank();
        let owned: Vec<EntityHandle> = mesh
            .iter(dim)
            .filter(|(_, rec)| rec.ownership().is_owned_by(rank))
            .map(|(h, _)| h)
            .collect();
        let counts = comm.allgather_u64(tags::NUMBERING, owned.len() as u64)?;
        let base: u64 = counts[..rank].iter().sum();
        let total: u64 = counts.iter().sum();

        let mut ids = BTreeMap::new();
        let mut outgoing: BTreeMap<usize, Vec<WireGid>> = BTreeMap::new();
        for (i, &h) in owned.iter().enumerate() {
            let id = base + i as u64;
            ids.insert(h, id);
            for (peer, remote) in mesh.ownership(h)?.remotes() {
                outgoing
                    .entry(peer)
                    .or_default()
                    .push(WireGid::new(remote.to_wire(), id));
            }
        }

        let incoming = exchange_records(comm, tags::GHOST_IDS, &outgoing)?;
        let adopted = adopt_ghost_ids(mesh, dim, &incoming, &mut ids);
        agree(comm, "numbering", adopted)?;

        let mut numbering = GlobalNumbering {
            dim,
            by_id: HashMap::with_capacity(ids.len()),
            ids,
            base,
            owned: owned.len() as u64,
            total,
        };
        let checked = numbering.check(mesh, &counts);
        agree(comm, "numbering check", checked)?;
        numbering.by_id = numbering.ids.iter().map(|(&h, &id)| (id, h)).collect();
        debug!(
            "[rank {rank}] numbered {dim:?}: {} local, {} owned, {total} global",
            numbering.ids.len(),
            numbering.owned
        );
        Ok(numbering)
    }

    /// Number every dimension up to the cell dimension.
    pub fn build_all<C>(mesh: &AdaptationMesh, comm: &C) -> Result<Vec<Self>, MeshAdaptError>
    where
        C: Communicator + ?Sized,
    {
        mesh.cell_dim()
            .up_to()
            .map(|dim| Self::build(mesh, dim, comm))
            .collect()
    }

    pub fn dim(&self) -> EntityDim {
        self.dim
    }

    /// Global id of `handle`.
    pub fn id(&self, handle: EntityHandle) -> Result<u64, MeshAdaptError> {
        self.ids
            .get(&handle)
            .copied()
            .ok_or(MeshAdaptError::MissingEntity(handle))
    }

    /// Local handle carrying global id `id`, if this rank holds it.
    pub fn handle_of(&self, id: u64) -> Option<EntityHandle> {
        self.by_id.get(&id).copied()
    }

    /// Number of entities across all ranks.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Ids owned by this rank.
    pub fn owned_range(&self) -> std::ops::Range<u64> {
        self.base..self.base + self.owned
    }

    /// `(handle, id)` pairs ascending by handle.
    pub fn iter(&self) -> impl Iterator<Item = (EntityHandle, u64)> + '_ {
        self.ids.iter().map(|(&h, &id)| (h, id))
    }

    fn check(&self, mesh: &AdaptationMesh, counts: &[u64]) -> Result<(), MeshAdaptError> {
        let dim = self.dim;
        let err = |reason: String| MeshAdaptError::Numbering { dim, reason };
        if counts.iter().sum::<u64>() != self.total {
            return Err(err(format!(
                "owned counts {counts:?} do not sum to {}",
                self.total
            )));
        }
        if let Some(h) = mesh.handles(dim).find(|h| !self.ids.contains_key(h)) {
            return Err(err(format!("{h} has no global id")));
        }
        let mut seen = HashMap::with_capacity(self.ids.len());
        for (&h, &id) in &self.ids {
            if id >= self.total {
                return Err(err(format!("{h} has id {id} outside 0..{}", self.total)));
            }
            if let Some(other) = seen.insert(id, h) {
                return Err(err(format!("id {id} used by both {other} and {h}")));
            }
        }
        Ok(())
    }
}

fn adopt_ghost_ids(
    mesh: &AdaptationMesh,
    dim: EntityDim,
    incoming: &BTreeMap<usize, Vec<WireGid>>,
    ids: &mut BTreeMap<EntityHandle, u64>,
) -> Result<(), MeshAdaptError> {
    for (&peer, records) in incoming {
        for rec in records {
            let h = EntityHandle::from_wire(dim, rec.handle())?;
            let owner = mesh.ownership(h)?.owner();
            if owner != peer {
                return Err(MeshAdaptError::Numbering {
                    dim,
                    reason: format!("rank {peer} sent an id for {h}, which rank {owner} owns"),
                });
            }
            ids.insert(h, rec.gid());
        }
    }
    Ok(())
}

/// Contiguous numbering of the entities of one dimension owned by a rank.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalNumbering {
    dim: EntityDim,
    index: BTreeMap<EntityHandle, usize>,
}

impl LocalNumbering {
    pub fn build(mesh: &AdaptationMesh, dim: EntityDim, rank: usize) -> Self {
        let index = mesh
            .iter(dim)
            .filter(|(_, rec)| rec.ownership().is_owned_by(rank))
            .enumerate()
            .map(|(i, (h, _))| (h, i))
            .collect();
        Self { dim, index }
    }

    /// Number every dimension up to the cell dimension.
    pub fn build_all(mesh: &AdaptationMesh, rank: usize) -> Vec<Self> {
        mesh.cell_dim().up_to().map(|dim| Self::build(mesh, dim, rank)).collect()
    }

    pub fn dim(&self) -> EntityDim {
        self.dim
    }

    /// Local number of an owned entity; ghosts have none.
    pub fn get(&self, handle: EntityHandle) -> Option<usize> {
        self.index.get(&handle).copied()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::algs::convert::construct_from_serial;
    use crate::algs::meshgen;

    #[test]
    fn serial_numbering_is_iteration_order() {
        let solver = meshgen::rectangle(2, 2, [0.0, 0.0], [1.0, 1.0]).unwrap();
        let mesh = construct_from_serial(&solver).unwrap();
        let all = GlobalNumbering::build_all(&mesh, &NoComm).unwrap();
        assert_eq!(all.len(), 3);
        for numbering in &all {
            let dim = numbering.dim();
            assert_eq!(numbering.total(), mesh.count(dim) as u64);
            for (i, h) in mesh.handles(dim).enumerate() {
                assert_eq!(numbering.id(h).unwrap(), i as u64);
                assert_eq!(numbering.handle_of(i as u64), Some(h));
            }
        }
    }

    #[test]
    fn local_numbering_is_contiguous() {
        let solver = meshgen::line(4, 0.0, 1.0).unwrap();
        let mesh = construct_from_serial(&solver).unwrap();
        let local = LocalNumbering::build(&mesh, EntityDim::Vertex, 0);
        assert_eq!(local.len(), 5);
        let v = mesh.handles(EntityDim::Vertex).last().unwrap();
        assert_eq!(local.get(v), Some(4));
        assert!(LocalNumbering::build(&mesh, EntityDim::Vertex, 1).is_empty());
    }
}
