//! Partition metadata for a distributed solver mesh.
//!
//! A [`PartitionedMesh`] is one rank's view: its subdomain arrays (owned
//! elements plus one layer of ghost elements touching the owned closure) and
//! the subdomain → global maps for nodes and elements. Owned ranges are
//! contiguous global blocks, `offsets[r]..offsets[r + 1]` for rank `r`.
//!
//! [`partition_by_element_blocks`] produces such views from a global mesh; it
//! backs the multi-rank tests and is a convenient way to seed a distributed
//! run from a serial mesh.

use std::collections::{BTreeSet, HashMap};

use crate::mesh::solver::SolverMesh;
use crate::mesh_error::MeshAdaptError;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PartitionedMesh {
    pub subdomain: SolverMesh,
    /// Owned node range per rank; length `n_ranks + 1`.
    pub node_offsets_owned: Vec<u64>,
    pub node_subdomain_to_global: Vec<u64>,
    /// Owned element range per rank; length `n_ranks + 1`.
    pub element_offsets_owned: Vec<u64>,
    pub element_subdomain_to_global: Vec<u64>,
}

impl PartitionedMesh {
    pub fn n_ranks(&self) -> usize {
        self.element_offsets_owned.len().saturating_sub(1)
    }

    /// Rank owning global element `gid`.
    pub fn element_owner(&self, gid: u64) -> Option<usize> {
        owner_in_offsets(&self.element_offsets_owned, gid)
    }

    /// Rank owning global node `gid`.
    pub fn node_owner(&self, gid: u64) -> Option<usize> {
        owner_in_offsets(&self.node_offsets_owned, gid)
    }

    /// Subdomain elements owned by `rank`, ascending.
    pub fn owned_elements(&self, rank: usize) -> Vec<usize> {
        self.element_subdomain_to_global
            .iter()
            .enumerate()
            .filter(|&(_, &gid)| self.element_owner(gid) == Some(rank))
            .map(|(e, _)| e)
            .collect()
    }

    /// Check offsets, map lengths and uniqueness of global ids.
    pub fn validate(&self) -> Result<(), MeshAdaptError> {
        self.subdomain.check_shape().map_err(MeshAdaptError::Load)?;
        check_offsets("node", &self.node_offsets_owned)?;
        check_offsets("element", &self.element_offsets_owned)?;
        if self.node_offsets_owned.len() != self.element_offsets_owned.len() {
            return Err(MeshAdaptError::Load(
                "node and element offsets disagree on the number of ranks".into(),
            ));
        }
        check_map(
            "node",
            &self.node_subdomain_to_global,
            self.subdomain.n_nodes(),
            self.node_offsets_owned.last().copied().unwrap_or(0),
        )?;
        check_map(
            "element",
            &self.element_subdomain_to_global,
            self.subdomain.n_elements(),
            self.element_offsets_owned.last().copied().unwrap_or(0),
        )
    }
}

fn owner_in_offsets(offsets: &[u64], gid: u64) -> Option<usize> {
    if offsets.len() < 2 || gid >= *offsets.last()? {
        return None;
    }
    // first r with offsets[r + 1] > gid
    let r = offsets.partition_point(|&o| o <= gid);
    r.checked_sub(1)
}

fn check_offsets(what: &str, offsets: &[u64]) -> Result<(), MeshAdaptError> {
    if offsets.len() < 2 || offsets[0] != 0 {
        return Err(MeshAdaptError::Load(format!(
            "{what} offsets must start at 0 and cover at least one rank"
        )));
    }
    if offsets.windows(2).any(|w| w[0] > w[1]) {
        return Err(MeshAdaptError::Load(format!("{what} offsets are not monotone")));
    }
    Ok(())
}

fn check_map(what: &str, map: &[u64], len: usize, total: u64) -> Result<(), MeshAdaptError> {
    if map.len() != len {
        return Err(MeshAdaptError::Load(format!(
            "{what} subdomain-to-global map has {} entries, expected {len}",
            map.len()
        )));
    }
    let mut seen = BTreeSet::new();
    for &gid in map {
        if gid >= total {
            return Err(MeshAdaptError::Load(format!(
                "global {what} {gid} outside 0..{total}"
            )));
        }
        if !seen.insert(gid) {
            return Err(MeshAdaptError::Load(format!("global {what} {gid} repeated")));
        }
    }
    Ok(())
}

/// Split `global` into `n_parts` contiguous element blocks with one ghost layer.
///
/// Nodes are owned by the lowest rank owning an element that contains them
/// and renumbered so every rank's owned nodes form one contiguous block.
/// Materials are copied onto the subdomains.
pub fn partition_by_element_blocks(
    global: &SolverMesh,
    n_parts: usize,
) -> Result<Vec<PartitionedMesh>, MeshAdaptError> {
    global.check_shape().map_err(MeshAdaptError::Load)?;
    let n_el = global.n_elements();
    if n_parts == 0 || n_parts > n_el.max(1) {
        return Err(MeshAdaptError::Load(format!(
            "cannot split {n_el} elements into {n_parts} parts"
        )));
    }
    let element_offsets: Vec<u64> = (0..=n_parts).map(|r| (r * n_el / n_parts) as u64).collect();
    let element_owner = |e: usize| -> usize {
        owner_in_offsets(&element_offsets, e as u64).unwrap_or(0)
    };

    let mut node_owner = vec![usize::MAX; global.n_nodes()];
    for e in 0..n_el {
        for &n in global.element(e) {
            node_owner[n] = node_owner[n].min(element_owner(e));
        }
    }
    for owner in node_owner.iter_mut().filter(|o| **o == usize::MAX) {
        *owner = 0;
    }
    let mut order: Vec<usize> = (0..global.n_nodes()).collect();
    order.sort_by_key(|&n| (node_owner[n], n));
    let mut node_gid = vec![0u64; global.n_nodes()];
    for (gid, &n) in order.iter().enumerate() {
        node_gid[n] = gid as u64;
    }
    let mut node_offsets = vec![0u64; n_parts + 1];
    for &owner in &node_owner {
        node_offsets[owner + 1] += 1;
    }
    for r in 0..n_parts {
        node_offsets[r + 1] += node_offsets[r];
    }

    let mut elements_of_node: Vec<Vec<usize>> = vec![Vec::new(); global.n_nodes()];
    for e in 0..n_el {
        for &n in global.element(e) {
            elements_of_node[n].push(e);
        }
    }
    let boundary_material: HashMap<Vec<usize>, i32> = (0..global.n_element_boundaries())
        .map(|b| {
            let mut key = global.boundary(b).to_vec();
            key.sort_unstable();
            (key, global.element_boundary_material[b])
        })
        .collect();

    let mut parts = Vec::with_capacity(n_parts);
    for rank in 0..n_parts {
        let owned = element_offsets[rank] as usize..element_offsets[rank + 1] as usize;
        let mut ghosts = BTreeSet::new();
        for e in owned.clone() {
            for &n in global.element(e) {
                ghosts.extend(elements_of_node[n].iter().filter(|&&o| !owned.contains(&o)));
            }
        }
        let elements: Vec<usize> = owned.chain(ghosts).collect();

        let mut nodes: Vec<usize> = elements
            .iter()
            .flat_map(|&e| global.element(e).iter().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        nodes.sort_by_key(|&n| node_gid[n]);
        let local_of: HashMap<usize, usize> =
            nodes.iter().enumerate().map(|(l, &n)| (n, l)).collect();

        let coords = nodes.iter().map(|&n| global.node_coords[n]).collect();
        let connectivity = elements
            .iter()
            .flat_map(|&e| global.element(e).iter().map(|n| local_of[n]))
            .collect();
        let mut subdomain = SolverMesh::from_elements(
            global.n_space_dim,
            coords,
            connectivity,
            global.nodes_per_element,
        )?;
        subdomain.node_material = nodes.iter().map(|&n| global.node_material[n]).collect();
        subdomain.element_material = elements.iter().map(|&e| global.element_material[e]).collect();
        for b in 0..subdomain.n_element_boundaries() {
            let mut key: Vec<usize> = subdomain.boundary(b).iter().map(|&l| nodes[l]).collect();
            key.sort_unstable();
            subdomain.element_boundary_material[b] =
                boundary_material.get(&key).copied().unwrap_or(0);
        }

        parts.push(PartitionedMesh {
            subdomain,
            node_offsets_owned: node_offsets.clone(),
            node_subdomain_to_global: nodes.iter().map(|&n| node_gid[n]).collect(),
            element_offsets_owned: element_offsets.clone(),
            element_subdomain_to_global: elements.iter().map(|&e| e as u64).collect(),
        });
    }
    Ok(parts)
}
