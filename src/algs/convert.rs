//! Conversion between solver arrays and the adaptation mesh.
//!
//! Serial conversion creates one vertex per node and one cell per element,
//! in order, plus the edges and faces implied by the cells. Parallel
//! conversion builds the owned elements of a subdomain and their closure,
//! then matches partition-boundary entities with the neighbors that hold
//! them: two copies are the same physical entity when their sorted global
//! node ids agree.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::debug;

use crate::algs::communicator::{agree, tags, Communicator};
use crate::algs::exchange::exchange_records;
use crate::algs::wire::WireMatch;
use crate::geometry::metrics;
use crate::mesh::adaptation::AdaptationMesh;
use crate::mesh::partition::PartitionedMesh;
use crate::mesh::solver::SolverMesh;
use crate::mesh_error::MeshAdaptError;
use crate::topology::dimension::EntityDim;
use crate::topology::handle::EntityHandle;
use crate::topology::simplex;

/// Build the adaptation mesh of a whole (unpartitioned) solver mesh.
pub fn construct_from_serial(solver: &SolverMesh) -> Result<AdaptationMesh, MeshAdaptError> {
    let elements: Vec<usize> = (0..solver.n_elements()).collect();
    let nodes: Vec<usize> = (0..solver.n_nodes()).collect();
    let mesh = build_elements(solver, &nodes, &elements, 0)?;
    debug!(
        "converted serial mesh: {} vertices, {} cells",
        mesh.count(EntityDim::Vertex),
        mesh.count(mesh.cell_dim())
    );
    Ok(mesh)
}

/// Build this rank's part of a distributed adaptation mesh.
///
/// Collective: every rank of `comm` must call it with its own subdomain.
pub fn construct_from_parallel<C>(
    part: &PartitionedMesh,
    comm: &C,
) -> Result<AdaptationMesh, MeshAdaptError>
where
    C: Communicator + ?Sized,
{
    let rank = comm.rank();
    let local = build_local(part, rank, comm.size());
    let (mut mesh, keys, outgoing) = agree(comm, "convert", local)?;

    let incoming = exchange_records(comm, tags::MATCH, &outgoing)?;
    let matched = match_remotes(&mut mesh, &keys, &outgoing, &incoming);
    agree(comm, "match shared entities", matched)?;

    debug!(
        "[rank {rank}] converted subdomain: {} vertices ({} owned), {} cells",
        mesh.count(EntityDim::Vertex),
        mesh.owned_count(EntityDim::Vertex),
        mesh.count(mesh.cell_dim())
    );
    Ok(mesh)
}

type EntityKeys = HashMap<(EntityDim, Vec<u64>), EntityHandle>;
type Outgoing = BTreeMap<usize, Vec<WireMatch>>;

fn build_local(
    part: &PartitionedMesh,
    rank: usize,
    size: usize,
) -> Result<(AdaptationMesh, EntityKeys, Outgoing), MeshAdaptError> {
    part.validate()?;
    if part.n_ranks() != size {
        return Err(MeshAdaptError::Load(format!(
            "partition describes {} ranks but the communicator has {size}",
            part.n_ranks()
        )));
    }
    let solver = &part.subdomain;
    let cell = solver
        .cell_dim()
        .ok_or_else(|| MeshAdaptError::Conversion("element type is not a simplex".into()))?;

    let owned = part.owned_elements(rank);
    let nodes: Vec<usize> = owned
        .iter()
        .flat_map(|&e| solver.element(e).iter().copied())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let mut mesh = build_elements(solver, &nodes, &owned, rank)?;

    // ranks owning an element that contains each sub-entity key
    let mut holders: HashMap<(EntityDim, Vec<u64>), BTreeSet<usize>> = HashMap::new();
    for e in 0..solver.n_elements() {
        let Some(owner) = part.element_owner(part.element_subdomain_to_global[e]) else {
            continue;
        };
        for sub in EntityDim::ALL[..cell.index()].iter().copied() {
            for local in simplex::sub_entities(cell, sub) {
                let key = global_key(part, solver.element(e), &local);
                holders.entry((sub, key)).or_default().insert(owner);
            }
        }
    }

    let global_of_vertex: HashMap<EntityHandle, u64> = mesh
        .handles(EntityDim::Vertex)
        .zip(&nodes)
        .map(|(v, &n)| (v, part.node_subdomain_to_global[n]))
        .collect();
    let mut keys = EntityKeys::new();
    let mut outgoing = Outgoing::new();
    for sub in EntityDim::ALL[..cell.index()].iter().copied() {
        for (handle, rec) in mesh.iter(sub) {
            let mut key: Vec<u64> = if sub == EntityDim::Vertex {
                vec![global_of_vertex[&handle]]
            } else {
                rec.vertices().iter().map(|v| global_of_vertex[v]).collect()
            };
            key.sort_unstable();
            if let Some(ranks) = holders.get(&(sub, key.clone())) {
                for &r in ranks.iter().filter(|&&r| r != rank) {
                    outgoing
                        .entry(r)
                        .or_default()
                        .push(WireMatch::new(sub.index(), &key, handle.to_wire()));
                }
            }
            keys.insert((sub, key), handle);
        }
    }
    Ok((mesh, keys, outgoing))
}

fn global_key(part: &PartitionedMesh, element: &[usize], local: &[usize]) -> Vec<u64> {
    let mut key: Vec<u64> = local
        .iter()
        .map(|&i| part.node_subdomain_to_global[element[i]])
        .collect();
    key.sort_unstable();
    key
}

fn match_remotes(
    mesh: &mut AdaptationMesh,
    keys: &EntityKeys,
    outgoing: &Outgoing,
    incoming: &BTreeMap<usize, Vec<WireMatch>>,
) -> Result<(), MeshAdaptError> {
    for (&peer, records) in incoming {
        for rec in records {
            let dim = EntityDim::from_index(rec.dim()).ok_or_else(|| MeshAdaptError::Comm {
                neighbor: peer,
                reason: format!("invalid entity dimension {}", rec.dim()),
            })?;
            let mine = keys.get(&(dim, rec.key())).ok_or_else(|| {
                MeshAdaptError::Conversion(format!(
                    "rank {peer} shares {dim:?} {:?} which this rank does not hold",
                    rec.key()
                ))
            })?;
            let theirs = EntityHandle::from_wire(dim, rec.handle())?;
            mesh.ownership_mut(*mine)?.add_remote(peer, theirs);
        }
    }
    // every entity announced to a peer must have been announced back
    for (&peer, records) in outgoing {
        for rec in records {
            let dim = EntityDim::from_index(rec.dim()).unwrap_or(EntityDim::Vertex);
            if let Some(&mine) = keys.get(&(dim, rec.key())) {
                if mesh.ownership(mine)?.remote(peer).is_none() {
                    return Err(MeshAdaptError::Conversion(format!(
                        "{mine} was not matched by rank {peer}"
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Create vertices for `nodes` (in that order) and cells for `elements`.
fn build_elements(
    solver: &SolverMesh,
    nodes: &[usize],
    elements: &[usize],
    rank: usize,
) -> Result<AdaptationMesh, MeshAdaptError> {
    solver
        .check_connectivity()
        .map_err(MeshAdaptError::Conversion)?;
    let cell = solver
        .cell_dim()
        .ok_or_else(|| MeshAdaptError::Conversion("element type is not a simplex".into()))?;
    let mut mesh = AdaptationMesh::new(cell, solver.n_space_dim, rank);
    mesh.set_source_node_count(solver.n_nodes());
    let mut vertex_of = HashMap::with_capacity(nodes.len());
    for &n in nodes {
        let v = mesh.add_vertex(solver.node_coords[n]);
        mesh.set_source_index(v, n);
        vertex_of.insert(n, v);
    }
    for &e in elements {
        let element = solver.element(e);
        let points: Vec<[f64; 3]> = element.iter().map(|&n| solver.node_coords[n]).collect();
        if metrics::is_degenerate(cell, &points)? {
            return Err(MeshAdaptError::Conversion(format!(
                "element {e} has zero measure"
            )));
        }
        let verts = element
            .iter()
            .map(|n| {
                vertex_of.get(n).copied().ok_or_else(|| {
                    MeshAdaptError::Conversion(format!("element {e} uses unconverted node {n}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let c = mesh.add_cell(&verts)?;
        mesh.set_source_index(c, e);
    }
    Ok(mesh)
}

/// Rebuild solver arrays from the adaptation mesh.
///
/// Nodes follow vertex iteration order and elements follow cell iteration
/// order; derived tables are recomputed. Material arrays come back zeroed;
/// callers restore them with
/// [`update_material_arrays`](crate::algs::tagger::update_material_arrays).
pub fn construct_solver_mesh_back(mesh: &AdaptationMesh) -> Result<SolverMesh, MeshAdaptError> {
    let cell = mesh.cell_dim();
    let npe = cell.simplex_vertex_count();
    let mut node_of = HashMap::with_capacity(mesh.count(EntityDim::Vertex));
    let mut coords = Vec::with_capacity(mesh.count(EntityDim::Vertex));
    for (v, rec) in mesh.iter(EntityDim::Vertex) {
        node_of.insert(v, coords.len());
        coords.push(rec.point());
    }

    let mut used = vec![false; coords.len()];
    let mut element_nodes = Vec::with_capacity(mesh.count(cell) * npe);
    for (c, rec) in mesh.iter(cell) {
        if rec.vertices().len() != npe {
            return Err(MeshAdaptError::Reconstruction(format!(
                "cell {c} has {} vertices, expected {npe}",
                rec.vertices().len()
            )));
        }
        for v in rec.vertices() {
            let &n = node_of.get(v).ok_or_else(|| {
                MeshAdaptError::Reconstruction(format!("cell {c} references missing vertex {v}"))
            })?;
            used[n] = true;
            element_nodes.push(n);
        }
    }
    if let Some(orphan) = used.iter().position(|&u| !u) {
        return Err(MeshAdaptError::Reconstruction(format!(
            "node {orphan} belongs to no element"
        )));
    }

    SolverMesh::from_elements(mesh.space_dim(), coords, element_nodes, npe)
        .map_err(|e| MeshAdaptError::Reconstruction(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::meshgen;

    #[test]
    fn serial_rectangle_counts() {
        let solver = meshgen::rectangle(2, 1, [0.0, 0.0], [2.0, 1.0]).unwrap();
        let mesh = construct_from_serial(&solver).unwrap();
        assert_eq!(mesh.count(EntityDim::Vertex), 6);
        assert_eq!(mesh.count(EntityDim::Face), 4);
        // 7 boundary edges of the 2x1 grid plus 2 diagonals
        assert_eq!(mesh.count(EntityDim::Edge), 9);
        assert_eq!(mesh.owned_count(EntityDim::Edge), 9);
    }

    #[test]
    fn serial_tets_share_faces() {
        let solver = meshgen::box_tets(1, 1, 1, [1.0, 1.0, 1.0]).unwrap();
        let mesh = construct_from_serial(&solver).unwrap();
        assert_eq!(mesh.count(EntityDim::Region), 6);
        // every interior face is stored once
        let n_faces = mesh.count(EntityDim::Face);
        assert_eq!(n_faces, solver.n_element_boundaries());
    }

    #[test]
    fn zero_measure_element_is_rejected() {
        let coords = vec![[0.0; 3], [1.0, 0.0, 0.0], [2.0, 0.0, 0.0]];
        let solver = SolverMesh::from_elements(2, coords, vec![0, 1, 2], 3).unwrap();
        assert!(matches!(
            construct_from_serial(&solver),
            Err(MeshAdaptError::Conversion(_))
        ));
    }

    #[test]
    fn repeated_node_is_rejected() {
        let coords = vec![[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        let solver = SolverMesh::from_elements(2, coords, vec![0, 1, 1], 3).unwrap();
        assert!(construct_from_serial(&solver).is_err());
    }

    #[test]
    fn back_conversion_round_trips() {
        let solver = meshgen::rectangle(3, 2, [0.0, 0.0], [1.0, 1.0]).unwrap();
        let mesh = construct_from_serial(&solver).unwrap();
        let back = construct_solver_mesh_back(&mesh).unwrap();
        assert_eq!(back.node_coords, solver.node_coords);
        assert_eq!(back.element_nodes, solver.element_nodes);
        assert_eq!(back.element_boundary_nodes, solver.element_boundary_nodes);
        assert_eq!(back.element_neighbors, solver.element_neighbors);
    }

    #[test]
    fn orphan_vertex_fails_reconstruction() {
        let solver = meshgen::line(2, 0.0, 1.0).unwrap();
        let mut mesh = construct_from_serial(&solver).unwrap();
        mesh.add_vertex([5.0, 0.0, 0.0]);
        assert!(matches!(
            construct_solver_mesh_back(&mesh),
            Err(MeshAdaptError::Reconstruction(_))
        ));
    }
}
