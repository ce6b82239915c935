//! Size-field computation, gradation smoothing and ghost exchange.
//!
//! Isotropic sizes map an error indicator `e ≥ 0` onto `[hmin, hmax]` by
//! `h = hmax · (hmin / hmax)^clamp(e / scale, 0, 1)`. Anisotropic sizes come
//! from a recovered Hessian. Smoothing limits the ratio of sizes across every
//! edge to `gradation`, only ever shrinking sizes.
//!
//! In parallel, every smoothing pass ends with one owner-reduce (min) and
//! ghost-broadcast round followed by an OR-reduce of "changed"; the field is
//! converged once a round changes nothing on any rank.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};

use log::{debug, warn};
use nalgebra::{Matrix3, Vector3};

use crate::algs::communicator::{agree, tags, Communicator};
use crate::algs::exchange::exchange_records;
use crate::algs::recovery::{self, Neighborhoods};
use crate::algs::wire::WireSize;
use crate::data::numbering::GlobalNumbering;
use crate::data::size_field::{SizeField, SizeTensor};
use crate::mesh::adaptation::AdaptationMesh;
use crate::mesh_error::MeshAdaptError;
use crate::topology::dimension::EntityDim;
use crate::topology::handle::EntityHandle;

/// Isotropic size for indicator `e`.
///
/// NaN and `+inf` give `hmin`; `e ≤ 0` gives `hmax`. The result is always in
/// `[hmin, hmax]` and does not increase with `e`.
pub fn isotropic_size(e: f64, hmin: f64, hmax: f64, scale: f64) -> f64 {
    let t = if e.is_nan() || e == f64::INFINITY {
        1.0
    } else if e <= 0.0 {
        0.0
    } else if !(scale > 0.0) {
        1.0
    } else {
        (e / scale).clamp(0.0, 1.0)
    };
    (hmax * (hmin / hmax).powf(t)).clamp(hmin, hmax)
}

/// Map an indicator onto isotropic sizes; `scale` is normally the global
/// maximum of the indicator.
pub fn calculate_isotropic(
    indicator: &BTreeMap<EntityHandle, f64>,
    hmin: f64,
    hmax: f64,
    scale: f64,
) -> SizeField {
    SizeField::Isotropic(
        indicator
            .iter()
            .map(|(&v, &e)| (v, isotropic_size(e, hmin, hmax, scale)))
            .collect(),
    )
}

/// Gradient magnitude of one field component at every vertex.
pub fn gradient_indicator(
    mesh: &AdaptationMesh,
    field: &str,
    component: usize,
) -> Result<BTreeMap<EntityHandle, f64>, MeshAdaptError> {
    let values = recovery::field_values(mesh, field, component)?;
    let grads = recovery::gradients(mesh, &values, &mesh.vertex_neighbors())?;
    Ok(grads.into_iter().map(|(v, g)| (v, g.norm())).collect())
}

/// Global maximum of an indicator over owned vertices, ignoring NaN.
pub fn indicator_scale<C>(
    mesh: &AdaptationMesh,
    indicator: &BTreeMap<EntityHandle, f64>,
    comm: &C,
) -> Result<f64, MeshAdaptError>
where
    C: Communicator + ?Sized,
{
    let local = indicator
        .iter()
        .filter(|(v, _)| mesh.is_owned(**v).unwrap_or(false))
        .map(|(_, &e)| e)
        .filter(|e| !e.is_nan())
        .fold(0.0_f64, f64::max);
    comm.all_reduce_max(tags::COLLECTIVE, local)
}

/// Hessian-based anisotropic sizes.
///
/// Eigen sizes are `sqrt(error_target / |λ|)` clamped to `[hmin, hmax]`;
/// directions the mesh does not span get `hmax`. Vertices whose fit fails
/// take the isotropic size from `fallback` (or `hmax` if absent).
pub fn calculate_anisotropic(
    mesh: &AdaptationMesh,
    field: &str,
    component: usize,
    hmin: f64,
    hmax: f64,
    error_target: f64,
    fallback: &BTreeMap<EntityHandle, f64>,
) -> Result<SizeField, MeshAdaptError> {
    if !(error_target > 0.0) {
        return Err(MeshAdaptError::SizeField(format!(
            "error target must be positive, got {error_target}"
        )));
    }
    let values = recovery::field_values(mesh, field, component)?;
    let neighbors = mesh.vertex_neighbors();
    let d = mesh.space_dim();
    let vertices: Vec<EntityHandle> = mesh.handles(EntityDim::Vertex).collect();
    let fit = |v: EntityHandle| recovery::hessian_at(mesh, &values, &neighbors, v).map(|h| (v, h));
    #[cfg(feature = "rayon")]
    let fits = {
        use rayon::prelude::*;
        vertices.par_iter().map(|&v| fit(v)).collect::<Result<Vec<_>, _>>()?
    };
    #[cfg(not(feature = "rayon"))]
    let fits = vertices.iter().map(|&v| fit(v)).collect::<Result<Vec<_>, _>>()?;

    let mut sizes = BTreeMap::new();
    let mut n_fallback = 0usize;
    for (v, hessian) in fits {
        let tensor = match hessian {
            Some(h) => hessian_to_sizes(h, d, hmin, hmax, error_target),
            None => {
                n_fallback += 1;
                SizeTensor::isotropic(fallback.get(&v).copied().unwrap_or(hmax))
            }
        };
        sizes.insert(v, tensor);
    }
    if n_fallback > 0 {
        debug!("anisotropic sizing fell back to isotropic at {n_fallback} vertices");
    }
    Ok(SizeField::Anisotropic(sizes))
}

fn hessian_to_sizes(h: Matrix3<f64>, d: usize, hmin: f64, hmax: f64, error_target: f64) -> SizeTensor {
    let block = h.view((0, 0), (d, d)).clone_owned();
    let eig = block.symmetric_eigen();
    let mut axes = Matrix3::identity();
    let mut sizes = [hmax; 3];
    for i in 0..d {
        let lambda = eig.eigenvalues[i].abs();
        sizes[i] = if lambda > 0.0 {
            (error_target / lambda).sqrt().clamp(hmin, hmax)
        } else {
            hmax
        };
        for r in 0..d {
            axes[(r, i)] = eig.eigenvectors[(r, i)];
        }
    }
    SizeTensor::from_eigen(sizes, axes)
}

/// Outcome of [`smooth`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SmoothReport {
    pub passes: usize,
    pub converged: bool,
}

/// Limit size ratios across edges to `gradation`. Collective over `comm`.
pub fn smooth<C>(
    mesh: &AdaptationMesh,
    size_field: &mut SizeField,
    gradation: f64,
    num_iter: usize,
    comm: &C,
) -> Result<SmoothReport, MeshAdaptError>
where
    C: Communicator + ?Sized,
{
    let checked = if gradation > 1.0 && num_iter >= 1 {
        Ok(())
    } else {
        Err(MeshAdaptError::SizeField(format!(
            "gradation {gradation} must exceed 1 and at least one pass is needed"
        )))
    };
    agree(comm, "smooth", checked)?;

    let neighbors = mesh.vertex_neighbors();
    let mut report = SmoothReport {
        passes: 0,
        converged: false,
    };
    while report.passes < num_iter {
        report.passes += 1;
        let settled = match size_field {
            SizeField::Isotropic(h) => {
                propagate_scalar(h, &neighbors, gradation);
                Ok(true)
            }
            SizeField::Anisotropic(t) => propagate_tensor(mesh, t, &neighbors, gradation),
        };
        let settled = agree(comm, "smooth", settled)?;
        let reduced = reduce_to_owners(mesh, size_field, comm)?;
        let broadcast = broadcast_from_owners(mesh, size_field, comm)?;
        if !comm.all_reduce_or(tags::COLLECTIVE, reduced || broadcast || !settled)? {
            report.converged = true;
            break;
        }
    }
    if report.converged {
        debug!("size field smoothed in {} passes", report.passes);
    } else {
        warn!(
            "size field smoothing did not converge in {} passes (gradation {gradation})",
            report.passes
        );
    }
    Ok(report)
}

/// Fail on the first local edge whose size ratio, measured along the edge,
/// exceeds `gradation`.
pub fn check_gradation(
    mesh: &AdaptationMesh,
    size_field: &SizeField,
    gradation: f64,
) -> Result<(), MeshAdaptError> {
    for (a, b, u) in edge_directions(mesh, &mesh.vertex_neighbors())? {
        let (Some(ha), Some(hb)) = (size_field.size_along(a, u), size_field.size_along(b, u)) else {
            return Err(MeshAdaptError::SizeField(format!(
                "edge {a}-{b} has a vertex without a size"
            )));
        };
        if exceeds(ha, hb, gradation) || exceeds(hb, ha, gradation) {
            return Err(MeshAdaptError::SizeField(format!(
                "sizes {ha} and {hb} across edge {a}-{b} break gradation {gradation}"
            )));
        }
    }
    Ok(())
}

/// Relative slack in the gradation test.
const GRADATION_TOL: f64 = 1e-9;

fn exceeds(h: f64, neighbor: f64, gradation: f64) -> bool {
    h > gradation * neighbor * (1.0 + GRADATION_TOL)
}

/// Unit direction of every edge, each reported once as `(a, b, b - a)`.
fn edge_directions(
    mesh: &AdaptationMesh,
    neighbors: &Neighborhoods,
) -> Result<Vec<(EntityHandle, EntityHandle, Vector3<f64>)>, MeshAdaptError> {
    let mut edges = Vec::new();
    for (&a, nbrs) in neighbors {
        for &b in nbrs.iter().filter(|&&b| a < b) {
            let (pa, pb) = (mesh.point(a)?, mesh.point(b)?);
            let dir = Vector3::new(pb[0] - pa[0], pb[1] - pa[1], pb[2] - pa[2]);
            if dir.norm() > 0.0 {
                edges.push((a, b, dir.normalize()));
            }
        }
    }
    Ok(edges)
}

/// Shortest-path style propagation: settle the smallest size first and cap
/// each neighbor at `gradation` times it.
fn propagate_scalar(h: &mut BTreeMap<EntityHandle, f64>, neighbors: &Neighborhoods, gradation: f64) {
    let mut heap: BinaryHeap<Reverse<(OrdF64, EntityHandle)>> =
        h.iter().map(|(&v, &s)| Reverse((OrdF64(s), v))).collect();
    while let Some(Reverse((OrdF64(s), v))) = heap.pop() {
        if h.get(&v).is_some_and(|&cur| cur < s) {
            continue; // stale
        }
        let cap = gradation * s;
        for n in neighbors.get(&v).into_iter().flatten() {
            if let Some(hn) = h.get_mut(n) {
                if *hn > cap {
                    *hn = cap;
                    heap.push(Reverse((OrdF64(cap), *n)));
                }
            }
        }
    }
}

/// Sweep edges, capping the tensor whose size along the edge exceeds
/// `gradation` times its neighbor's. Returns whether a sweep found no
/// violation before the sweep limit.
fn propagate_tensor(
    mesh: &AdaptationMesh,
    t: &mut BTreeMap<EntityHandle, SizeTensor>,
    neighbors: &Neighborhoods,
    gradation: f64,
) -> Result<bool, MeshAdaptError> {
    const MAX_SWEEPS: usize = 64;
    let edges = edge_directions(mesh, neighbors)?;
    // no eigen size drops below the smallest one present at the start
    let floor = t.values().map(SizeTensor::min_size).fold(f64::INFINITY, f64::min);
    for _ in 0..MAX_SWEEPS {
        let mut changed = false;
        for &(a, b, u) in &edges {
            let (Some(&ta), Some(&tb)) = (t.get(&a), t.get(&b)) else {
                continue;
            };
            let (ha, hb) = (ta.directional_size(u), tb.directional_size(u));
            let (v, capped) = if exceeds(ha, hb, gradation) {
                (a, ta.capped_along(u, gradation * hb, floor))
            } else if exceeds(hb, ha, gradation) {
                (b, tb.capped_along(u, gradation * ha, floor))
            } else {
                continue;
            };
            t.insert(v, capped);
            changed = true;
        }
        if !changed {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Ghost copies send their values to the owner, which keeps the minimum.
fn reduce_to_owners<C>(
    mesh: &AdaptationMesh,
    size_field: &mut SizeField,
    comm: &C,
) -> Result<bool, MeshAdaptError>
where
    C: Communicator + ?Sized,
{
    let rank = comm.rank();
    let mut outgoing: BTreeMap<usize, Vec<WireSize>> = BTreeMap::new();
    for (v, rec) in mesh.iter(EntityDim::Vertex) {
        let own = rec.ownership();
        if own.is_owned_by(rank) {
            continue;
        }
        if let (Some(remote), Some(values)) = (own.remote(own.owner()), size_field.wire_values(v)) {
            outgoing
                .entry(own.owner())
                .or_default()
                .push(WireSize::new(remote.to_wire(), &values));
        }
    }
    let incoming = exchange_records(comm, tags::SIZE_REDUCE, &outgoing)?;
    let applied = apply_incoming(&incoming, |v, values| {
        Ok(size_field.min_with_wire_values(v, values))
    });
    agree(comm, "size reduce", applied)
}

/// Owners send their values to every ghost copy.
fn broadcast_from_owners<C>(
    mesh: &AdaptationMesh,
    size_field: &mut SizeField,
    comm: &C,
) -> Result<bool, MeshAdaptError>
where
    C: Communicator + ?Sized,
{
    let rank = comm.rank();
    let mut outgoing: BTreeMap<usize, Vec<WireSize>> = BTreeMap::new();
    for (v, rec) in mesh.iter(EntityDim::Vertex) {
        let own = rec.ownership();
        if !own.is_owned_by(rank) {
            continue;
        }
        let Some(values) = size_field.wire_values(v) else {
            continue;
        };
        for (peer, remote) in own.remotes() {
            outgoing
                .entry(peer)
                .or_default()
                .push(WireSize::new(remote.to_wire(), &values));
        }
    }
    let incoming = exchange_records(comm, tags::SIZE_BCAST, &outgoing)?;
    let applied = apply_incoming(&incoming, |v, values| Ok(size_field.set_wire_values(v, values)));
    agree(comm, "size broadcast", applied)
}

fn apply_incoming(
    incoming: &BTreeMap<usize, Vec<WireSize>>,
    mut apply: impl FnMut(EntityHandle, [f64; 6]) -> Result<bool, MeshAdaptError>,
) -> Result<bool, MeshAdaptError> {
    let mut changed = false;
    for records in incoming.values() {
        for rec in records {
            let v = EntityHandle::from_wire(EntityDim::Vertex, rec.key())?;
            changed |= apply(v, rec.values())?;
        }
    }
    Ok(changed)
}

/// Give every ghost vertex its owner's value. Records are keyed by vertex
/// global id. Collective over `comm`.
pub fn communicate<C>(
    mesh: &AdaptationMesh,
    size_field: &mut SizeField,
    numbering: &GlobalNumbering,
    comm: &C,
) -> Result<(), MeshAdaptError>
where
    C: Communicator + ?Sized,
{
    let rank = comm.rank();
    let mut outgoing: BTreeMap<usize, Vec<WireSize>> = BTreeMap::new();
    let mut local = Ok(());
    for (v, rec) in mesh.iter(EntityDim::Vertex) {
        let own = rec.ownership();
        if !own.is_owned_by(rank) || !own.is_shared() {
            continue;
        }
        let (Some(values), Ok(gid)) = (size_field.wire_values(v), numbering.id(v)) else {
            local = Err(MeshAdaptError::SizeField(format!(
                "owned vertex {v} has no size or global id"
            )));
            continue;
        };
        for (peer, _) in own.remotes() {
            outgoing
                .entry(peer)
                .or_default()
                .push(WireSize::new(gid, &values));
        }
    }
    agree(comm, "size exchange", local)?;

    let incoming = exchange_records(comm, tags::SIZE_BCAST, &outgoing)?;
    let mut applied = Ok(());
    'records: for (&peer, records) in &incoming {
        for rec in records {
            match numbering.handle_of(rec.key()) {
                Some(v) if mesh.ownership(v).is_ok_and(|o| o.owner() == peer) => {
                    size_field.set_wire_values(v, rec.values());
                }
                _ => {
                    applied = Err(MeshAdaptError::SizeField(format!(
                        "rank {peer} sent a size for vertex id {} it does not own here",
                        rec.key()
                    )));
                    break 'records;
                }
            }
        }
    }
    agree(comm, "size exchange", applied)
}

/// Total order over non-NaN sizes for the propagation heap.
#[derive(Clone, Copy, Debug, PartialEq)]
struct OrdF64(f64);

impl Eq for OrdF64 {}

impl PartialOrd for OrdF64 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrdF64 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::algs::convert::construct_from_serial;
    use crate::algs::field_transfer::to_adaptation;
    use crate::algs::meshgen;
    use approx::assert_relative_eq;

    #[test]
    fn isotropic_edges() {
        assert_eq!(isotropic_size(0.0, 0.01, 1.0, 2.0), 1.0);
        assert_eq!(isotropic_size(-3.0, 0.01, 1.0, 2.0), 1.0);
        assert_relative_eq!(isotropic_size(2.0, 0.01, 1.0, 2.0), 0.01, epsilon = 1e-15);
        assert_relative_eq!(isotropic_size(1.0, 0.01, 1.0, 2.0), 0.1, epsilon = 1e-12);
        assert_eq!(isotropic_size(f64::NAN, 0.01, 1.0, 2.0), 0.01);
        assert_eq!(isotropic_size(f64::INFINITY, 0.01, 1.0, 2.0), 0.01);
        assert_eq!(isotropic_size(1e300, 0.01, 1.0, 2.0), 0.01);
    }

    #[test]
    fn scalar_smoothing_bounds_ratio_and_only_shrinks() {
        let solver = meshgen::line(10, 0.0, 1.0).unwrap();
        let mesh = construct_from_serial(&solver).unwrap();
        let verts: Vec<EntityHandle> = mesh.handles(EntityDim::Vertex).collect();
        let mut h: BTreeMap<EntityHandle, f64> = verts.iter().map(|&v| (v, 1.0)).collect();
        h.insert(verts[5], 0.01);
        let before = h.clone();
        let mut sf = SizeField::Isotropic(h);
        let report = smooth(&mesh, &mut sf, 1.5, 5, &NoComm).unwrap();
        assert!(report.converged);
        assert_eq!(report.passes, 1);
        for (a, b) in mesh.edge_pairs() {
            let (ha, hb) = (sf.size_at(a).unwrap(), sf.size_at(b).unwrap());
            assert!(ha <= 1.5 * hb * (1.0 + 1e-12));
        }
        for (v, h0) in before {
            assert!(sf.size_at(v).unwrap() <= h0);
        }
        assert_relative_eq!(sf.size_at(verts[7]).unwrap(), 0.0225, epsilon = 1e-12);
    }

    #[test]
    fn anisotropic_sizes_follow_curvature() {
        // u = 50 x²: strong curvature along x only
        let solver = meshgen::rectangle(6, 6, [0.0, 0.0], [1.0, 1.0]).unwrap();
        let buffer: Vec<f64> = solver.node_coords.iter().map(|x| 50.0 * x[0] * x[0]).collect();
        let mut mesh = construct_from_serial(&solver).unwrap();
        to_adaptation(&mut mesh, "u", &buffer, 1, solver.n_nodes()).unwrap();
        let sf = calculate_anisotropic(&mesh, "u", 0, 1e-3, 1.0, 0.01, &BTreeMap::new()).unwrap();
        let SizeField::Anisotropic(t) = &sf else {
            panic!("expected tensors");
        };
        for tensor in t.values() {
            let hx = tensor.directional_size(Vector3::x());
            let hy = tensor.directional_size(Vector3::y());
            // |λ| = 100 → sqrt(0.01 / 100) = 0.01
            assert_relative_eq!(hx, 0.01, epsilon = 1e-6);
            assert_relative_eq!(hy, 1.0, epsilon = 1e-6);
        }
        sf.validate(&mesh, 1e-3, 1.0).unwrap();
    }

    #[test]
    fn tensor_smoothing_caps_the_long_axis_across_a_slanted_edge() {
        let mut mesh = AdaptationMesh::new(EntityDim::Edge, 2, 0);
        let a = mesh.add_vertex([0.0, 0.0, 0.0]);
        let b = mesh.add_vertex([0.05, 0.05 * 3f64.sqrt(), 0.0]);
        mesh.add_cell(&[a, b]).unwrap();
        let mut t = BTreeMap::new();
        t.insert(a, SizeTensor::from_eigen([0.02, 100.0, 50.0], Matrix3::identity()));
        t.insert(b, SizeTensor::isotropic(0.0264));
        let mut sf = SizeField::Anisotropic(t);

        // along the 60° edge a starts at 0.04, over 1.5 x 0.0264
        check_gradation(&mesh, &sf, 1.5).unwrap_err();
        let report = smooth(&mesh, &mut sf, 1.5, 5, &NoComm).unwrap();
        assert!(report.converged);
        check_gradation(&mesh, &sf, 1.5).unwrap();
        sf.validate(&mesh, 0.02, 100.0).unwrap();
        let SizeField::Anisotropic(t) = &sf else {
            panic!("expected tensors");
        };
        assert_relative_eq!(t[&a].directional_size(Vector3::x()), 0.02, max_relative = 1e-9);
        assert_eq!(t[&b], SizeTensor::isotropic(0.0264));
    }

    #[test]
    fn gradation_check_reports_steep_edges() {
        let mesh = construct_from_serial(&meshgen::line(2, 0.0, 1.0).unwrap()).unwrap();
        let verts: Vec<EntityHandle> = mesh.handles(EntityDim::Vertex).collect();
        let steep = SizeField::Isotropic(verts.iter().zip([0.1, 0.5, 0.5]).map(|(&v, h)| (v, h)).collect());
        assert!(matches!(
            check_gradation(&mesh, &steep, 2.0),
            Err(MeshAdaptError::SizeField(_))
        ));
        check_gradation(&mesh, &steep, 5.0).unwrap();
    }

    #[test]
    fn bad_gradation_is_rejected() {
        let solver = meshgen::line(2, 0.0, 1.0).unwrap();
        let mesh = construct_from_serial(&solver).unwrap();
        let mut sf = SizeField::Isotropic(BTreeMap::new());
        assert!(smooth(&mesh, &mut sf, 1.0, 3, &NoComm).is_err());
        assert!(smooth(&mesh, &mut sf, 2.0, 0, &NoComm).is_err());
    }
}
