//! Reference engine for segment meshes.
//!
//! The mesh is cut into chains of segments between anchor vertices: chain
//! ends, vertices shared with other ranks, vertices with a non-zero tag and
//! vertices where the cell tag changes. Anchors never move. Between two
//! anchors, vertices are redistributed so every new segment has unit length
//! in the metric of the size field; with `h` varying linearly along a segment
//! of length `L` that metric length is `L · ln(h1 / h0) / (h1 - h0)`.

use std::collections::{BTreeMap, BTreeSet};

use log::trace;
use nalgebra::Vector3;

use crate::data::size_field::SizeField;
use crate::engine::{AdaptEngine, AdaptReport};
use crate::geometry::metrics;
use crate::mesh::adaptation::AdaptationMesh;
use crate::topology::dimension::EntityDim;
use crate::topology::handle::EntityHandle;
use crate::topology::labels::Material;

#[derive(Clone, Debug, Default)]
pub struct LineRemesher;

impl LineRemesher {
    pub fn new() -> Self {
        LineRemesher
    }
}

struct Chain {
    vertices: Vec<EntityHandle>,
    cells: Vec<EntityHandle>,
    forward: bool,
    tag: Option<i32>,
}

/// New interior vertices of one chain.
struct Plan {
    points: Vec<[f64; 3]>,
    fields: Vec<(String, Vec<Vec<f64>>)>,
}

impl AdaptEngine for LineRemesher {
    fn name(&self) -> &str {
        "line-remesher"
    }

    fn adapt(&mut self, mesh: &mut AdaptationMesh, size_field: &SizeField) -> Result<AdaptReport, String> {
        if mesh.cell_dim() != EntityDim::Edge {
            return Err(format!(
                "only segment meshes can be remeshed, got {:?} cells",
                mesh.cell_dim()
            ));
        }
        let mut report = AdaptReport::start(mesh);
        let chains = chains(mesh)?;
        let plans = chains
            .iter()
            .map(|chain| plan(mesh, size_field, chain))
            .collect::<Result<Vec<_>, _>>()?;

        for (chain, plan) in chains.iter().zip(plans) {
            let (created, removed) = apply(mesh, chain, plan)?;
            report.vertices_created += created;
            report.vertices_removed += removed;
        }
        mesh.check_cells()?;
        mesh.clear_sources();
        let report = report.finish(mesh);
        trace!("line remesher: {report:?}");
        Ok(report)
    }
}

fn chains(mesh: &AdaptationMesh) -> Result<Vec<Chain>, String> {
    let mut cells_of: BTreeMap<EntityHandle, Vec<EntityHandle>> = BTreeMap::new();
    for (c, rec) in mesh.iter(EntityDim::Edge) {
        for &v in rec.vertices() {
            cells_of.entry(v).or_default().push(c);
        }
    }
    let mut anchors: BTreeSet<EntityHandle> = BTreeSet::new();
    for (&v, cells) in &cells_of {
        let shared = mesh.ownership(v).map_err(|e| e.to_string())?.is_shared();
        let tagged = mesh.is_tagged(v);
        let tag_change = cells.len() == 2
            && mesh.tag(Material::Element, cells[0]) != mesh.tag(Material::Element, cells[1]);
        if cells.len() != 2 || shared || tagged || tag_change {
            anchors.insert(v);
        }
    }

    let mut visited = BTreeSet::new();
    let mut out = Vec::new();
    let starts: Vec<EntityHandle> = anchors.iter().copied().collect();
    for start in starts {
        for &c in &cells_of[&start] {
            if !visited.contains(&c) {
                out.push(walk(mesh, &cells_of, &anchors, &mut visited, start, c)?);
            }
        }
    }
    // closed loops without anchors: anchor them at their lowest vertex
    loop {
        let next = mesh
            .iter(EntityDim::Edge)
            .find(|(c, _)| !visited.contains(c))
            .map(|(c, rec)| (c, rec.vertices()[0]));
        let Some((c, start)) = next else {
            break;
        };
        anchors.insert(start);
        out.push(walk(mesh, &cells_of, &anchors, &mut visited, start, c)?);
    }
    Ok(out)
}

fn walk(
    mesh: &AdaptationMesh,
    cells_of: &BTreeMap<EntityHandle, Vec<EntityHandle>>,
    anchors: &BTreeSet<EntityHandle>,
    visited: &mut BTreeSet<EntityHandle>,
    start: EntityHandle,
    first: EntityHandle,
) -> Result<Chain, String> {
    let first_verts = mesh.vertices_of(first).map_err(|e| e.to_string())?;
    let forward = first_verts[0] == start;
    let tag = mesh.tag(Material::Element, first);
    let mut vertices = vec![start];
    let mut cells = Vec::new();
    let (mut cur, mut cell) = (start, first);
    loop {
        visited.insert(cell);
        cells.push(cell);
        let verts = mesh.vertices_of(cell).map_err(|e| e.to_string())?;
        let next = if verts[0] == cur { verts[1] } else { verts[0] };
        vertices.push(next);
        if anchors.contains(&next) {
            break;
        }
        let Some(&following) = cells_of[&next].iter().find(|&&c| c != cell) else {
            break;
        };
        cur = next;
        cell = following;
    }
    Ok(Chain {
        vertices,
        cells,
        forward,
        tag,
    })
}

fn plan(mesh: &AdaptationMesh, size_field: &SizeField, chain: &Chain) -> Result<Plan, String> {
    let points = chain
        .vertices
        .iter()
        .map(|&v| mesh.point(v))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| e.to_string())?;

    // per-segment metric length
    let mut segs = Vec::with_capacity(chain.cells.len());
    for i in 0..chain.cells.len() {
        let (a, b) = (points[i], points[i + 1]);
        let d = Vector3::new(b[0] - a[0], b[1] - a[1], b[2] - a[2]);
        let len = d.norm();
        if len <= metrics::DEGENERATE_EPS {
            return Err(format!("segment {} has zero length", chain.cells[i]));
        }
        let u = d / len;
        let size = |v: EntityHandle| {
            size_field
                .size_along(v, u)
                .filter(|h| h.is_finite() && *h > 0.0)
                .ok_or_else(|| format!("vertex {v} has no usable size"))
        };
        let (h0, h1) = (size(chain.vertices[i])?, size(chain.vertices[i + 1])?);
        segs.push((len, h0, h1, metric_length(len, h0, h1)));
    }
    let total: f64 = segs.iter().map(|s| s.3).sum();
    let n_new = (total.round() as usize).max(1);

    let names: Vec<String> = mesh.field_names().map(str::to_string).collect();
    let mut fields: Vec<(String, Vec<Vec<f64>>)> =
        names.iter().map(|n| (n.clone(), Vec::new())).collect();
    let mut new_points = Vec::with_capacity(n_new.saturating_sub(1));
    let mut seg = 0;
    let mut before = 0.0;
    for k in 1..n_new {
        let target = total * k as f64 / n_new as f64;
        while seg + 1 < segs.len() && before + segs[seg].3 < target {
            before += segs[seg].3;
            seg += 1;
        }
        let (len, h0, h1, m_seg) = segs[seg];
        let t = position_in_segment(target - before, len, h0, h1, m_seg);
        let (a, b) = (points[seg], points[seg + 1]);
        new_points.push([
            a[0] + t * (b[0] - a[0]),
            a[1] + t * (b[1] - a[1]),
            a[2] + t * (b[2] - a[2]),
        ]);
        for (name, values) in fields.iter_mut() {
            let Some(field) = mesh.field(name) else {
                continue;
            };
            let fa = field.get(chain.vertices[seg]).map_err(|e| e.to_string())?;
            let fb = field.get(chain.vertices[seg + 1]).map_err(|e| e.to_string())?;
            values.push(fa.iter().zip(fb).map(|(x, y)| x + t * (y - x)).collect());
        }
    }

    // new vertices must advance strictly along the chain
    let mut prev = points[0];
    for p in new_points.iter().chain(std::iter::once(&points[points.len() - 1])) {
        if metrics::distance(prev, *p) <= metrics::DEGENERATE_EPS {
            return Err("remeshed segment would have zero length".to_string());
        }
        prev = *p;
    }
    Ok(Plan {
        points: new_points,
        fields,
    })
}

fn metric_length(len: f64, h0: f64, h1: f64) -> f64 {
    if (h1 - h0).abs() <= 1e-12 * h0.max(h1) {
        2.0 * len / (h0 + h1)
    } else {
        len * (h1 / h0).ln() / (h1 - h0)
    }
}

/// Parameter `t ∈ [0, 1]` at metric distance `m` into a segment.
fn position_in_segment(m: f64, len: f64, h0: f64, h1: f64, m_seg: f64) -> f64 {
    let t = if (h1 - h0).abs() <= 1e-12 * h0.max(h1) {
        m / m_seg
    } else {
        h0 * ((m * (h1 - h0) / len).exp() - 1.0) / (h1 - h0)
    };
    t.clamp(0.0, 1.0)
}

fn apply(mesh: &mut AdaptationMesh, chain: &Chain, plan: Plan) -> Result<(usize, usize), String> {
    let n = chain.vertices.len();
    for &c in &chain.cells {
        mesh.remove(c).map_err(|e| e.to_string())?;
    }
    let interior = &chain.vertices[1..n - 1];
    for &v in interior {
        mesh.remove(v).map_err(|e| e.to_string())?;
    }

    let mut vertices = Vec::with_capacity(plan.points.len() + 2);
    vertices.push(chain.vertices[0]);
    for (k, &p) in plan.points.iter().enumerate() {
        let v = mesh.add_vertex(p);
        for (name, values) in &plan.fields {
            if let Some(field) = mesh.field_mut(name) {
                field.set(v, &values[k]).map_err(|e| e.to_string())?;
            }
        }
        vertices.push(v);
    }
    vertices.push(chain.vertices[n - 1]);

    for pair in vertices.windows(2) {
        let cell = if chain.forward {
            [pair[0], pair[1]]
        } else {
            [pair[1], pair[0]]
        };
        let c = mesh.add_cell(&cell).map_err(|e| e.to_string())?;
        if let Some(tag) = chain.tag {
            mesh.set_tag(Material::Element, c, tag).map_err(|e| e.to_string())?;
        }
    }
    Ok((plan.points.len(), interior.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::convert::construct_from_serial;
    use crate::algs::meshgen;
    use approx::assert_relative_eq;

    fn uniform(mesh: &AdaptationMesh, h: f64) -> SizeField {
        SizeField::Isotropic(mesh.handles(EntityDim::Vertex).map(|v| (v, h)).collect())
    }

    #[test]
    fn uniform_size_sets_segment_count() {
        let solver = meshgen::line(4, 0.0, 1.0).unwrap();
        let mut mesh = construct_from_serial(&solver).unwrap();
        let sf = uniform(&mesh, 0.1);
        let report = LineRemesher.adapt(&mut mesh, &sf).unwrap();
        assert_eq!(report.cells_after, 10);
        assert_eq!(report.vertices_after, 11);
        let mut xs: Vec<f64> = mesh
            .handles(EntityDim::Vertex)
            .map(|v| mesh.point(v).unwrap()[0])
            .collect();
        xs.sort_by(f64::total_cmp);
        for w in xs.windows(2) {
            assert_relative_eq!(w[1] - w[0], 0.1, epsilon = 1e-9);
        }
    }

    #[test]
    fn fields_are_interpolated_linearly() {
        let solver = meshgen::line(2, 0.0, 1.0).unwrap();
        let mut mesh = construct_from_serial(&solver).unwrap();
        let buffer: Vec<f64> = solver.node_coords.iter().map(|x| 3.0 * x[0]).collect();
        crate::algs::field_transfer::to_adaptation(&mut mesh, "u", &buffer, 1, 3).unwrap();
        let sf = uniform(&mesh, 0.25);
        LineRemesher.adapt(&mut mesh, &sf).unwrap();
        let field = mesh.field("u").unwrap();
        for v in mesh.handles(EntityDim::Vertex) {
            let x = mesh.point(v).unwrap()[0];
            assert_relative_eq!(field.get(v).unwrap()[0], 3.0 * x, epsilon = 1e-12);
        }
    }

    #[test]
    fn tagged_vertex_stays_put() {
        let solver = meshgen::line(4, 0.0, 1.0).unwrap();
        let mut mesh = construct_from_serial(&solver).unwrap();
        let mid = mesh.handles(EntityDim::Vertex).nth(2).unwrap();
        mesh.set_tag(Material::Boundary, mid, 5).unwrap();
        let sf = uniform(&mesh, 0.2);
        LineRemesher.adapt(&mut mesh, &sf).unwrap();
        assert!(mesh.contains(mid));
        assert_eq!(mesh.point(mid).unwrap()[0], 0.5);
    }

    #[test]
    fn metric_length_matches_integral() {
        // ∫0^1 dx / (1 + x) = ln 2
        assert_relative_eq!(metric_length(1.0, 1.0, 2.0), 2f64.ln(), epsilon = 1e-14);
        let t = position_in_segment(metric_length(1.0, 1.0, 2.0), 1.0, 1.0, 2.0, 2f64.ln());
        assert_relative_eq!(t, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn triangles_are_rejected() {
        let solver = meshgen::rectangle(1, 1, [0.0, 0.0], [1.0, 1.0]).unwrap();
        let mut mesh = construct_from_serial(&solver).unwrap();
        let sf = uniform(&mesh, 0.1);
        assert!(LineRemesher.adapt(&mut mesh, &sf).is_err());
    }
}
