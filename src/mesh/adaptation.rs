//! Engine-side entity mesh.
//!
//! [`AdaptationMesh`] keeps one stratum of entities per [`EntityDim`]. Every
//! non-vertex entity stores its vertex list in creation order, which is the
//! element-node order for cells. A lookup keyed by the sorted vertex list
//! finds an entity from its vertices, so an edge or face shared by several
//! cells exists exactly once.
//!
//! Each entity carries an [`Ownership`]; material tags live in a [`LabelSet`]
//! with one label per [`Material`] kind; vertex fields are attached by name.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::data::field::Field;
use crate::geometry::metrics;
use crate::mesh_error::MeshAdaptError;
use crate::topology::dimension::EntityDim;
use crate::topology::handle::EntityHandle;
use crate::topology::labels::{LabelSet, Material};
use crate::topology::ownership::Ownership;
use crate::topology::simplex;

#[derive(Clone, Debug, PartialEq)]
pub struct EntityRecord {
    vertices: Vec<EntityHandle>,
    point: [f64; 3],
    ownership: Ownership,
}

impl EntityRecord {
    /// Vertices of the entity; empty for vertices themselves.
    pub fn vertices(&self) -> &[EntityHandle] {
        &self.vertices
    }

    /// Coordinates; only meaningful for vertices.
    pub fn point(&self) -> [f64; 3] {
        self.point
    }

    pub fn ownership(&self) -> &Ownership {
        &self.ownership
    }
}

#[derive(Clone, Debug, Default)]
struct Stratum {
    slots: Vec<Option<EntityRecord>>,
    live: usize,
}

#[derive(Clone, Debug)]
pub struct AdaptationMesh {
    cell_dim: EntityDim,
    space_dim: usize,
    rank: usize,
    strata: [Stratum; 4],
    lookup: HashMap<Vec<EntityHandle>, EntityHandle>,
    labels: LabelSet,
    fields: BTreeMap<String, Field>,
    source: HashMap<EntityHandle, usize>,
    source_nodes: usize,
}

impl AdaptationMesh {
    /// Empty mesh whose cells have dimension `cell_dim`, held by `rank`.
    pub fn new(cell_dim: EntityDim, space_dim: usize, rank: usize) -> Self {
        Self {
            cell_dim,
            space_dim,
            rank,
            strata: Default::default(),
            lookup: HashMap::new(),
            labels: LabelSet::new(),
            fields: BTreeMap::new(),
            source: HashMap::new(),
            source_nodes: 0,
        }
    }

    pub fn cell_dim(&self) -> EntityDim {
        self.cell_dim
    }

    pub fn space_dim(&self) -> usize {
        self.space_dim
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Number of live entities of dimension `dim`.
    pub fn count(&self, dim: EntityDim) -> usize {
        self.strata[dim.index()].live
    }

    /// Number of live entities of dimension `dim` owned by this rank.
    pub fn owned_count(&self, dim: EntityDim) -> usize {
        self.iter(dim)
            .filter(|(_, rec)| rec.ownership.is_owned_by(self.rank))
            .count()
    }

    /// Number of vertex storage slots, including removed ones.
    pub fn vertex_slots(&self) -> usize {
        self.strata[EntityDim::Vertex.index()].slots.len()
    }

    pub fn add_vertex(&mut self, point: [f64; 3]) -> EntityHandle {
        let handle = self.push(
            EntityDim::Vertex,
            EntityRecord {
                vertices: Vec::new(),
                point,
                ownership: Ownership::local(self.rank),
            },
        );
        let slots = self.vertex_slots();
        for field in self.fields.values_mut() {
            field.ensure_slots(slots);
        }
        handle
    }

    /// Find the entity spanned by `vertices`, creating it when absent.
    ///
    /// Returns the handle and whether it was newly created. The dimension is
    /// implied by the vertex count.
    pub fn find_or_add(
        &mut self,
        vertices: &[EntityHandle],
    ) -> Result<(EntityHandle, bool), MeshAdaptError> {
        let dim = match vertices.len() {
            2 => EntityDim::Edge,
            3 => EntityDim::Face,
            4 => EntityDim::Region,
            n => {
                return Err(MeshAdaptError::Conversion(format!(
                    "cannot build a simplex from {n} vertices"
                )));
            }
        };
        for &v in vertices {
            if v.dim() != EntityDim::Vertex || !self.contains(v) {
                return Err(MeshAdaptError::MissingEntity(v));
            }
        }
        let key = sorted_key(vertices);
        if key.windows(2).any(|w| w[0] == w[1]) {
            return Err(MeshAdaptError::Conversion(format!(
                "repeated vertex in {dim:?} {vertices:?}"
            )));
        }
        if let Some(&existing) = self.lookup.get(&key) {
            return Ok((existing, false));
        }
        let handle = self.push(
            dim,
            EntityRecord {
                vertices: vertices.to_vec(),
                point: [0.0; 3],
                ownership: Ownership::local(self.rank),
            },
        );
        self.lookup.insert(key, handle);
        Ok((handle, true))
    }

    /// Add a cell together with the edges and faces of its closure.
    ///
    /// Fails if the vertex count does not match the cell dimension or a cell
    /// on the same vertex set already exists.
    pub fn add_cell(&mut self, vertices: &[EntityHandle]) -> Result<EntityHandle, MeshAdaptError> {
        let cell = self.cell_dim;
        if vertices.len() != cell.simplex_vertex_count() {
            return Err(MeshAdaptError::Conversion(format!(
                "{cell:?} cell needs {} vertices, got {}",
                cell.simplex_vertex_count(),
                vertices.len()
            )));
        }
        let (handle, created) = self.find_or_add(vertices)?;
        if !created {
            return Err(MeshAdaptError::Conversion(format!(
                "duplicate cell on vertices {vertices:?}"
            )));
        }
        for sub in EntityDim::ALL[1..cell.index()].iter().copied() {
            for local in simplex::sub_entities(cell, sub) {
                let verts: Vec<EntityHandle> = local.iter().map(|&i| vertices[i]).collect();
                self.find_or_add(&verts)?;
            }
        }
        Ok(handle)
    }

    /// Entity spanned by exactly `vertices` (any order).
    pub fn find(&self, vertices: &[EntityHandle]) -> Option<EntityHandle> {
        if vertices.len() == 1 {
            return self.contains(vertices[0]).then_some(vertices[0]);
        }
        self.lookup.get(&sorted_key(vertices)).copied()
    }

    /// Remove an entity. Removing a vertex still referenced by a live entity
    /// is the caller's responsibility to avoid.
    pub fn remove(&mut self, handle: EntityHandle) -> Result<(), MeshAdaptError> {
        let stratum = &mut self.strata[handle.dim().index()];
        let record = stratum
            .slots
            .get_mut(handle.index())
            .and_then(Option::take)
            .ok_or(MeshAdaptError::MissingEntity(handle))?;
        stratum.live -= 1;
        if !record.vertices.is_empty() {
            self.lookup.remove(&sorted_key(&record.vertices));
        }
        self.labels.clear_points([handle]);
        self.source.remove(&handle);
        Ok(())
    }

    pub fn contains(&self, handle: EntityHandle) -> bool {
        self.strata[handle.dim().index()]
            .slots
            .get(handle.index())
            .is_some_and(Option::is_some)
    }

    pub fn entity(&self, handle: EntityHandle) -> Result<&EntityRecord, MeshAdaptError> {
        self.strata[handle.dim().index()]
            .slots
            .get(handle.index())
            .and_then(Option::as_ref)
            .ok_or(MeshAdaptError::MissingEntity(handle))
    }

    fn entity_mut(&mut self, handle: EntityHandle) -> Result<&mut EntityRecord, MeshAdaptError> {
        self.strata[handle.dim().index()]
            .slots
            .get_mut(handle.index())
            .and_then(Option::as_mut)
            .ok_or(MeshAdaptError::MissingEntity(handle))
    }

    pub fn vertices_of(&self, handle: EntityHandle) -> Result<&[EntityHandle], MeshAdaptError> {
        Ok(self.entity(handle)?.vertices())
    }

    pub fn point(&self, vertex: EntityHandle) -> Result<[f64; 3], MeshAdaptError> {
        if vertex.dim() != EntityDim::Vertex {
            return Err(MeshAdaptError::MissingEntity(vertex));
        }
        Ok(self.entity(vertex)?.point)
    }

    /// Coordinates of the vertices of `handle`, in stored order.
    pub fn entity_points(&self, handle: EntityHandle) -> Result<Vec<[f64; 3]>, MeshAdaptError> {
        if handle.dim() == EntityDim::Vertex {
            return Ok(vec![self.point(handle)?]);
        }
        self.vertices_of(handle)?
            .iter()
            .map(|&v| self.point(v))
            .collect()
    }

    /// Live entities of dimension `dim`, ascending by handle.
    pub fn iter(&self, dim: EntityDim) -> impl Iterator<Item = (EntityHandle, &EntityRecord)> + '_ {
        self.strata[dim.index()]
            .slots
            .iter()
            .enumerate()
            .filter_map(move |(idx, slot)| {
                slot.as_ref()
                    .map(|rec| (EntityHandle::from_index(dim, idx), rec))
            })
    }

    pub fn handles(&self, dim: EntityDim) -> impl Iterator<Item = EntityHandle> + '_ {
        self.iter(dim).map(|(h, _)| h)
    }

    pub fn ownership(&self, handle: EntityHandle) -> Result<&Ownership, MeshAdaptError> {
        Ok(&self.entity(handle)?.ownership)
    }

    pub fn ownership_mut(&mut self, handle: EntityHandle) -> Result<&mut Ownership, MeshAdaptError> {
        Ok(&mut self.entity_mut(handle)?.ownership)
    }

    pub fn is_owned(&self, handle: EntityHandle) -> Result<bool, MeshAdaptError> {
        Ok(self.ownership(handle)?.is_owned_by(self.rank))
    }

    /// Material tag of kind `kind` on an entity.
    pub fn tag(&self, kind: Material, handle: EntityHandle) -> Option<i32> {
        self.labels.get_label(handle, kind.label())
    }

    /// Attach a material tag; returns the previous value of that kind.
    pub fn set_tag(
        &mut self,
        kind: Material,
        handle: EntityHandle,
        value: i32,
    ) -> Result<Option<i32>, MeshAdaptError> {
        if !self.contains(handle) {
            return Err(MeshAdaptError::MissingEntity(handle));
        }
        Ok(self.labels.set_label(handle, kind.label(), value))
    }

    /// True if any material on `handle` is nonzero.
    pub fn is_tagged(&self, handle: EntityHandle) -> bool {
        Material::ALL
            .into_iter()
            .any(|kind| self.tag(kind, handle).is_some_and(|t| t != 0))
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    /// Index of the solver node (for vertices) or element (for cells) this
    /// entity was converted from.
    pub fn source_index(&self, handle: EntityHandle) -> Option<usize> {
        self.source.get(&handle).copied()
    }

    pub(crate) fn set_source_index(&mut self, handle: EntityHandle, index: usize) {
        self.source.insert(handle, index);
    }

    /// Vertices keyed by the solver node they were converted from.
    pub fn vertices_by_source(&self) -> HashMap<usize, EntityHandle> {
        self.source
            .iter()
            .filter(|(h, _)| h.dim() == EntityDim::Vertex)
            .map(|(&h, &n)| (n, h))
            .collect()
    }

    /// Length of the solver node array the mesh was converted from.
    pub fn source_node_count(&self) -> usize {
        self.source_nodes
    }

    pub(crate) fn set_source_node_count(&mut self, n_nodes: usize) {
        self.source_nodes = n_nodes;
    }

    /// Forget conversion sources once the topology no longer matches them.
    pub fn clear_sources(&mut self) {
        self.source.clear();
        self.source_nodes = 0;
    }

    /// Attach (or replace) a vertex field with `components` entries per vertex.
    pub fn attach_field(&mut self, name: &str, components: usize) -> &mut Field {
        let field = Field::new(name, components, self.vertex_slots());
        match self.fields.entry(name.to_string()) {
            Entry::Occupied(mut slot) => {
                slot.insert(field);
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(field),
        }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.get_mut(name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.fields.keys().map(String::as_str)
    }

    /// Vertex adjacency through edges, ascending by handle.
    pub fn vertex_neighbors(&self) -> BTreeMap<EntityHandle, BTreeSet<EntityHandle>> {
        let mut adjacency: BTreeMap<EntityHandle, BTreeSet<EntityHandle>> =
            self.handles(EntityDim::Vertex).map(|v| (v, BTreeSet::new())).collect();
        for (_, edge) in self.iter(EntityDim::Edge) {
            if let [a, b] = edge.vertices[..] {
                adjacency.entry(a).or_default().insert(b);
                adjacency.entry(b).or_default().insert(a);
            }
        }
        adjacency
    }

    /// Pairs of adjacent vertices, each reported once.
    pub fn edge_pairs(&self) -> Vec<(EntityHandle, EntityHandle)> {
        self.iter(EntityDim::Edge)
            .filter_map(|(_, edge)| match edge.vertices[..] {
                [a, b] => Some((a, b)),
                _ => None,
            })
            .collect()
    }

    /// Check that every cell references live vertices and has nonzero measure.
    pub fn check_cells(&self) -> Result<(), String> {
        for (cell, rec) in self.iter(self.cell_dim) {
            if rec.vertices.len() != self.cell_dim.simplex_vertex_count() {
                return Err(format!(
                    "cell {cell} has {} vertices",
                    rec.vertices.len()
                ));
            }
            let points = self
                .entity_points(cell)
                .map_err(|err| format!("cell {cell}: {err}"))?;
            let measure = metrics::signed_measure(self.cell_dim, self.space_dim, &points)
                .map_err(|err| err.to_string())?;
            if measure.abs() <= metrics::DEGENERATE_EPS {
                return Err(format!("cell {cell} is degenerate"));
            }
        }
        Ok(())
    }

    fn push(&mut self, dim: EntityDim, record: EntityRecord) -> EntityHandle {
        let stratum = &mut self.strata[dim.index()];
        let idx = stratum.slots.len();
        stratum.slots.push(Some(record));
        stratum.live += 1;
        EntityHandle::from_index(dim, idx)
    }
}

fn sorted_key(vertices: &[EntityHandle]) -> Vec<EntityHandle> {
    let mut key = vertices.to_vec();
    key.sort_unstable();
    key
}
