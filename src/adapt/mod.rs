//! One adapt cycle, driven as an explicit state machine.
//!
//! ```text
//! Idle → MeshLoaded → Numbered → FieldsIn → SizeFieldReady → Adapting
//!      → MeshRebuilt → FieldsOut → Idle
//! ```
//!
//! Any failure moves the driver to `Aborted` and drops the cycle's mesh,
//! numberings and size field; [`AdaptDriver::reset`] returns it to `Idle`.
//! Calling an operation in the wrong state fails with
//! [`MeshAdaptError::InvalidState`] and leaves the cycle untouched.
//!
//! Every phase ends with a cross-rank agreement on its outcome, so when one
//! rank fails all ranks abort in the same phase.

pub mod config;
pub mod state;

use std::collections::HashSet;
use std::path::Path;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::algs::communicator::{agree, tags, Communicator};
use crate::algs::{convert, field_transfer, recovery, size_field, tagger};
use crate::data::numbering::{GlobalNumbering, LocalNumbering};
use crate::data::size_field::SizeField;
use crate::engine::{AdaptEngine, AdaptReport};
use crate::mesh::adaptation::AdaptationMesh;
use crate::mesh::partition::PartitionedMesh;
use crate::mesh::solver::SolverMesh;
use crate::mesh_error::{MeshAdaptError, StatusCode};
use crate::topology::dimension::EntityDim;

pub use config::{AdaptConfig, SizeSource, SizingMode};
pub use state::DriverState;

/// Mesh handed to [`AdaptDriver::load_mesh`].
#[derive(Clone, Debug, PartialEq)]
pub enum MeshInput {
    /// Whole mesh on a single rank.
    Serial(SolverMesh),
    /// This rank's subdomain of a distributed mesh.
    Parallel(PartitionedMesh),
}

impl MeshInput {
    /// Solver arrays the adaptation mesh is built from on this rank.
    pub fn solver_mesh(&self) -> &SolverMesh {
        match self {
            MeshInput::Serial(mesh) => mesh,
            MeshInput::Parallel(part) => &part.subdomain,
        }
    }
}

/// Reads a geometric model and mesh file pair into solver arrays.
pub trait MeshSource {
    fn load(&mut self, model_file: &Path, mesh_file: &Path) -> Result<MeshInput, MeshAdaptError>;
}

impl<F> MeshSource for F
where
    F: FnMut(&Path, &Path) -> Result<MeshInput, MeshAdaptError>,
{
    fn load(&mut self, model_file: &Path, mesh_file: &Path) -> Result<MeshInput, MeshAdaptError> {
        self(model_file, mesh_file)
    }
}

/// A named nodal field in solver layout: `values[node * n_var + var]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldBuffer {
    pub name: String,
    pub n_var: usize,
    pub values: Vec<f64>,
}

impl FieldBuffer {
    pub fn new(name: impl Into<String>, n_var: usize, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            n_var,
            values,
        }
    }

    /// Value of `var` at `node`, if in range.
    pub fn get(&self, node: usize, var: usize) -> Option<f64> {
        if var >= self.n_var {
            return None;
        }
        self.values.get(node * self.n_var + var).copied()
    }
}

/// What one completed cycle did.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CycleSummary {
    /// Value of the adapt counter after this cycle.
    pub cycle: u64,
    pub engine: AdaptReport,
    pub smoothing_passes: usize,
    pub smoothing_converged: bool,
    /// Owned vertices and cells on this rank after adaptation.
    pub owned_vertices: usize,
    pub owned_cells: usize,
    /// Vertex count summed over all ranks, from the output numbering.
    pub global_vertices: u64,
    /// Owned cells summed over all ranks.
    pub global_cells: u64,
}

/// State held only for the duration of one cycle.
#[derive(Debug)]
struct Cycle {
    input: MeshInput,
    mesh: Option<AdaptationMesh>,
    numbering: Vec<GlobalNumbering>,
    local: Vec<LocalNumbering>,
    fields: Vec<String>,
    size_field: Option<SizeField>,
    smoothing: Option<size_field::SmoothReport>,
    engine: Option<AdaptReport>,
    global_node_ids: Option<Vec<u64>>,
    global_cells: u64,
}

impl Cycle {
    fn new(input: MeshInput) -> Self {
        Self {
            input,
            mesh: None,
            numbering: Vec::new(),
            local: Vec::new(),
            fields: Vec::new(),
            size_field: None,
            smoothing: None,
            engine: None,
            global_node_ids: None,
            global_cells: 0,
        }
    }
}

/// Drives conversion, field transfer, sizing and an [`AdaptEngine`] through
/// one adapt cycle at a time.
pub struct AdaptDriver<C: Communicator, E: AdaptEngine> {
    config: AdaptConfig,
    comm: C,
    engine: E,
    state: DriverState,
    adapt_count: u64,
    last_status: StatusCode,
    cycle: Option<Cycle>,
}

impl<C: Communicator, E: AdaptEngine> AdaptDriver<C, E> {
    /// Validate `config` and create an idle driver.
    pub fn new(config: AdaptConfig, comm: C, engine: E) -> Result<Self, MeshAdaptError> {
        config.validate()?;
        debug!(
            "[rank {}] adapt driver with engine `{}`: {config:?}",
            comm.rank(),
            engine.name()
        );
        Ok(Self {
            config,
            comm,
            engine,
            state: DriverState::Idle,
            adapt_count: 0,
            last_status: StatusCode::Success,
            cycle: None,
        })
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Number of completed cycles.
    pub fn adapt_count(&self) -> u64 {
        self.adapt_count
    }

    pub fn config(&self) -> &AdaptConfig {
        &self.config
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    /// Status of the most recent operation.
    pub fn last_status(&self) -> StatusCode {
        self.last_status
    }

    /// The cycle's adaptation mesh, once converted.
    pub fn adaptation_mesh(&self) -> Option<&AdaptationMesh> {
        self.cycle.as_ref().and_then(|c| c.mesh.as_ref())
    }

    /// Global numbering for `dim`, available from `Numbered` until the cycle ends.
    pub fn numbering(&self, dim: EntityDim) -> Option<&GlobalNumbering> {
        self.cycle
            .as_ref()
            .and_then(|c| c.numbering.iter().find(|n| n.dim() == dim))
    }

    /// This rank's numbering of its owned entities of `dim`, available
    /// alongside [`numbering`](Self::numbering).
    pub fn local_numbering(&self, dim: EntityDim) -> Option<&LocalNumbering> {
        self.cycle
            .as_ref()
            .and_then(|c| c.local.iter().find(|n| n.dim() == dim))
    }

    pub fn size_field(&self) -> Option<&SizeField> {
        self.cycle.as_ref().and_then(|c| c.size_field.as_ref())
    }

    /// Global ids of the nodes returned by [`convert_out`](Self::convert_out),
    /// in node order.
    pub fn global_node_ids(&self) -> Option<&[u64]> {
        self.cycle.as_ref().and_then(|c| c.global_node_ids.as_deref())
    }

    /// Read the model and mesh files through `source` and load the result.
    pub fn load_model_and_mesh<S>(
        &mut self,
        model_file: impl AsRef<Path>,
        mesh_file: impl AsRef<Path>,
        source: &mut S,
    ) -> Result<(), MeshAdaptError>
    where
        S: MeshSource + ?Sized,
    {
        self.require_state("load_model_and_mesh", &[DriverState::Idle])?;
        let (model_file, mesh_file) = (model_file.as_ref(), mesh_file.as_ref());
        let read = (|| {
            for file in [model_file, mesh_file] {
                if !file.exists() {
                    return Err(MeshAdaptError::Load(format!("{} does not exist", file.display())));
                }
            }
            source.load(model_file, mesh_file)
        })();
        let input = self.run("load_model_and_mesh", |_| read)?;
        self.load_mesh(input)
    }

    /// Take ownership of this rank's solver mesh for a new cycle.
    pub fn load_mesh(&mut self, input: MeshInput) -> Result<(), MeshAdaptError> {
        self.require_state("load_mesh", &[DriverState::Idle])?;
        self.run("load_mesh", |d| {
            let checked = match &input {
                MeshInput::Serial(mesh) => mesh.check_shape().map_err(MeshAdaptError::Load),
                MeshInput::Parallel(part) => part.validate().and_then(|()| {
                    if part.n_ranks() == d.comm.size() {
                        Ok(())
                    } else {
                        Err(MeshAdaptError::Load(format!(
                            "partition describes {} ranks, communicator has {}",
                            part.n_ranks(),
                            d.comm.size()
                        )))
                    }
                }),
            };
            checked?;
            if matches!(input, MeshInput::Serial(_)) && d.comm.size() > 1 {
                return Err(MeshAdaptError::Load(
                    "a serial mesh cannot be loaded on more than one rank".to_string(),
                ));
            }
            let mesh = input.solver_mesh();
            debug!(
                "[rank {}] loaded {} nodes, {} elements",
                d.comm.rank(),
                mesh.n_nodes(),
                mesh.n_elements()
            );
            d.cycle = Some(Cycle::new(input));
            d.state = DriverState::MeshLoaded;
            Ok(())
        })
    }

    /// Build the adaptation mesh, copy material tags onto it and number its
    /// entities globally.
    pub fn convert_in(&mut self) -> Result<(), MeshAdaptError> {
        self.require_state("convert_in", &[DriverState::MeshLoaded])?;
        self.run("convert_in", |d| {
            let input = &d.cycle.as_ref().ok_or(missing("cycle"))?.input;
            let mut mesh = match input {
                MeshInput::Serial(solver) => convert::construct_from_serial(solver),
                MeshInput::Parallel(part) => convert::construct_from_parallel(part, &d.comm),
            }?;
            agree(&d.comm, "tag", tagger::apply(input.solver_mesh(), &mut mesh))?;
            let numbering = GlobalNumbering::build_all(&mesh, &d.comm)?;
            let local = LocalNumbering::build_all(&mesh, d.comm.rank());
            info!(
                "[rank {}] converted: {} vertices ({} owned), {} cells; {} global vertices",
                d.comm.rank(),
                mesh.count(EntityDim::Vertex),
                local.first().map_or(0, LocalNumbering::len),
                mesh.count(mesh.cell_dim()),
                numbering.first().map_or(0, GlobalNumbering::total)
            );
            let cycle = d.cycle_mut()?;
            cycle.mesh = Some(mesh);
            cycle.numbering = numbering;
            cycle.local = local;
            d.state = DriverState::Numbered;
            Ok(())
        })
    }

    /// Attach solver field buffers to the adaptation mesh.
    pub fn transfer_fields_in(&mut self, buffers: &[FieldBuffer]) -> Result<(), MeshAdaptError> {
        self.require_state("transfer_fields_in", &[DriverState::Numbered])?;
        self.run("transfer_fields_in", |d| {
            let mut names = HashSet::new();
            if let Some(dup) = buffers.iter().find(|b| !names.insert(b.name.as_str())) {
                return Err(MeshAdaptError::ShapeMismatch {
                    name: dup.name.clone(),
                    expected: 1,
                    found: buffers.iter().filter(|b| b.name == dup.name).count(),
                });
            }
            let cycle = d.cycle_mut()?;
            let n_nodes = cycle.input.solver_mesh().n_nodes();
            let mesh = cycle.mesh.as_mut().ok_or(missing("adaptation mesh"))?;
            for buffer in buffers {
                field_transfer::to_adaptation(mesh, &buffer.name, &buffer.values, buffer.n_var, n_nodes)?;
                cycle.fields.push(buffer.name.clone());
            }
            debug!("transferred {} fields in", buffers.len());
            d.state = DriverState::FieldsIn;
            Ok(())
        })
    }

    /// Compute a fresh size field of the given kind from the configured source.
    pub fn compute_size_field(&mut self, mode: SizingMode) -> Result<(), MeshAdaptError> {
        self.require_state("compute_size_field", &[DriverState::FieldsIn])?;
        self.run("compute_size_field", |d| {
            let cfg = &d.config;
            let source = &cfg.size_source;
            let cycle = d.cycle.as_ref().ok_or(missing("cycle"))?;
            let mesh = cycle.mesh.as_ref().ok_or(missing("adaptation mesh"))?;
            let indicator = agree(
                &d.comm,
                "indicator",
                match source {
                    SizeSource::Gradient { field, component } => {
                        size_field::gradient_indicator(mesh, field, *component)
                    }
                    SizeSource::Indicator { field, component } => {
                        recovery::field_values(mesh, field, *component)
                    }
                },
            )?;
            let scale = size_field::indicator_scale(mesh, &indicator, &d.comm)?;
            let isotropic = size_field::calculate_isotropic(&indicator, cfg.hmin, cfg.hmax, scale);
            let sf = match mode {
                SizingMode::Isotropic => isotropic,
                SizingMode::Anisotropic => {
                    let SizeField::Isotropic(fallback) = &isotropic else {
                        return Err(missing("isotropic fallback sizes"));
                    };
                    agree(
                        &d.comm,
                        "anisotropic",
                        size_field::calculate_anisotropic(
                            mesh,
                            source.field(),
                            source.component(),
                            cfg.hmin,
                            cfg.hmax,
                            cfg.error_target,
                            fallback,
                        ),
                    )?
                }
            };
            debug!(
                "[rank {}] {mode:?} size field on {} vertices, indicator scale {scale:e}",
                d.comm.rank(),
                sf.len()
            );
            let cycle = d.cycle_mut()?;
            cycle.size_field = Some(sf);
            cycle.smoothing = None;
            Ok(())
        })
    }

    /// Copy owner sizes onto ghost vertices.
    pub fn communicate_size_field(&mut self) -> Result<(), MeshAdaptError> {
        self.require_state("communicate_size_field", &[DriverState::FieldsIn])?;
        self.require_size_field("communicate_size_field")?;
        self.run("communicate_size_field", |d| {
            let cycle = d.cycle.as_mut().ok_or(missing("cycle"))?;
            let mesh = cycle.mesh.as_ref().ok_or(missing("adaptation mesh"))?;
            let sf = cycle.size_field.as_mut().ok_or(missing("size field"))?;
            let numbering = cycle
                .numbering
                .iter()
                .find(|n| n.dim() == EntityDim::Vertex)
                .ok_or(missing("vertex numbering"))?;
            size_field::communicate(mesh, sf, numbering, &d.comm)
        })
    }

    /// Enforce the gradation bound and check the clamp; completes sizing.
    pub fn smooth_size_field(&mut self) -> Result<(), MeshAdaptError> {
        self.require_state("smooth_size_field", &[DriverState::FieldsIn])?;
        self.require_size_field("smooth_size_field")?;
        self.run("smooth_size_field", |d| {
            let cfg = &d.config;
            let cycle = d.cycle.as_mut().ok_or(missing("cycle"))?;
            let mesh = cycle.mesh.as_ref().ok_or(missing("adaptation mesh"))?;
            let sf = cycle.size_field.as_mut().ok_or(missing("size field"))?;
            let report = size_field::smooth(mesh, sf, cfg.gradation, cfg.num_iter, &d.comm)?;
            if !report.converged {
                agree(&d.comm, "gradation", size_field::check_gradation(mesh, sf, cfg.gradation))?;
            }
            agree(&d.comm, "validate_size_field", sf.validate(mesh, cfg.hmin, cfg.hmax))?;
            cycle.smoothing = Some(report);
            d.state = DriverState::SizeFieldReady;
            Ok(())
        })
    }

    /// Compute, communicate and smooth with the configured sizing mode.
    pub fn prepare_size_field(&mut self) -> Result<(), MeshAdaptError> {
        self.compute_size_field(self.config.sizing)?;
        self.communicate_size_field()?;
        self.smooth_size_field()
    }

    /// Run the engine on the adaptation mesh. Engine failure aborts the cycle.
    pub fn adapt(&mut self) -> Result<AdaptReport, MeshAdaptError> {
        self.require_state("adapt", &[DriverState::SizeFieldReady])?;
        self.state = DriverState::Adapting;
        self.run("adapt", |d| {
            let cycle = d.cycle.as_mut().ok_or(missing("cycle"))?;
            let mesh = cycle.mesh.as_mut().ok_or(missing("adaptation mesh"))?;
            let sf = cycle.size_field.as_ref().ok_or(missing("size field"))?;
            let outcome = d.engine.adapt(mesh, sf).map_err(|reason| MeshAdaptError::AdaptEngine {
                engine: d.engine.name().to_string(),
                reason,
            });
            let report = agree(&d.comm, "adapt", outcome)?;
            info!(
                "[rank {}] engine `{}`: {} -> {} vertices, {} -> {} cells",
                d.comm.rank(),
                d.engine.name(),
                report.vertices_before,
                report.vertices_after,
                report.cells_before,
                report.cells_after
            );
            cycle.engine = Some(report.clone());
            // sizes and numberings refer to the old topology
            cycle.size_field = None;
            cycle.numbering.clear();
            cycle.local.clear();
            d.state = DriverState::MeshRebuilt;
            Ok(report)
        })
    }

    /// Rebuild solver arrays from the adapted mesh, with materials restored
    /// and nodes globally numbered.
    pub fn convert_out(&mut self) -> Result<SolverMesh, MeshAdaptError> {
        self.require_state("convert_out", &[DriverState::MeshRebuilt])?;
        self.run("convert_out", |d| {
            let cycle = d.cycle.as_mut().ok_or(missing("cycle"))?;
            let mesh = cycle.mesh.as_ref().ok_or(missing("adaptation mesh"))?;
            let rebuilt = convert::construct_solver_mesh_back(mesh).and_then(|mut solver| {
                tagger::restore_materials(&mut solver, mesh)?;
                Ok(solver)
            });
            let solver = agree(&d.comm, "reconstruct", rebuilt)?;
            let numbering = GlobalNumbering::build(mesh, EntityDim::Vertex, &d.comm)?;
            let ids = mesh
                .handles(EntityDim::Vertex)
                .map(|v| numbering.id(v))
                .collect::<Result<Vec<_>, _>>();
            cycle.global_node_ids = Some(agree(&d.comm, "global_node_ids", ids)?);
            cycle.numbering = vec![numbering];
            let cells = LocalNumbering::build(mesh, mesh.cell_dim(), d.comm.rank());
            cycle.global_cells = d.comm.all_reduce_sum(tags::COLLECTIVE, cells.len() as u64)?;
            cycle.local = vec![LocalNumbering::build(mesh, EntityDim::Vertex, d.comm.rank()), cells];
            Ok(solver)
        })
    }

    /// Read every transferred field back in solver layout.
    pub fn transfer_fields_out(&mut self) -> Result<Vec<FieldBuffer>, MeshAdaptError> {
        self.require_state("transfer_fields_out", &[DriverState::MeshRebuilt])?;
        if self.global_node_ids().is_none() {
            return Err(self.invalid("transfer_fields_out"));
        }
        self.run("transfer_fields_out", |d| {
            let cycle = d.cycle.as_mut().ok_or(missing("cycle"))?;
            let mesh = cycle.mesh.as_ref().ok_or(missing("adaptation mesh"))?;
            let buffers = cycle
                .fields
                .iter()
                .map(|name| {
                    let (values, n_var) = field_transfer::to_solver(mesh, name)?;
                    Ok(FieldBuffer::new(name.clone(), n_var, values))
                })
                .collect::<Result<Vec<_>, MeshAdaptError>>()?;
            d.state = DriverState::FieldsOut;
            Ok(buffers)
        })
    }

    /// Close the cycle, bump the adapt counter and drop the cycle's state.
    pub fn finish(&mut self) -> Result<CycleSummary, MeshAdaptError> {
        self.require_state("finish", &[DriverState::FieldsOut])?;
        self.run("finish", |d| {
            let cycle = d.cycle.take().ok_or(missing("cycle"))?;
            let mesh = cycle.mesh.as_ref().ok_or(missing("adaptation mesh"))?;
            let owned = |dim: EntityDim| {
                cycle
                    .local
                    .iter()
                    .find(|n| n.dim() == dim)
                    .map(LocalNumbering::len)
                    .ok_or(missing("local numbering"))
            };
            let (owned_vertices, owned_cells) = (owned(EntityDim::Vertex)?, owned(mesh.cell_dim())?);
            d.adapt_count += 1;
            let summary = CycleSummary {
                cycle: d.adapt_count,
                engine: cycle.engine.clone().unwrap_or_default(),
                smoothing_passes: cycle.smoothing.map_or(0, |s| s.passes),
                smoothing_converged: cycle.smoothing.is_some_and(|s| s.converged),
                owned_vertices,
                owned_cells,
                global_vertices: cycle.numbering.first().map_or(0, GlobalNumbering::total),
                global_cells: cycle.global_cells,
            };
            info!("[rank {}] adapt cycle {} finished", d.comm.rank(), d.adapt_count);
            d.state = DriverState::Idle;
            Ok(summary)
        })
    }

    /// Return an aborted driver to `Idle`.
    pub fn reset(&mut self) -> Result<(), MeshAdaptError> {
        self.require_state("reset", &[DriverState::Aborted])?;
        self.cycle = None;
        self.state = DriverState::Idle;
        self.last_status = StatusCode::Success;
        Ok(())
    }

    fn require_state(&mut self, operation: &'static str, allowed: &[DriverState]) -> Result<(), MeshAdaptError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(self.invalid(operation))
        }
    }

    fn require_size_field(&mut self, operation: &'static str) -> Result<(), MeshAdaptError> {
        if self.size_field().is_some() {
            Ok(())
        } else {
            Err(self.invalid(operation))
        }
    }

    fn invalid(&mut self, operation: &'static str) -> MeshAdaptError {
        let err = MeshAdaptError::InvalidState {
            operation,
            state: self.state.name(),
        };
        self.last_status = err.status();
        err
    }

    /// Run one phase; on failure the cycle is dropped and the driver aborts.
    fn run<T>(
        &mut self,
        phase: &'static str,
        f: impl FnOnce(&mut Self) -> Result<T, MeshAdaptError>,
    ) -> Result<T, MeshAdaptError> {
        let outcome = f(self);
        let outcome = agree(&self.comm, phase, outcome);
        match &outcome {
            Ok(_) => self.last_status = StatusCode::Success,
            Err(err) => {
                warn!(
                    "[rank {}] {phase} failed in state {}: {err}",
                    self.comm.rank(),
                    self.state
                );
                self.last_status = err.status();
                self.cycle = None;
                self.state = DriverState::Aborted;
            }
        }
        outcome
    }

    fn cycle_mut(&mut self) -> Result<&mut Cycle, MeshAdaptError> {
        self.cycle.as_mut().ok_or(missing("cycle"))
    }
}

fn missing(what: &str) -> MeshAdaptError {
    MeshAdaptError::Load(format!("adapt cycle has no {what}"))
}
