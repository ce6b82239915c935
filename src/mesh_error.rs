//! MeshAdaptError: unified error type for the adaptation driver.
//!
//! Every fallible public API returns `Result<_, MeshAdaptError>`. Callers that
//! prefer status codes convert through [`MeshAdaptError::status_code`] or the
//! [`IntoStatus`] extension on results.

use thiserror::Error;

use crate::topology::dimension::EntityDim;
use crate::topology::handle::EntityHandle;

/// Unified error type for mesh adaptation operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MeshAdaptError {
    /// Model or mesh input is missing or inconsistent.
    #[error("load error: {0}")]
    Load(String),
    /// Solver mesh could not be converted into the adaptation mesh.
    #[error("conversion error: {0}")]
    Conversion(String),
    /// Adaptation mesh could not be converted back into solver arrays.
    #[error("reconstruction error: {0}")]
    Reconstruction(String),
    /// A tagged solver entity does not correspond to exactly one adaptation entity.
    #[error("tag mismatch on {dim:?} entity {index}: {matches} matching entities")]
    TagMismatch {
        dim: EntityDim,
        index: usize,
        matches: usize,
    },
    /// A field buffer does not have `n_var * n_nodes` entries.
    #[error("shape mismatch for field `{name}`: expected {expected} values, got {found}")]
    ShapeMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    /// Global numbering is incomplete or inconsistent after the exchange.
    #[error("numbering error on {dim:?}: {reason}")]
    Numbering { dim: EntityDim, reason: String },
    /// The size field violates its clamp or coverage invariants.
    #[error("size field error: {0}")]
    SizeField(String),
    /// The adaptation engine failed or produced an invalid mesh.
    #[error("adaptation engine `{engine}` failed: {reason}")]
    AdaptEngine { engine: String, reason: String },
    /// Unknown entity handle.
    #[error("entity {0} is not in the mesh")]
    MissingEntity(EntityHandle),
    /// Message passing failed.
    #[error("communication with rank {neighbor} failed: {reason}")]
    Comm { neighbor: usize, reason: String },
    /// Another rank failed during a collective phase.
    #[error("a peer rank failed during `{phase}`")]
    PeerAborted { phase: &'static str },
    /// A driver operation was called in the wrong state.
    #[error("operation `{operation}` is not valid in state {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
}

/// Status codes for callers that do not consume `Result`s.
#[repr(i32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Success = 0,
    LoadError = 1,
    ConversionError = 2,
    ReconstructionError = 3,
    TagMismatchError = 4,
    ShapeMismatchError = 5,
    NumberingError = 6,
    AdaptEngineError = 7,
    SizeFieldError = 8,
    CommError = 9,
    PeerAborted = 10,
    InvalidState = 11,
}

impl StatusCode {
    /// Raw integer value handed across the solver boundary.
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == StatusCode::Success
    }
}

impl MeshAdaptError {
    pub fn status(&self) -> StatusCode {
        match self {
            MeshAdaptError::Load(_) => StatusCode::LoadError,
            MeshAdaptError::Conversion(_) => StatusCode::ConversionError,
            MeshAdaptError::Reconstruction(_) | MeshAdaptError::MissingEntity(_) => {
                StatusCode::ReconstructionError
            }
            MeshAdaptError::TagMismatch { .. } => StatusCode::TagMismatchError,
            MeshAdaptError::ShapeMismatch { .. } => StatusCode::ShapeMismatchError,
            MeshAdaptError::Numbering { .. } => StatusCode::NumberingError,
            MeshAdaptError::SizeField(_) => StatusCode::SizeFieldError,
            MeshAdaptError::AdaptEngine { .. } => StatusCode::AdaptEngineError,
            MeshAdaptError::Comm { .. } => StatusCode::CommError,
            MeshAdaptError::PeerAborted { .. } => StatusCode::PeerAborted,
            MeshAdaptError::InvalidState { .. } => StatusCode::InvalidState,
        }
    }

    /// Nonzero status code for this error.
    pub fn status_code(&self) -> i32 {
        self.status().code()
    }
}

/// Collapse a `Result` into a status code, dropping the success value.
pub trait IntoStatus {
    fn status(&self) -> StatusCode;

    fn status_code(&self) -> i32 {
        self.status().code()
    }
}

impl<T> IntoStatus for Result<T, MeshAdaptError> {
    fn status(&self) -> StatusCode {
        match self {
            Ok(_) => StatusCode::Success,
            Err(err) => err.status(),
        }
    }
}
