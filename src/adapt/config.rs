//! Construction-time parameters of an [`AdaptDriver`](super::AdaptDriver).

use serde::{Deserialize, Serialize};

use crate::mesh_error::MeshAdaptError;

/// Which kind of size field a cycle computes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingMode {
    #[default]
    Isotropic,
    Anisotropic,
}

/// Where the error indicator driving the size field comes from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SizeSource {
    /// Gradient magnitude of one component of a transferred field.
    Gradient { field: String, component: usize },
    /// One component of a transferred field used as the indicator directly.
    Indicator { field: String, component: usize },
}

impl SizeSource {
    pub fn field(&self) -> &str {
        match self {
            SizeSource::Gradient { field, .. } | SizeSource::Indicator { field, .. } => field,
        }
    }

    pub fn component(&self) -> usize {
        match self {
            SizeSource::Gradient { component, .. } | SizeSource::Indicator { component, .. } => {
                *component
            }
        }
    }
}

impl Default for SizeSource {
    fn default() -> Self {
        SizeSource::Gradient {
            field: "solution".to_string(),
            component: 0,
        }
    }
}

/// Sizing and smoothing parameters, fixed for the driver's lifetime.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptConfig {
    /// Largest allowed edge length.
    pub hmax: f64,
    /// Smallest allowed edge length.
    pub hmin: f64,
    /// Maximum number of smoothing passes.
    pub num_iter: usize,
    /// Largest allowed size ratio between adjacent vertices.
    pub gradation: f64,
    pub sizing: SizingMode,
    /// Interpolation error target for anisotropic sizing.
    pub error_target: f64,
    pub size_source: SizeSource,
}

impl Default for AdaptConfig {
    fn default() -> Self {
        Self {
            hmax: 0.1,
            hmin: 0.001,
            num_iter: 10,
            gradation: 1.5,
            sizing: SizingMode::Isotropic,
            error_target: 1e-3,
            size_source: SizeSource::default(),
        }
    }
}

impl AdaptConfig {
    /// Reject bounds, gradation or pass counts the size-field code cannot honor.
    pub fn validate(&self) -> Result<(), MeshAdaptError> {
        let bad = |reason: String| Err(MeshAdaptError::Load(format!("invalid adapt config: {reason}")));
        if !(self.hmin.is_finite() && self.hmax.is_finite()) {
            return bad(format!("hmin = {} and hmax = {} must be finite", self.hmin, self.hmax));
        }
        if !(self.hmin > 0.0 && self.hmin <= self.hmax) {
            return bad(format!("need 0 < hmin <= hmax, got {} and {}", self.hmin, self.hmax));
        }
        if !(self.gradation > 1.0 && self.gradation.is_finite()) {
            return bad(format!("gradation must exceed 1, got {}", self.gradation));
        }
        if self.num_iter == 0 {
            return bad("num_iter must be at least 1".to_string());
        }
        if self.sizing == SizingMode::Anisotropic && !(self.error_target > 0.0) {
            return bad(format!("error target must be positive, got {}", self.error_target));
        }
        if self.size_source.field().is_empty() {
            return bad("size source names no field".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(AdaptConfig::default().validate().is_ok());
    }

    #[test]
    fn bounds_are_checked() {
        let swapped = AdaptConfig {
            hmin: 0.5,
            hmax: 0.1,
            ..Default::default()
        };
        assert!(matches!(swapped.validate(), Err(MeshAdaptError::Load(_))));
        let flat = AdaptConfig {
            gradation: 1.0,
            ..Default::default()
        };
        assert!(flat.validate().is_err());
        let nan = AdaptConfig {
            hmin: f64::NAN,
            ..Default::default()
        };
        assert!(nan.validate().is_err());
        let no_passes = AdaptConfig {
            num_iter: 0,
            ..Default::default()
        };
        assert!(no_passes.validate().is_err());
    }
}
