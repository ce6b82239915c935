//! Per-vertex target sizes.
//!
//! A [`SizeField`] is either isotropic (one edge length per vertex) or
//! anisotropic (a [`SizeTensor`] per vertex). A size tensor is a symmetric
//! positive-definite 3×3 matrix whose eigenvalues are target edge lengths
//! along its eigenvectors; directions unused by the mesh carry `hmax`.

use std::collections::BTreeMap;

use nalgebra::{Matrix3, Vector3};

use crate::mesh::adaptation::AdaptationMesh;
use crate::mesh_error::MeshAdaptError;
use crate::topology::dimension::EntityDim;
use crate::topology::handle::EntityHandle;

/// Relative slack allowed when checking sizes against their bounds.
const BOUND_TOL: f64 = 1e-9;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SizeTensor(Matrix3<f64>);

impl SizeTensor {
    pub fn isotropic(h: f64) -> Self {
        SizeTensor(Matrix3::from_diagonal_element(h))
    }

    /// `Q diag(sizes) Qᵀ` for orthonormal columns `Q`.
    pub fn from_eigen(sizes: [f64; 3], axes: Matrix3<f64>) -> Self {
        let m = axes * Matrix3::from_diagonal(&Vector3::from(sizes)) * axes.transpose();
        SizeTensor(symmetrize(m))
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.0
    }

    /// Eigen sizes, ascending.
    pub fn sizes(&self) -> [f64; 3] {
        let mut s: [f64; 3] = self.0.symmetric_eigenvalues().into();
        s.sort_by(f64::total_cmp);
        s
    }

    pub fn min_size(&self) -> f64 {
        self.sizes()[0]
    }

    pub fn trace(&self) -> f64 {
        self.0.trace()
    }

    /// Target length along unit direction `u`: `1 / sqrt(uᵀ S⁻² u)`.
    pub fn directional_size(&self, u: Vector3<f64>) -> f64 {
        let eig = self.0.symmetric_eigen();
        let mut q = 0.0;
        for i in 0..3 {
            let h = eig.eigenvalues[i];
            let c = eig.eigenvectors.column(i).dot(&u);
            q += c * c / (h * h);
        }
        if q > 0.0 { 1.0 / q.sqrt() } else { f64::INFINITY }
    }

    /// Shrink the size along unit direction `u` to `target` by capping the
    /// eigen sizes that contribute to `u` at one common value. Axes
    /// orthogonal to `u` and axes already below the cap keep their size; no
    /// size drops below `floor`.
    pub fn capped_along(&self, u: Vector3<f64>, target: f64, floor: f64) -> Self {
        const WEIGHT_EPS: f64 = 1e-14;
        let eig = self.0.symmetric_eigen();
        let want = 1.0 / (target * target);
        // (size, squared projection of u), largest size first
        let mut active: Vec<(f64, f64)> = Vec::with_capacity(3);
        let mut passive = 0.0;
        for i in 0..3 {
            let h = eig.eigenvalues[i];
            let w = eig.eigenvectors.column(i).dot(&u).powi(2);
            if w > WEIGHT_EPS {
                active.push((h, w));
            } else {
                passive += w / (h * h);
            }
        }
        active.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut cap = floor;
        for k in 0..active.len() {
            let (top, rest) = active.split_at(k + 1);
            let fixed = passive + rest.iter().map(|&(h, w)| w / (h * h)).sum::<f64>();
            if want <= fixed {
                continue;
            }
            let spread: f64 = top.iter().map(|&(_, w)| w).sum();
            let s = (spread / (want - fixed)).sqrt();
            let lower = rest.first().map_or(floor, |&(h, _)| h).max(floor);
            if s >= lower {
                cap = s.min(top[k].0);
                break;
            }
        }
        let cap = cap.max(floor);

        let mut sizes = [0.0; 3];
        for (i, size) in sizes.iter_mut().enumerate() {
            let h = eig.eigenvalues[i];
            let w = eig.eigenvectors.column(i).dot(&u).powi(2);
            *size = if w > WEIGHT_EPS { h.min(cap) } else { h };
        }
        SizeTensor::from_eigen(sizes, eig.eigenvectors)
    }

    /// Upper triangle `[xx, xy, xz, yy, yz, zz]`.
    pub fn to_upper(&self) -> [f64; 6] {
        let m = &self.0;
        [m[(0, 0)], m[(0, 1)], m[(0, 2)], m[(1, 1)], m[(1, 2)], m[(2, 2)]]
    }

    pub fn from_upper(u: [f64; 6]) -> Self {
        SizeTensor(Matrix3::new(
            u[0], u[1], u[2], //
            u[1], u[3], u[4], //
            u[2], u[4], u[5],
        ))
    }
}

fn symmetrize(m: Matrix3<f64>) -> Matrix3<f64> {
    (m + m.transpose()) * 0.5
}

#[derive(Clone, Debug, PartialEq)]
pub enum SizeField {
    Isotropic(BTreeMap<EntityHandle, f64>),
    Anisotropic(BTreeMap<EntityHandle, SizeTensor>),
}

impl SizeField {
    pub fn is_isotropic(&self) -> bool {
        matches!(self, SizeField::Isotropic(_))
    }

    pub fn len(&self) -> usize {
        match self {
            SizeField::Isotropic(m) => m.len(),
            SizeField::Anisotropic(m) => m.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, v: EntityHandle) -> bool {
        match self {
            SizeField::Isotropic(m) => m.contains_key(&v),
            SizeField::Anisotropic(m) => m.contains_key(&v),
        }
    }

    /// Scalar size at `v`: the isotropic value, or the smallest eigen size.
    pub fn size_at(&self, v: EntityHandle) -> Option<f64> {
        match self {
            SizeField::Isotropic(m) => m.get(&v).copied(),
            SizeField::Anisotropic(m) => m.get(&v).map(SizeTensor::min_size),
        }
    }

    /// Size at `v` along unit direction `u`.
    pub fn size_along(&self, v: EntityHandle, u: Vector3<f64>) -> Option<f64> {
        match self {
            SizeField::Isotropic(m) => m.get(&v).copied(),
            SizeField::Anisotropic(m) => m.get(&v).map(|t| t.directional_size(u)),
        }
    }

    /// Wire form of the value at `v`: the scalar in slot 0, or the tensor's
    /// upper triangle.
    pub fn wire_values(&self, v: EntityHandle) -> Option<[f64; 6]> {
        match self {
            SizeField::Isotropic(m) => m.get(&v).map(|&h| [h, 0.0, 0.0, 0.0, 0.0, 0.0]),
            SizeField::Anisotropic(m) => m.get(&v).map(SizeTensor::to_upper),
        }
    }

    /// Store a wire value at `v`; returns true if the stored value changed.
    pub fn set_wire_values(&mut self, v: EntityHandle, values: [f64; 6]) -> bool {
        match self {
            SizeField::Isotropic(m) => m.insert(v, values[0]) != Some(values[0]),
            SizeField::Anisotropic(m) => {
                let t = SizeTensor::from_upper(values);
                m.insert(v, t) != Some(t)
            }
        }
    }

    /// Keep the smaller of the stored value and `values` at `v` (by trace for
    /// tensors); returns true if the stored value changed.
    pub fn min_with_wire_values(&mut self, v: EntityHandle, values: [f64; 6]) -> bool {
        match self {
            SizeField::Isotropic(m) => match m.get_mut(&v) {
                Some(h) if values[0] < *h => {
                    *h = values[0];
                    true
                }
                Some(_) => false,
                None => {
                    m.insert(v, values[0]);
                    true
                }
            },
            SizeField::Anisotropic(m) => {
                let t = SizeTensor::from_upper(values);
                match m.get_mut(&v) {
                    Some(cur) if t.trace() < cur.trace() => {
                        *cur = t;
                        true
                    }
                    Some(_) => false,
                    None => {
                        m.insert(v, t);
                        true
                    }
                }
            }
        }
    }

    /// Check that every live vertex has a finite size within `[hmin, hmax]`.
    pub fn validate(&self, mesh: &AdaptationMesh, hmin: f64, hmax: f64) -> Result<(), MeshAdaptError> {
        let lo = hmin * (1.0 - BOUND_TOL);
        let hi = hmax * (1.0 + BOUND_TOL);
        for v in mesh.handles(EntityDim::Vertex) {
            let sizes = match self {
                SizeField::Isotropic(m) => m.get(&v).map(|&h| vec![h]),
                SizeField::Anisotropic(m) => m.get(&v).map(|t| t.sizes().to_vec()),
            }
            .ok_or_else(|| MeshAdaptError::SizeField(format!("vertex {v} has no size")))?;
            if let Some(h) = sizes.iter().find(|h| !(h.is_finite() && **h >= lo && **h <= hi)) {
                return Err(MeshAdaptError::SizeField(format!(
                    "vertex {v} has size {h} outside [{hmin}, {hmax}]"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn v(slot: u32) -> EntityHandle {
        EntityHandle::new(EntityDim::Vertex, slot).unwrap()
    }

    #[test]
    fn directional_size_follows_axes() {
        let t = SizeTensor::from_eigen([0.1, 1.0, 1.0], Matrix3::identity());
        assert_relative_eq!(t.directional_size(Vector3::x()), 0.1, epsilon = 1e-12);
        assert_relative_eq!(t.directional_size(Vector3::y()), 1.0, epsilon = 1e-12);
        let diag = Vector3::new(1.0, 1.0, 0.0).normalize();
        let d = t.directional_size(diag);
        assert!(d > 0.1 && d < 1.0);
    }

    #[test]
    fn capping_along_an_edge_keeps_the_small_axis() {
        let t = SizeTensor::from_eigen([0.02, 100.0, 50.0], Matrix3::identity());
        let u = Vector3::new(0.5, 3f64.sqrt() / 2.0, 0.0);
        assert!(t.directional_size(u) > 0.039);
        let capped = t.capped_along(u, 0.0396, 0.02);
        assert_relative_eq!(capped.directional_size(u), 0.0396, epsilon = 1e-10);
        assert_relative_eq!(capped.min_size(), 0.02, epsilon = 1e-12);
        // z is orthogonal to the edge
        assert_relative_eq!(capped.directional_size(Vector3::z()), 50.0, epsilon = 1e-9);
    }

    #[test]
    fn capping_below_the_floor_stops_at_the_floor() {
        let t = SizeTensor::from_eigen([0.5, 1.0, 1.0], Matrix3::identity());
        let capped = t.capped_along(Vector3::x(), 0.01, 0.1);
        assert_relative_eq!(capped.directional_size(Vector3::x()), 0.1, epsilon = 1e-12);
        assert_relative_eq!(capped.directional_size(Vector3::y()), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn sizes_ascend_and_upper_round_trips() {
        let t = SizeTensor::from_eigen([1.0, 0.01, 0.5], Matrix3::identity());
        let sizes = t.sizes();
        assert_relative_eq!(sizes[0], 0.01, epsilon = 1e-12);
        assert_relative_eq!(sizes[2], 1.0, epsilon = 1e-12);
        assert_eq!(SizeTensor::from_upper(t.to_upper()), t);
    }

    #[test]
    fn min_with_keeps_smaller() {
        let mut sf = SizeField::Isotropic(BTreeMap::from([(v(1), 0.5)]));
        assert!(!sf.min_with_wire_values(v(1), [0.7, 0.0, 0.0, 0.0, 0.0, 0.0]));
        assert!(sf.min_with_wire_values(v(1), [0.2, 0.0, 0.0, 0.0, 0.0, 0.0]));
        assert_eq!(sf.size_at(v(1)), Some(0.2));
    }
}
