//! Fixed little-endian wire records for the adaptation exchanges.
//!
//! All multi-byte integers are stored pre-LE with `.to_le()` and decoded with
//! `.from_le()`; floats travel as their LE bit patterns.

use bytemuck::{Pod, Zeroable};

use crate::mesh_error::MeshAdaptError;

/// Shared-entity match: "my copy of the entity whose sorted global vertex key
/// is `key` has handle `handle`". Unused key slots hold `u64::MAX`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireMatch {
    pub dim_le: u64,
    pub key_le: [u64; 4],
    pub handle_le: u64,
}

impl WireMatch {
    pub fn new(dim: usize, key: &[u64], handle: u64) -> Self {
        let mut key_le = [u64::MAX.to_le(); 4];
        for (slot, k) in key_le.iter_mut().zip(key) {
            *slot = k.to_le();
        }
        Self {
            dim_le: (dim as u64).to_le(),
            key_le,
            handle_le: handle.to_le(),
        }
    }
    pub fn dim(&self) -> usize {
        u64::from_le(self.dim_le) as usize
    }
    pub fn key(&self) -> Vec<u64> {
        self.key_le
            .iter()
            .map(|&k| u64::from_le(k))
            .take_while(|&k| k != u64::MAX)
            .collect()
    }
    pub fn handle(&self) -> u64 {
        u64::from_le(self.handle_le)
    }
}

/// A global id addressed to the receiver's handle for the entity.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireGid {
    pub handle_le: u64,
    pub gid_le: u64,
}

impl WireGid {
    pub fn new(handle: u64, gid: u64) -> Self {
        Self {
            handle_le: handle.to_le(),
            gid_le: gid.to_le(),
        }
    }
    pub fn handle(&self) -> u64 {
        u64::from_le(self.handle_le)
    }
    pub fn gid(&self) -> u64 {
        u64::from_le(self.gid_le)
    }
}

/// A size value (1 scalar or the 6 upper-triangle tensor entries) for one
/// vertex. `key` is the vertex global id, or the receiver's vertex handle for
/// owner/ghost rounds.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireSize {
    pub key_le: u64,
    pub values_le: [u64; 6],
}

impl WireSize {
    pub fn new(key: u64, values: &[f64]) -> Self {
        let mut values_le = [0u64; 6];
        for (slot, v) in values_le.iter_mut().zip(values) {
            *slot = v.to_bits().to_le();
        }
        Self {
            key_le: key.to_le(),
            values_le,
        }
    }
    pub fn key(&self) -> u64 {
        u64::from_le(self.key_le)
    }
    pub fn values(&self) -> [f64; 6] {
        self.values_le.map(|v| f64::from_bits(u64::from_le(v)))
    }
}

pub fn encode<T: Pod>(records: &[T]) -> Vec<u8> {
    bytemuck::cast_slice(records).to_vec()
}

/// Decode a buffer of records; the buffer need not be aligned.
pub fn decode<T: Pod>(neighbor: usize, bytes: &[u8]) -> Result<Vec<T>, MeshAdaptError> {
    let size = std::mem::size_of::<T>();
    if bytes.len() % size != 0 {
        return Err(MeshAdaptError::Comm {
            neighbor,
            reason: format!(
                "buffer of {} bytes is not a whole number of {size}-byte records",
                bytes.len()
            ),
        });
    }
    Ok(bytes
        .chunks_exact(size)
        .map(bytemuck::pod_read_unaligned)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::const_assert_eq;
    use std::mem::size_of;

    const_assert_eq!(size_of::<WireMatch>(), 48);
    const_assert_eq!(size_of::<WireGid>(), 16);
    const_assert_eq!(size_of::<WireSize>(), 56);

    #[test]
    fn match_key_drops_padding() {
        let rec = WireMatch::new(1, &[4, 9], 12);
        assert_eq!(rec.dim(), 1);
        assert_eq!(rec.key(), vec![4, 9]);
        assert_eq!(rec.handle(), 12);
    }

    #[test]
    fn decode_from_unaligned_buffer() {
        let recs = [WireGid::new(1, 100), WireGid::new(2, 200)];
        let mut bytes = vec![0u8];
        bytes.extend(encode(&recs));
        let back: Vec<WireGid> = decode(0, &bytes[1..]).unwrap();
        assert_eq!(back[1].handle(), 2);
        assert_eq!(back[1].gid(), 200);
    }

    #[test]
    fn truncated_buffer_is_a_comm_error() {
        let bytes = encode(&[WireSize::new(3, &[0.5])]);
        let err = decode::<WireSize>(4, &bytes[..10]).unwrap_err();
        assert!(matches!(err, MeshAdaptError::Comm { neighbor: 4, .. }));
    }

    #[test]
    fn size_values_keep_bits() {
        let rec = WireSize::new(1, &[1.0, f64::INFINITY, -0.25]);
        assert_eq!(rec.values()[..3], [1.0, f64::INFINITY, -0.25]);
        assert_eq!(rec.values()[3], 0.0);
    }
}
