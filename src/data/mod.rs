//! Data attached to an adaptation mesh: vertex fields, numberings and sizes.

pub mod field;
pub mod numbering;
pub mod size_field;

pub use field::Field;
pub use numbering::{GlobalNumbering, LocalNumbering};
pub use size_field::{SizeField, SizeTensor};
