//! Entity dimensions, handles, ownership and tags of the adaptation mesh.

pub mod dimension;
pub mod handle;
pub mod labels;
pub mod ownership;
pub mod simplex;

pub use dimension::EntityDim;
pub use handle::EntityHandle;
pub use labels::{LabelSet, Material};
pub use ownership::Ownership;
