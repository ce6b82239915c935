//! Adapt-cycle states.

use std::fmt;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DriverState {
    #[default]
    Idle,
    MeshLoaded,
    Numbered,
    FieldsIn,
    SizeFieldReady,
    Adapting,
    MeshRebuilt,
    FieldsOut,
    Aborted,
}

impl DriverState {
    pub const fn name(self) -> &'static str {
        match self {
            DriverState::Idle => "Idle",
            DriverState::MeshLoaded => "MeshLoaded",
            DriverState::Numbered => "Numbered",
            DriverState::FieldsIn => "FieldsIn",
            DriverState::SizeFieldReady => "SizeFieldReady",
            DriverState::Adapting => "Adapting",
            DriverState::MeshRebuilt => "MeshRebuilt",
            DriverState::FieldsOut => "FieldsOut",
            DriverState::Aborted => "Aborted",
        }
    }

    /// True while a cycle holds mesh state.
    pub fn in_cycle(self) -> bool {
        !matches!(self, DriverState::Idle | DriverState::Aborted)
    }
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
