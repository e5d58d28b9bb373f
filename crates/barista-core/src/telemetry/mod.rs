//! Telemetry decoding: vendor dashboard JSON into typed machine state.

pub mod decoder;
pub mod types;

pub use decoder::{apply_update, decode_dashboard};
pub use types::{
    BoilerKind, BoilerUpdate, BoilerView, BrewingView, DashboardUpdate, MachineEvent,
    MachineSnapshot, MachineStatusUpdate,
};
