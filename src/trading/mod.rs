//! Replication logic: proportional sizing and the event-driven
//! controller.

mod controller;
mod sizer;

pub use controller::{
    ControlHandle, ControllerConfig, EngineStats, EngineStatus, ReplicationController,
};
pub use sizer::{PositionSizer, SizerConfig};
