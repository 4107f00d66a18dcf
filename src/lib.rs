pub mod allocation;
pub mod allocator;
pub mod api;
pub mod bandwidth;
pub mod config;
pub mod constraints;
pub mod controller;
pub mod entity;
pub mod media;
pub mod scenario;
pub mod settings;
pub mod source;

pub use allocation::{Allocation, SourceAllocation};
pub use allocator::{AllocationOutcome, Allocator, LayerSelection, UnitState};
pub use bandwidth::{BandwidthChangeGate, BandwidthEstimate};
pub use config::{AllocatorConfig, ConfigError};
pub use controller::{
    AllocationController, AllocationEvent, AllocationEventHandler, Conference, DebugState,
    StaticConference,
};
pub use source::SourceAllocationUnit;
