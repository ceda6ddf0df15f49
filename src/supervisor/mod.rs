//! Long-lived loops and their registry

pub mod fault_center;
pub mod registry;

pub use fault_center::{FaultCenterSupervisor, FilterOutcome};
pub use registry::TaskRegistry;

pub(crate) use fault_center::panic_message;
