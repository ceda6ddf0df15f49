//! Alert routing and notification engine
//!
//! Turns alert events and synthetic probe results held in a shared cache
//! into routed, deduplicated, silenced, escalated and rate-limited
//! notifications.

pub mod cache;
pub mod config;
pub mod duty;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod grouping;
pub mod models;
pub mod notify;
pub mod probing;
pub mod recovery;
pub mod senders;
pub mod silence;
pub mod store;
pub mod supervisor;

pub use engine::{Engine, EngineParts};
pub use error::{EngineError, EngineResult};
