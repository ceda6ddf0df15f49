//! Synthetic probing
//!
//! Every enabled rule runs two independent loops that only share the cached
//! probing event:
//!
//! ```text
//! ProbingSupervisor: every eval_interval → probe → history → evaluate → cache
//! ProbingConsumer:   every second        → cache → repeat gate → notify
//! ```

pub mod consumer;
pub mod evaluator;
pub mod http;
pub mod icmp;
pub mod prober;
pub mod ssl;
pub mod supervisor;
pub mod tcp;

pub use consumer::{Consumed, ProbingConsumer};
pub use evaluator::{FrequencyCounters, ProbingEvaluator, RECOVERY_THRESHOLD, Transition};
pub use prober::{ProbeError, ProbeOutcome, Prober, ProberRegistry};
pub use supervisor::ProbingSupervisor;
