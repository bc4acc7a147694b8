//! Telemetry delivery core.
//!
//! Samples flow through the aggregator into a bounded report queue, and the
//! transport workers drain that queue into the broker. The queue is the only
//! structure touched from more than one task.

pub mod aggregator;
pub mod error;
pub mod pipeline;
pub mod pool;
pub mod queue;
pub mod report;
pub mod sample;
pub mod slot;
pub mod worker;
