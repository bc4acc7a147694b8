use thiserror::Error;

use super::sample::ObservationId;

/// Conditions that surface to the caller of the aggregator.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Every consumer of the report queue is gone. No further samples can be
    /// delivered.
    #[error("report queue is unavailable")]
    QueueUnavailable,

    #[error("pipeline already signalled end-of-stream")]
    AlreadyClosed,

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Per-sample failures. Always absorbed: the sample is logged and dropped.
#[derive(Debug, Error)]
pub enum SampleError {
    #[error("no observation slot configured for index {0}")]
    UnknownIndex(ObservationId),

    #[error("undecodable sample: {0}")]
    Decode(String),
}

/// Terminal failure of a single transport worker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerFatal {
    #[error("failure budget exceeded ({failures} failures, budget {budget})")]
    FailureBudgetExceeded { failures: u64, budget: u64 },

    #[error("handshake was not acknowledged in time")]
    HandshakeTimeout,

    #[error("abandoned by the shutdown join")]
    Abandoned,
}
