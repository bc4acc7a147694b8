//! Boundary between the instrumentation source and the aggregator.

use tokio::runtime::Handle;

use crate::kernel::error::{PipelineError, SampleError};
use crate::kernel::pipeline::Pipeline;
use crate::kernel::pool::ShutdownSummary;
use crate::kernel::sample::Sample;

/// What an instrumentation source talks to.
pub trait SampleSink {
    /// Called once per observed variable per qualifying event. May block while
    /// the report queue is full.
    fn emit(&mut self, sample: Sample) -> Result<(), PipelineError>;

    /// Called exactly once when no further samples will be produced.
    fn emit_end_of_stream(&mut self) -> Result<ShutdownSummary, PipelineError>;
}

/// Decodes one NDJSON sample line, e.g.
/// `{"index":0,"event":"line","value":3,"primary":"a"}`.
pub fn decode_sample(line: &str) -> Result<Sample, SampleError> {
    serde_json::from_str(line).map_err(|e| SampleError::Decode(e.to_string()))
}

/// Synchronous handle for sources running on plain threads.
///
/// Drives the async pipeline through a runtime handle, so backpressure from a
/// full queue blocks the emitting thread. Must not be used from inside an
/// async task.
pub struct BlockingEmitter {
    pipeline: Pipeline,
    runtime: Handle,
}

impl BlockingEmitter {
    pub fn new(pipeline: Pipeline, runtime: Handle) -> Self {
        Self { pipeline, runtime }
    }

    /// Decodes and emits a raw line. Undecodable lines are dropped and
    /// counted, never returned as errors.
    pub fn emit_line(&mut self, line: &str) -> Result<(), PipelineError> {
        match decode_sample(line) {
            Ok(sample) => self.emit(sample),
            Err(e) => {
                self.pipeline.reject(e);
                Ok(())
            }
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }
}

impl SampleSink for BlockingEmitter {
    fn emit(&mut self, sample: Sample) -> Result<(), PipelineError> {
        let pipeline = &mut self.pipeline;
        self.runtime.block_on(pipeline.ingest(sample))
    }

    fn emit_end_of_stream(&mut self) -> Result<ShutdownSummary, PipelineError> {
        let pipeline = &mut self.pipeline;
        self.runtime.block_on(pipeline.signal_end_of_stream())
    }
}
