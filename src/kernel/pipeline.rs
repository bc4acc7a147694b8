use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{error, info};

use super::aggregator::{Aggregator, AggregatorConfig, AggregatorStats};
use super::error::{PipelineError, SampleError};
use super::pool::{ShutdownSummary, WorkerPool};
use super::queue::ReportQueue;
use super::sample::Sample;
use super::slot::SlotSpec;
use super::worker::{WorkerConfig, WorkerSnapshot};
use crate::services::broker::Broker;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub aggregator: AggregatorConfig,
    pub queue_capacity: usize,
    pub workers: usize,
    pub worker: WorkerConfig,
    /// Upper bound on the end-of-stream join.
    pub join_timeout: Duration,
    /// Base path of the per-worker file mirror.
    pub file_sink: Option<PathBuf>,
}

/// Aggregator, queue and workers wired together.
///
/// Constructed explicitly and torn down with `signal_end_of_stream`; nothing
/// here is process-global.
pub struct Pipeline {
    aggregator: Aggregator,
    pool: Option<WorkerPool>,
    join_timeout: Duration,
}

impl Pipeline {
    /// Spawns the workers on the current tokio runtime.
    pub fn start<F>(
        config: PipelineConfig,
        specs: Vec<SlotSpec>,
        brokers: F,
    ) -> Result<Self, PipelineError>
    where
        F: Fn(usize) -> Arc<dyn Broker>,
    {
        if config.workers == 0 {
            return Err(PipelineError::Config("at least one worker is required".into()));
        }
        if config.aggregator.batch_limit == 0 {
            return Err(PipelineError::Config("batch limit must be positive".into()));
        }
        if config.worker.max_in_flight == 0 {
            return Err(PipelineError::Config("max in-flight must be positive".into()));
        }

        let (producer, consumer) = ReportQueue::bounded(config.queue_capacity);
        let pool = WorkerPool::spawn(
            config.workers,
            Arc::new(config.worker),
            brokers,
            consumer,
            config.file_sink.as_deref(),
        );
        let aggregator = Aggregator::new(config.aggregator, specs, producer);

        info!(
            capacity = config.queue_capacity,
            workers = config.workers,
            "pipeline started"
        );

        Ok(Self {
            aggregator,
            pool: Some(pool),
            join_timeout: config.join_timeout,
        })
    }

    pub async fn ingest(&mut self, sample: Sample) -> Result<(), PipelineError> {
        self.aggregator.ingest(sample).await
    }

    /// Counts and logs a sample the source could not deliver intact.
    pub fn reject(&mut self, err: SampleError) {
        self.aggregator.drop_sample(err);
    }

    /// Flushes whatever is buffered without waiting for the batch limit.
    pub async fn flush(&mut self) -> Result<Option<u64>, PipelineError> {
        self.aggregator.flush().await
    }

    pub fn stats(&self) -> AggregatorStats {
        self.aggregator.stats()
    }

    pub fn worker_status(&self) -> Vec<WorkerSnapshot> {
        self.pool
            .as_ref()
            .map(WorkerPool::snapshots)
            .unwrap_or_default()
    }

    /// Final flush, one end-of-stream report per worker, then a bounded
    /// join. `join_timeout` covers the whole sequence: if the queue is still
    /// full at the deadline, the workers are cancelled and the undelivered
    /// sentinels are recorded. A lost queue is recorded in the summary rather
    /// than skipping the join, so fatal workers are still reported.
    pub async fn signal_end_of_stream(&mut self) -> Result<ShutdownSummary, PipelineError> {
        let pool = self.pool.take().ok_or(PipelineError::AlreadyClosed)?;
        let deadline = Instant::now() + self.join_timeout;

        info!("end-of-stream signalled, shutting down workers");
        let mut queue_lost = false;
        let mut missing_sentinels = 0;
        let closed = tokio::time::timeout_at(deadline, self.aggregator.close(pool.len())).await;
        match closed {
            Ok(Ok(_)) => {}
            Ok(Err(PipelineError::QueueUnavailable)) => {
                error!("report queue lost during shutdown, buffered reports dropped");
                queue_lost = true;
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                let sent = self.aggregator.stats().sentinels as usize;
                missing_sentinels = pool.len().saturating_sub(sent);
                error!(
                    missing = missing_sentinels,
                    timeout = ?self.join_timeout,
                    "report queue still full at the join deadline, cancelling workers"
                );
                pool.cancel();
            }
        }

        let mut summary = pool.join(deadline).await;
        summary.aggregator = self.aggregator.stats();
        summary.queue_lost = queue_lost;
        summary.missing_sentinels = missing_sentinels;

        for report in summary.fatal_workers() {
            error!(worker = report.id, outcome = ?report.outcome, "worker ended fatally");
        }
        info!(
            joined = summary.workers.len(),
            unjoined = summary.unjoined.len(),
            "pipeline shut down"
        );
        Ok(summary)
    }
}
