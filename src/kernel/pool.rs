use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::aggregator::AggregatorStats;
use super::queue::QueueConsumer;
use super::worker::{Worker, WorkerConfig, WorkerReport, WorkerSnapshot};
use crate::outputs::file_sink::FileSink;
use crate::services::broker::Broker;

/// Time a cancelled straggler gets to wind down before it is aborted.
const CANCEL_GRACE: Duration = Duration::from_millis(500);

/// Outcome of the end-of-stream join.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSummary {
    /// Reports of every worker that returned, ordered by id.
    pub workers: Vec<WorkerReport>,
    /// Workers that missed the join deadline.
    pub unjoined: Vec<usize>,
    pub aggregator: AggregatorStats,
    /// The queue was lost while sending the final flush or sentinels.
    pub queue_lost: bool,
    /// End-of-stream reports that could not be enqueued before the join
    /// deadline.
    pub missing_sentinels: usize,
}

impl ShutdownSummary {
    pub fn fatal_workers(&self) -> impl Iterator<Item = &WorkerReport> {
        self.workers.iter().filter(|w| w.outcome.is_fatal())
    }

    /// Every worker drained and stopped on its own.
    pub fn is_clean(&self) -> bool {
        self.unjoined.is_empty()
            && !self.queue_lost
            && self.missing_sentinels == 0
            && self.fatal_workers().next().is_none()
    }
}

/// The set of transport workers draining one queue.
pub struct WorkerPool {
    handles: Vec<(usize, JoinHandle<WorkerReport>)>,
    status: Vec<watch::Receiver<WorkerSnapshot>>,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Spawns `count` workers. `brokers` is called once per worker so each
    /// gets its own connection.
    pub fn spawn<F>(
        count: usize,
        config: Arc<WorkerConfig>,
        brokers: F,
        queue: QueueConsumer,
        file_sink: Option<&Path>,
    ) -> Self
    where
        F: Fn(usize) -> Arc<dyn Broker>,
    {
        let cancel = CancellationToken::new();
        let mut handles = Vec::with_capacity(count);
        let mut status = Vec::with_capacity(count);

        for id in 0..count {
            let mut worker = Worker::new(id, Arc::clone(&config), brokers(id), queue.clone())
                .with_cancel(cancel.child_token());
            if let Some(base) = file_sink {
                worker = worker.with_file_sink(FileSink::worker_path(base, id, count));
            }
            status.push(worker.subscribe());
            handles.push((id, tokio::spawn(worker.run())));
        }

        info!(workers = count, "worker pool started");
        Self {
            handles,
            status,
            cancel,
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Latest phase and counters of every worker, by id.
    pub fn snapshots(&self) -> Vec<WorkerSnapshot> {
        self.status.iter().map(|rx| *rx.borrow()).collect()
    }

    /// Tells every worker to give up. Each stops as `Abandoned` and releases
    /// its queue consumer.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for every worker, but not past `deadline`.
    ///
    /// Stragglers are cancelled, given a short grace period, then aborted.
    /// They are listed in `unjoined` either way.
    pub async fn join(self, deadline: Instant) -> ShutdownSummary {
        let mut summary = ShutdownSummary::default();
        let mut stragglers = Vec::new();

        for (id, mut handle) in self.handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(report)) => summary.workers.push(report),
                Ok(Err(e)) => {
                    error!(worker = id, error = %e, "worker task ended abnormally");
                    summary.unjoined.push(id);
                }
                Err(_) => stragglers.push((id, handle)),
            }
        }

        if !stragglers.is_empty() {
            let ids: Vec<usize> = stragglers.iter().map(|(id, _)| *id).collect();
            error!(unjoined = ?ids, "workers did not stop in time, cancelling");
            self.cancel.cancel();

            for (id, mut handle) in stragglers {
                summary.unjoined.push(id);
                match tokio::time::timeout(CANCEL_GRACE, &mut handle).await {
                    Ok(Ok(report)) => summary.workers.push(report),
                    _ => handle.abort(),
                }
            }
        }

        summary.workers.sort_by_key(|w| w.id);
        summary.unjoined.sort_unstable();
        summary
    }
}
