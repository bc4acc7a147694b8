use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use super::error::PipelineError;
use super::report::Report;

/// Bounded FIFO of reports between the aggregator and the transport workers.
///
/// The single producer half suspends on a full queue. Consumer halves are
/// cheap clones sharing one receiver; whichever worker asks first gets the
/// oldest report.
pub struct ReportQueue;

impl ReportQueue {
    pub fn bounded(capacity: usize) -> (QueueProducer, QueueConsumer) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            QueueProducer { tx },
            QueueConsumer {
                rx: Arc::new(Mutex::new(rx)),
            },
        )
    }
}

#[derive(Debug)]
pub struct QueueProducer {
    tx: mpsc::Sender<Report>,
}

impl QueueProducer {
    /// Waits for free capacity, never drops. Fails only when every consumer
    /// has gone away.
    pub async fn enqueue(&self, report: Report) -> Result<(), PipelineError> {
        self.tx
            .send(report)
            .await
            .map_err(|_| PipelineError::QueueUnavailable)
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug, Clone)]
pub struct QueueConsumer {
    rx: Arc<Mutex<mpsc::Receiver<Report>>>,
}

impl QueueConsumer {
    /// Oldest pending report, waiting while the queue is empty. `None` once
    /// the producer is gone and nothing is left.
    ///
    /// Cancel safe: dropping the future before it resolves loses nothing.
    pub async fn dequeue(&self) -> Option<Report> {
        let mut rx = self.rx.lock().await;
        rx.recv().await
    }

    /// Non-blocking variant. `None` when the queue is empty or another
    /// consumer is currently waiting on it.
    pub fn try_dequeue(&self) -> Option<Report> {
        let mut rx = self.rx.try_lock().ok()?;
        rx.try_recv().ok()
    }
}
