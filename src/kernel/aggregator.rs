use std::collections::HashMap;

use tracing::{debug, info, warn};

use super::error::{PipelineError, SampleError};
use super::queue::QueueProducer;
use super::report::{Report, SlotEntry};
use super::sample::{ObservationId, Sample};
use super::slot::{ObservationSlot, SlotSpec};

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Copied into every report as `name`.
    pub name: String,
    /// Accepted samples that trigger an automatic flush.
    pub batch_limit: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregatorStats {
    pub ingested: u64,
    pub dropped: u64,
    pub data_reports: u64,
    pub sentinels: u64,
}

/// Groups samples by observation index and turns them into reports.
///
/// Owns every slot exclusively; the queue producer is its only link to the
/// transport side. A full queue suspends `ingest`, which is how a slow broker
/// throttles the instrumentation source.
pub struct Aggregator {
    config: AggregatorConfig,
    slots: HashMap<ObservationId, ObservationSlot>,
    queue: QueueProducer,
    next_sequence: u64,
    since_flush: u64,
    stats: AggregatorStats,
    closed: bool,
    queue_lost: bool,
}

impl Aggregator {
    pub fn new(config: AggregatorConfig, specs: Vec<SlotSpec>, queue: QueueProducer) -> Self {
        let slots: HashMap<_, _> = specs
            .into_iter()
            .map(|spec| (spec.index, ObservationSlot::new(spec)))
            .collect();

        info!(
            name = %config.name,
            slots = slots.len(),
            batch_limit = config.batch_limit,
            "aggregator initialised"
        );

        Self {
            config,
            slots,
            queue,
            next_sequence: 0,
            since_flush: 0,
            stats: AggregatorStats::default(),
            closed: false,
            queue_lost: false,
        }
    }

    pub fn stats(&self) -> AggregatorStats {
        self.stats
    }

    /// Accepted samples since the last flush.
    pub fn pending(&self) -> u64 {
        self.since_flush
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Applies the retention rule for one sample and flushes when the batch
    /// limit is reached.
    ///
    /// Samples for unknown indices are dropped and logged. Only a lost queue
    /// or use after end-of-stream is returned as an error.
    pub async fn ingest(&mut self, sample: Sample) -> Result<(), PipelineError> {
        self.check_open()?;

        let Some(slot) = self.slots.get_mut(&sample.index) else {
            self.drop_sample(SampleError::UnknownIndex(sample.index));
            return Ok(());
        };
        slot.retain(sample);

        self.stats.ingested += 1;
        self.since_flush += 1;

        if self.since_flush >= self.config.batch_limit {
            self.flush().await?;
        }
        Ok(())
    }

    /// Records a sample that never made it into a slot.
    pub fn drop_sample(&mut self, err: SampleError) {
        self.stats.dropped += 1;
        warn!(error = %err, dropped = self.stats.dropped, "sample dropped");
    }

    /// Snapshots and clears every non-empty slot into one data report.
    ///
    /// Returns the report's sequence, or `None` when nothing was buffered
    /// (empty reports are never enqueued).
    pub async fn flush(&mut self) -> Result<Option<u64>, PipelineError> {
        if self.queue_lost {
            return Err(PipelineError::QueueUnavailable);
        }
        self.since_flush = 0;

        let mut entries: Vec<SlotEntry> = self
            .slots
            .values_mut()
            .filter(|slot| !slot.is_empty())
            .map(SlotEntry::drain_from)
            .collect();
        if entries.is_empty() {
            return Ok(None);
        }
        entries.sort_by_key(|e| e.index);

        let sequence = self.take_sequence();
        debug!(
            sequence,
            entries = entries.len(),
            queue_free = self.queue.available(),
            "flushing report"
        );
        self.send(Report::data(sequence, &self.config.name, entries))
            .await?;
        self.stats.data_reports += 1;
        Ok(Some(sequence))
    }

    /// Final flush followed by `sentinels` end-of-stream reports, one per
    /// worker. Further ingestion is refused afterwards.
    pub async fn close(&mut self, sentinels: usize) -> Result<usize, PipelineError> {
        self.check_open()?;
        self.closed = true;

        self.flush().await?;
        for _ in 0..sentinels {
            let sequence = self.take_sequence();
            self.send(Report::end_of_stream(sequence, &self.config.name))
                .await?;
            self.stats.sentinels += 1;
        }

        info!(
            sentinels,
            ingested = self.stats.ingested,
            dropped = self.stats.dropped,
            reports = self.stats.data_reports,
            "aggregator closed"
        );
        Ok(sentinels)
    }

    fn check_open(&self) -> Result<(), PipelineError> {
        if self.closed {
            return Err(PipelineError::AlreadyClosed);
        }
        if self.queue_lost {
            return Err(PipelineError::QueueUnavailable);
        }
        Ok(())
    }

    fn take_sequence(&mut self) -> u64 {
        let seq = self.next_sequence;
        self.next_sequence += 1;
        seq
    }

    async fn send(&mut self, report: Report) -> Result<(), PipelineError> {
        if let Err(e) = self.queue.enqueue(report).await {
            self.queue_lost = true;
            tracing::error!("report queue closed unexpectedly, aggregator halted");
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::queue::ReportQueue;
    use crate::kernel::sample::EventKind;
    use serde_json::json;

    fn specs(n: u32) -> Vec<SlotSpec> {
        (0..n)
            .map(|index| SlotSpec {
                index,
                source_file: "app.py".to_string(),
                source_line: index + 1,
                condition: None,
                variable_expr: format!("v{index}"),
                primary_expr: format!("v{index}"),
                source_line_text: String::new(),
            })
            .collect()
    }

    fn config(batch_limit: u64) -> AggregatorConfig {
        AggregatorConfig {
            name: "unit".to_string(),
            batch_limit,
        }
    }

    #[tokio::test]
    async fn unknown_index_is_dropped_not_fatal() {
        let (producer, _consumer) = ReportQueue::bounded(4);
        let mut agg = Aggregator::new(config(10), specs(1), producer);

        agg.ingest(Sample::keyed_by_value(7, EventKind::Line, json!(1)))
            .await
            .unwrap();
        agg.ingest(Sample::keyed_by_value(0, EventKind::Line, json!(1)))
            .await
            .unwrap();

        let stats = agg.stats();
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.ingested, 1);
        assert_eq!(agg.pending(), 1);
    }

    #[tokio::test]
    async fn empty_flush_enqueues_nothing() {
        let (producer, consumer) = ReportQueue::bounded(4);
        let mut agg = Aggregator::new(config(10), specs(2), producer);

        assert_eq!(agg.flush().await.unwrap(), None);
        assert!(consumer.try_dequeue().is_none());
    }

    #[tokio::test]
    async fn ingest_after_close_is_refused() {
        let (producer, _consumer) = ReportQueue::bounded(4);
        let mut agg = Aggregator::new(config(10), specs(1), producer);
        agg.close(1).await.unwrap();

        let err = agg
            .ingest(Sample::keyed_by_value(0, EventKind::Line, json!(1)))
            .await;
        assert!(matches!(err, Err(PipelineError::AlreadyClosed)));
    }

    #[tokio::test]
    async fn lost_queue_halts_ingestion() {
        let (producer, consumer) = ReportQueue::bounded(4);
        drop(consumer);
        let mut agg = Aggregator::new(config(1), specs(1), producer);

        let err = agg
            .ingest(Sample::keyed_by_value(0, EventKind::Line, json!(1)))
            .await;
        assert!(matches!(err, Err(PipelineError::QueueUnavailable)));

        let again = agg
            .ingest(Sample::keyed_by_value(0, EventKind::Line, json!(2)))
            .await;
        assert!(matches!(again, Err(PipelineError::QueueUnavailable)));
    }
}
