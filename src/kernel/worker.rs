use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::WorkerFatal;
use super::queue::QueueConsumer;
use super::report::Report;
use crate::outputs::file_sink::FileSink;
use crate::services::broker::{Broker, BrokerError};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub topic: String,
    pub handshake_topic: String,
    pub handshake_payload: String,
    /// Failures tolerated before the worker aborts. Exceeding it is fatal.
    pub failure_budget: u64,
    pub handshake_timeout: Duration,
    /// Delay before re-sending a rejected handshake.
    pub handshake_retry: Duration,
    /// Dequeuing pauses while this many publishes await acknowledgment.
    pub max_in_flight: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    Handshaking,
    Publishing,
    Draining,
    Stopped,
}

/// Counters owned by a single worker. The handshake is not counted in
/// `published`/`acknowledged`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerState {
    pub handshake_done: bool,
    pub published: u64,
    pub acknowledged: u64,
    pub failures: u64,
    pub end_of_stream_seen: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSnapshot {
    pub phase: WorkerPhase,
    pub state: WorkerState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    Completed,
    Fatal(WorkerFatal),
}

impl WorkerOutcome {
    pub fn is_fatal(&self) -> bool {
        matches!(self, WorkerOutcome::Fatal(_))
    }
}

/// Terminal status of one worker, as handed back to the shutdown join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub id: usize,
    pub state: WorkerState,
    pub outcome: WorkerOutcome,
}

/// Broker answers, delivered back into the worker's inbox.
enum Ack {
    Handshake(Result<(), BrokerError>),
    Report {
        sequence: u64,
        result: Result<(), BrokerError>,
    },
}

/// Drains the shared queue into the broker.
///
/// Publishes run as tasks in the worker's inbox (a `JoinSet`); their results
/// come back through the same `select!` that dequeues reports, so all state
/// mutation happens on the worker's own loop.
pub struct Worker {
    id: usize,
    config: Arc<WorkerConfig>,
    broker: Arc<dyn Broker>,
    queue: QueueConsumer,
    sink_path: Option<PathBuf>,
    sink: Option<FileSink>,
    cancel: CancellationToken,
    phase: WorkerPhase,
    state: WorkerState,
    outcome: WorkerOutcome,
    inbox: JoinSet<Ack>,
    status: watch::Sender<WorkerSnapshot>,
}

impl Worker {
    pub fn new(
        id: usize,
        config: Arc<WorkerConfig>,
        broker: Arc<dyn Broker>,
        queue: QueueConsumer,
    ) -> Self {
        let (status, _) = watch::channel(WorkerSnapshot {
            phase: WorkerPhase::Handshaking,
            state: WorkerState::default(),
        });
        Self {
            id,
            config,
            broker,
            queue,
            sink_path: None,
            sink: None,
            cancel: CancellationToken::new(),
            phase: WorkerPhase::Handshaking,
            state: WorkerState::default(),
            outcome: WorkerOutcome::Completed,
            inbox: JoinSet::new(),
            status,
        }
    }

    /// Mirror every published payload to `path`.
    pub fn with_file_sink(mut self, path: PathBuf) -> Self {
        self.sink_path = Some(path);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Live view of phase and counters, updated after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<WorkerSnapshot> {
        self.status.subscribe()
    }

    pub async fn run(mut self) -> WorkerReport {
        info!(worker = self.id, broker = self.broker.name(), "worker started");

        if let Some(path) = self.sink_path.clone() {
            match FileSink::open(&path).await {
                Ok(sink) => self.sink = Some(sink),
                Err(e) => warn!(worker = self.id, path = %path.display(), error = %e, "file mirror unavailable"),
            }
        }

        self.send_handshake(Duration::ZERO);
        let handshake_deadline = tokio::time::sleep(self.config.handshake_timeout);
        tokio::pin!(handshake_deadline);

        while self.phase != WorkerPhase::Stopped {
            match self.phase {
                WorkerPhase::Handshaking => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => self.stop(WorkerOutcome::Fatal(WorkerFatal::Abandoned)),
                        _ = &mut handshake_deadline => {
                            error!(worker = self.id, failures = self.state.failures, "handshake not acknowledged in time");
                            self.stop(WorkerOutcome::Fatal(WorkerFatal::HandshakeTimeout));
                        }
                        Some(joined) = self.inbox.join_next() => self.on_ack(joined),
                    }
                }
                WorkerPhase::Publishing => {
                    let room = self.has_room();
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => self.stop(WorkerOutcome::Fatal(WorkerFatal::Abandoned)),
                        Some(joined) = self.inbox.join_next() => self.on_ack(joined),
                        report = self.queue.dequeue(), if room => self.on_report(report).await,
                    }
                }
                WorkerPhase::Draining => {
                    if self.inbox.is_empty() {
                        self.stop(WorkerOutcome::Completed);
                        continue;
                    }
                    debug!(
                        worker = self.id,
                        acknowledged = self.state.acknowledged,
                        published = self.state.published,
                        "draining, waiting for acknowledgments"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => self.stop(WorkerOutcome::Fatal(WorkerFatal::Abandoned)),
                        Some(joined) = self.inbox.join_next() => self.on_ack(joined),
                    }
                }
                WorkerPhase::Stopped => {}
            }
        }

        self.release().await;

        info!(
            worker = self.id,
            published = self.state.published,
            acknowledged = self.state.acknowledged,
            failures = self.state.failures,
            fatal = self.outcome.is_fatal(),
            "worker stopped"
        );

        WorkerReport {
            id: self.id,
            state: self.state,
            outcome: self.outcome,
        }
    }

    fn send_handshake(&mut self, delay: Duration) {
        let broker = Arc::clone(&self.broker);
        let topic = self.config.handshake_topic.clone();
        let payload = self.config.handshake_payload.clone().into_bytes();

        self.inbox.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ack::Handshake(broker.handshake(&topic, payload).await)
        });
        info!(worker = self.id, topic = %self.config.handshake_topic, "handshake sent");
    }

    async fn on_report(&mut self, report: Option<Report>) {
        let Some(report) = report else {
            warn!(worker = self.id, "report queue closed without end-of-stream");
            self.enter(WorkerPhase::Draining);
            return;
        };

        let sequence = report.sequence;
        let end_of_stream = report.is_end_of_stream();

        match report.to_payload() {
            Ok(payload) => {
                if let Some(sink) = self.sink.as_mut() {
                    if let Err(e) = sink.append(&payload).await {
                        warn!(worker = self.id, sequence, error = %e, "file mirror write failed");
                    }
                }

                debug!(worker = self.id, sequence, bytes = payload.len(), "publishing report");
                let broker = Arc::clone(&self.broker);
                let topic = self.config.topic.clone();
                self.inbox.spawn(async move {
                    let result = broker.publish(&topic, payload).await;
                    Ack::Report { sequence, result }
                });
                self.state.published += 1;
            }
            Err(e) => {
                error!(worker = self.id, sequence, error = %e, "report serialization failed, dropped");
            }
        }

        if end_of_stream {
            self.state.end_of_stream_seen = true;
            info!(worker = self.id, sequence, "end-of-stream received");
            self.enter(WorkerPhase::Draining);
        } else {
            self.publish_status();
        }
    }

    fn on_ack(&mut self, joined: Result<Ack, JoinError>) {
        let ack = match joined {
            Ok(ack) => ack,
            Err(e) => {
                // A publish task that panicked never produced an answer.
                self.state.failures += 1;
                warn!(worker = self.id, error = %e, "publish task lost");
                if self.phase == WorkerPhase::Handshaking && !self.over_budget() {
                    self.send_handshake(self.config.handshake_retry);
                }
                self.check_budget();
                self.publish_status();
                return;
            }
        };

        match ack {
            Ack::Handshake(Ok(())) => {
                self.state.handshake_done = true;
                info!(worker = self.id, "handshake acknowledged");
                self.enter(WorkerPhase::Publishing);
            }
            Ack::Handshake(Err(e)) => {
                self.state.failures += 1;
                warn!(worker = self.id, failures = self.state.failures, error = %e, "handshake failed");
                if !self.over_budget() {
                    self.send_handshake(self.config.handshake_retry);
                }
            }
            Ack::Report {
                sequence,
                result: Ok(()),
            } => {
                self.state.acknowledged += 1;
                debug!(worker = self.id, sequence, "report acknowledged");
            }
            Ack::Report {
                sequence,
                result: Err(e),
            } => {
                self.state.failures += 1;
                warn!(worker = self.id, sequence, failures = self.state.failures, error = %e, "publish failed");
            }
        }

        self.check_budget();
        self.publish_status();
    }

    /// Another publish may start only while in-flight attempts could all
    /// fail without exceeding the budget, so a broker that rejects everything
    /// sees exactly `failure_budget + 1` attempts.
    fn has_room(&self) -> bool {
        let in_flight = self.inbox.len();
        in_flight < self.config.max_in_flight
            && self.state.failures + in_flight as u64 <= self.config.failure_budget
    }

    fn over_budget(&self) -> bool {
        self.state.failures > self.config.failure_budget
    }

    fn check_budget(&mut self) {
        if self.phase != WorkerPhase::Stopped && self.over_budget() {
            error!(
                worker = self.id,
                failures = self.state.failures,
                budget = self.config.failure_budget,
                "broker failure budget exceeded, stopping worker"
            );
            self.stop(WorkerOutcome::Fatal(WorkerFatal::FailureBudgetExceeded {
                failures: self.state.failures,
                budget: self.config.failure_budget,
            }));
        }
    }

    fn enter(&mut self, phase: WorkerPhase) {
        self.phase = phase;
        self.publish_status();
    }

    fn stop(&mut self, outcome: WorkerOutcome) {
        // Anything still in flight is abandoned.
        self.inbox.abort_all();
        self.outcome = outcome;
        self.enter(WorkerPhase::Stopped);
    }

    async fn release(&mut self) {
        self.inbox.shutdown().await;
        if let Some(sink) = self.sink.take() {
            let path = sink.path().display().to_string();
            debug!(worker = self.id, path = %path, records = sink.records(), "closing file mirror");
            if let Err(e) = sink.close().await {
                warn!(worker = self.id, path = %path, error = %e, "closing file mirror failed");
            }
        }
    }

    fn publish_status(&self) {
        self.status.send_replace(WorkerSnapshot {
            phase: self.phase,
            state: self.state,
        });
    }
}
