#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use varship::kernel::aggregator::AggregatorConfig;
use varship::kernel::pipeline::PipelineConfig;
use varship::kernel::slot::SlotSpec;
use varship::kernel::worker::WorkerConfig;
use varship::services::broker::{Broker, BrokerError};

/// How a `ScriptedBroker` answers.
#[derive(Debug, Clone, Copy)]
pub enum Script {
    /// Acknowledge everything.
    Ack,
    /// Reject everything, handshake included.
    RejectAll,
    /// Acknowledge the handshake, reject every report.
    RejectReports,
    /// Never answer anything.
    Silent,
    /// Acknowledge the handshake, never answer a report.
    StallReports,
    /// Reject only the n-th report publish (1-based), acknowledge the rest.
    RejectNth(u64),
    /// Acknowledge after a delay.
    Slow(Duration),
}

/// In-memory broker that records what it was sent.
pub struct ScriptedBroker {
    script: Script,
    handshakes: AtomicU64,
    publishes: AtomicU64,
    payloads: Mutex<Vec<serde_json::Value>>,
}

impl ScriptedBroker {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            handshakes: AtomicU64::new(0),
            publishes: AtomicU64::new(0),
            payloads: Mutex::new(Vec::new()),
        })
    }

    pub fn handshakes(&self) -> u64 {
        self.handshakes.load(Ordering::SeqCst)
    }

    pub fn publishes(&self) -> u64 {
        self.publishes.load(Ordering::SeqCst)
    }

    /// Total calls of either kind.
    pub fn attempts(&self) -> u64 {
        self.handshakes() + self.publishes()
    }

    /// Decoded report payloads, in arrival order.
    pub fn payloads(&self) -> Vec<serde_json::Value> {
        self.payloads.lock().unwrap().clone()
    }

    fn rejected() -> BrokerError {
        BrokerError::Rejected {
            status: 500,
            body: "E_SCRIPTED".to_string(),
        }
    }
}

#[async_trait]
impl Broker for ScriptedBroker {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn publish(&self, _topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        let attempt = self.publishes.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(value) = serde_json::from_slice(&payload) {
            self.payloads.lock().unwrap().push(value);
        }
        match self.script {
            Script::Ack => Ok(()),
            Script::RejectAll | Script::RejectReports => Err(Self::rejected()),
            Script::Silent | Script::StallReports => std::future::pending().await,
            Script::RejectNth(n) if attempt == n => Err(Self::rejected()),
            Script::RejectNth(_) => Ok(()),
            Script::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }

    async fn handshake(&self, _topic: &str, _payload: Vec<u8>) -> Result<(), BrokerError> {
        self.handshakes.fetch_add(1, Ordering::SeqCst);
        match self.script {
            Script::Ack
            | Script::RejectReports
            | Script::StallReports
            | Script::RejectNth(_)
            | Script::Slow(_) => Ok(()),
            Script::RejectAll => Err(Self::rejected()),
            Script::Silent => std::future::pending().await,
        }
    }
}

pub fn specs(n: u32) -> Vec<SlotSpec> {
    (0..n)
        .map(|index| SlotSpec {
            index,
            source_file: "app.py".to_string(),
            source_line: 10 + index,
            condition: None,
            variable_expr: format!("var{index}"),
            primary_expr: format!("var{index}"),
            source_line_text: format!("var{index} = compute()"),
        })
        .collect()
}

pub fn worker_config(failure_budget: u64) -> WorkerConfig {
    WorkerConfig {
        topic: "varcollect".to_string(),
        handshake_topic: "varcollect_shake".to_string(),
        handshake_payload: "hello".to_string(),
        failure_budget,
        handshake_timeout: Duration::from_secs(2),
        handshake_retry: Duration::from_millis(5),
        max_in_flight: 16,
    }
}

pub fn pipeline_config(batch_limit: u64, workers: usize, failure_budget: u64) -> PipelineConfig {
    PipelineConfig {
        aggregator: AggregatorConfig {
            name: "it".to_string(),
            batch_limit,
        },
        queue_capacity: 16,
        workers,
        worker: worker_config(failure_budget),
        join_timeout: Duration::from_secs(5),
        file_sink: None,
    }
}
