//! Broker boundary: one-time handshake, then fire-and-acknowledge publishes.
//!
//! Transport-level retries never happen here. A failed publish is reported
//! back to the worker, which counts it against its failure budget.

pub mod discard;
pub mod nsq;

use async_trait::async_trait;
use thiserror::Error;

pub use discard::DiscardBroker;
pub use nsq::NsqHttpBroker;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("broker transport error: {0}")]
    Transport(String),

    #[error("broker rejected publish (status {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("broker did not answer in time")]
    Timeout,
}

/// A downstream message broker. `Ok(())` is an acknowledgment.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Short label for logs.
    fn name(&self) -> &str;

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError>;

    /// Liveness exchange sent once before any report. Brokers without a
    /// dedicated handshake treat it as an ordinary publish.
    async fn handshake(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        self.publish(topic, payload).await
    }
}
