use async_trait::async_trait;

use super::{Broker, BrokerError};

/// Acknowledges every publish without sending anything. Used when only the
/// file mirror should receive the stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardBroker;

#[async_trait]
impl Broker for DiscardBroker {
    fn name(&self) -> &str {
        "discard"
    }

    async fn publish(&self, _topic: &str, _payload: Vec<u8>) -> Result<(), BrokerError> {
        Ok(())
    }
}
