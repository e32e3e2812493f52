// eventshop-messaging-core/src/transport.rs
use async_trait::async_trait;

use crate::{MessagingError, SendContext};

/// A resolved send channel for one destination address.
#[async_trait]
pub trait SendEndpoint: Send + Sync {
    async fn send<M: serde::Serialize + Send + Sync>(
        &self,
        message: &M,
        context: &SendContext,
    ) -> Result<(), MessagingError>;
}

/// Send primitive of the broker client. Serialization and envelopes are the
/// transport's concern.
#[async_trait]
pub trait SendTransport: Send + Sync {
    type Endpoint: SendEndpoint;

    async fn send_endpoint(&self, address: &str) -> Result<Self::Endpoint, MessagingError>;
}
