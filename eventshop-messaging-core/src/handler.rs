// eventshop-messaging-core/src/handler.rs
use crate::{ConsumerIdentity, EndpointOptions, MessagingError};
use async_trait::async_trait;

#[async_trait]
pub trait EventCallback: Send + Sync {
    async fn handle(&self, routing_key: &str, body: &[u8]) -> Result<(), MessagingError>;
}

/// A handler bound to its own queue. Consumers are registered explicitly at
/// startup; the identity determines the queue address.
pub trait Consumer: EventCallback {
    fn identity(&self) -> ConsumerIdentity;

    fn endpoint_options(&self) -> EndpointOptions {
        EndpointOptions::default()
    }
}
