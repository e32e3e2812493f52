// eventshop-messaging-core/src/gateway.rs
use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{address, MessagingError, SendContext, SendEndpoint, SendTransport};

/// Message type to destination address mapping, fixed at startup.
#[derive(Debug, Clone, Default)]
pub struct ConventionTable {
    routes: HashMap<TypeId, String>,
}

impl ConventionTable {
    pub fn builder(prefix: impl Into<String>) -> ConventionTableBuilder {
        ConventionTableBuilder {
            prefix: prefix.into(),
            routes: HashMap::new(),
        }
    }

    pub fn address_for<M: 'static>(&self) -> Option<&str> {
        self.routes.get(&TypeId::of::<M>()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

pub struct ConventionTableBuilder {
    prefix: String,
    routes: HashMap<TypeId, String>,
}

impl ConventionTableBuilder {
    /// Sends `M` to a literal address.
    pub fn map<M: 'static>(mut self, address: impl Into<String>) -> Self {
        self.routes.insert(TypeId::of::<M>(), address.into());
        self
    }

    /// Sends `M` to the queue the named consumer is bound to.
    pub fn consumer<M: 'static>(mut self, consumer_name: &str) -> Result<Self, MessagingError> {
        let address = address::resolve(consumer_name, &self.prefix)?;
        self.routes.insert(TypeId::of::<M>(), address);
        Ok(self)
    }

    pub fn build(self) -> ConventionTable {
        ConventionTable {
            routes: self.routes,
        }
    }
}

/// Application-facing send abstraction over a [`SendTransport`].
pub struct SendGateway<T> {
    instance_id: Uuid,
    transport: T,
    conventions: Arc<ConventionTable>,
}

impl<T: SendTransport> SendGateway<T> {
    pub fn new(transport: T, conventions: ConventionTable) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            transport,
            conventions: Arc::new(conventions),
        }
    }

    /// Process-unique id of this gateway, for log and trace correlation.
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn conventions(&self) -> &ConventionTable {
        &self.conventions
    }

    pub async fn send_to<M>(
        &self,
        message: &M,
        address: &str,
        cancel: &CancellationToken,
    ) -> Result<(), MessagingError>
    where
        M: serde::Serialize + Send + Sync,
    {
        let context = SendContext {
            gateway_id: self.instance_id,
            message_type: type_name::<M>(),
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(MessagingError::Canceled {
                address: address.to_string(),
            }),
            res = self.deliver(message, address, &context) => res,
        };

        match &outcome {
            Ok(()) => debug!(
                gateway_id = %self.instance_id,
                queue = %address,
                message_type = context.message_type,
                "message sent"
            ),
            Err(e) => warn!(
                gateway_id = %self.instance_id,
                queue = %address,
                message_type = context.message_type,
                error = %e,
                "send failed"
            ),
        }
        outcome
    }

    /// Sends to the address registered for `M`. An unmapped type fails before
    /// the transport is touched.
    pub async fn send_by_convention<M>(
        &self,
        message: &M,
        cancel: &CancellationToken,
    ) -> Result<(), MessagingError>
    where
        M: serde::Serialize + Send + Sync + 'static,
    {
        let address = self
            .conventions
            .address_for::<M>()
            .ok_or_else(|| MessagingError::ConventionNotFound(type_name::<M>().to_string()))?;
        self.send_to(message, address, cancel).await
    }

    async fn deliver<M>(
        &self,
        message: &M,
        address: &str,
        context: &SendContext,
    ) -> Result<(), MessagingError>
    where
        M: serde::Serialize + Send + Sync,
    {
        let endpoint = self
            .transport
            .send_endpoint(address)
            .await
            .map_err(|e| as_delivery_error(address, e))?;
        endpoint
            .send(message, context)
            .await
            .map_err(|e| as_delivery_error(address, e))
    }
}

fn as_delivery_error(address: &str, err: MessagingError) -> MessagingError {
    match err {
        MessagingError::Delivery { .. } => err,
        other => MessagingError::Delivery {
            address: address.to_string(),
            reason: other.to_string(),
        },
    }
}
