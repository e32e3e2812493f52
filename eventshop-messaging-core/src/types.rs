// eventshop-messaging-core/src/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::MessagingError;

/// Metadata a transport receives with every send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendContext {
    pub gateway_id: Uuid,
    pub message_type: &'static str,
}

/// Envelope transports put on the wire around a message body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    rename_all = "camelCase",
    bound(
        serialize = "TMessage: Serialize",
        deserialize = "TMessage: serde::de::Deserialize<'de>"
    )
)]
pub struct Envelope<TMessage> {
    pub message_id: Uuid,
    pub message_type: String,
    pub message: TMessage,
    pub sent_at_utc: DateTime<Utc>,
    pub source_gateway: Uuid,
}

impl<TMessage> Envelope<TMessage> {
    pub fn new(context: &SendContext, message: TMessage) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            message_type: context.message_type.to_string(),
            message,
            sent_at_utc: Utc::now(),
            source_gateway: context.gateway_id,
        }
    }
}

impl<TMessage> Envelope<TMessage>
where
    TMessage: for<'de> Deserialize<'de>,
{
    /// Decodes a delivery body produced by a transport.
    pub fn from_slice(body: &[u8]) -> Result<Self, MessagingError> {
        Ok(serde_json::from_slice(body)?)
    }
}
