// eventshop-messaging-core/src/error.rs
use std::borrow::Cow;
use std::fmt;

use thiserror::Error;

/// Classifier used by retry policies to decide whether a failure is retried.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ErrorKind(Cow<'static, str>);

impl ErrorKind {
    /// Deliberate cancellation by the consumer. Never retried.
    pub const CONSUMER_CANCELED: ErrorKind = ErrorKind(Cow::Borrowed("consumer_canceled"));
    pub const HANDLER: ErrorKind = ErrorKind(Cow::Borrowed("handler"));
    pub const SERIALIZATION: ErrorKind = ErrorKind(Cow::Borrowed("serialization"));
    pub const CONNECTION: ErrorKind = ErrorKind(Cow::Borrowed("connection"));
    pub const DELIVERY: ErrorKind = ErrorKind(Cow::Borrowed("delivery"));
    pub const CONFIGURATION: ErrorKind = ErrorKind(Cow::Borrowed("configuration"));
    /// Send aborted by the caller's cancellation token.
    pub const CANCELED: ErrorKind = ErrorKind(Cow::Borrowed("canceled"));

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("subscribe error: {0}")]
    Subscribe(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("handler error ({kind}): {message}")]
    Handler { kind: ErrorKind, message: String },

    #[error("consumer canceled: {0}")]
    ConsumerCanceled(String),

    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("address {address} is already bound to {existing}, cannot bind {conflicting}")]
    Registration {
        address: String,
        existing: String,
        conflicting: String,
    },

    #[error("no send convention registered for message type {0}")]
    ConventionNotFound(String),

    #[error("delivery to {address} failed: {reason}")]
    Delivery { address: String, reason: String },

    #[error("send to {address} was canceled")]
    Canceled { address: String },

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl MessagingError {
    /// Handler failure tagged with a caller-defined kind.
    pub fn handler(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Handler {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection(_) | Self::Subscribe(_) => ErrorKind::CONNECTION,
            Self::Serialization(_) => ErrorKind::SERIALIZATION,
            Self::Handler { kind, .. } => kind.clone(),
            Self::ConsumerCanceled(_) => ErrorKind::CONSUMER_CANCELED,
            Self::InvalidIdentifier(_)
            | Self::Registration { .. }
            | Self::ConventionNotFound(_)
            | Self::Configuration(_) => ErrorKind::CONFIGURATION,
            Self::Delivery { .. } => ErrorKind::DELIVERY,
            Self::Canceled { .. } => ErrorKind::CANCELED,
        }
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
