pub mod address;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod gateway;
pub mod handler;
pub mod registrar;
pub mod retry;
pub mod transport;
pub mod types;

pub use address::{resolve, ConsumerIdentity};
pub use config::{MessagingConfig, TransportConfig};
pub use endpoint::{
    EndpointDefaults, EndpointOptions, EndpointSpec, ExchangeKind, DEFAULT_PREFETCH_COUNT,
};
pub use error::{ErrorKind, MessagingError};
pub use gateway::{ConventionTable, ConventionTableBuilder, SendGateway};
pub use handler::{Consumer, EventCallback};
pub use registrar::{Registrar, Registration, RetrySettings};
pub use retry::{
    run_with_retry, RetryDescriptor, RetryPolicyBuilder, RetryReporter, RetryStage,
    TracingRetryReporter,
};
pub use transport::{SendEndpoint, SendTransport};
pub use types::{Envelope, SendContext};
