// eventshop-messaging-core/src/endpoint.rs
use std::num::NonZeroU16;

use crate::retry::RetryDescriptor;

pub const DEFAULT_PREFETCH_COUNT: NonZeroU16 = match NonZeroU16::new(5) {
    Some(count) => count,
    None => panic!("prefetch count must be non-zero"),
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExchangeKind {
    #[default]
    Fanout,
    Direct,
    Topic,
}

/// Attributes applied to every endpoint unless a consumer overrides them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDefaults {
    pub prefetch_count: NonZeroU16,
    pub configure_consume_topology: bool,
    pub auto_delete: bool,
    pub exchange_kind: ExchangeKind,
}

impl Default for EndpointDefaults {
    fn default() -> Self {
        Self {
            prefetch_count: DEFAULT_PREFETCH_COUNT,
            configure_consume_topology: false,
            auto_delete: false,
            exchange_kind: ExchangeKind::Fanout,
        }
    }
}

/// Per-consumer overrides; `None` keeps the registrar default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointOptions {
    pub prefetch_count: Option<NonZeroU16>,
    pub configure_consume_topology: Option<bool>,
    pub auto_delete: Option<bool>,
    pub exchange_kind: Option<ExchangeKind>,
    pub routing_key: Option<String>,
}

/// Everything the transport needs to bind one receive endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSpec {
    address: String,
    routing_key: String,
    exchange_kind: ExchangeKind,
    prefetch_count: NonZeroU16,
    configure_consume_topology: bool,
    auto_delete: bool,
    retry: RetryDescriptor,
}

impl EndpointSpec {
    /// The routing key defaults to the address itself.
    pub fn new(
        address: String,
        defaults: &EndpointDefaults,
        options: EndpointOptions,
        retry: RetryDescriptor,
    ) -> Self {
        Self {
            routing_key: options.routing_key.unwrap_or_else(|| address.clone()),
            address,
            exchange_kind: options.exchange_kind.unwrap_or(defaults.exchange_kind),
            prefetch_count: options.prefetch_count.unwrap_or(defaults.prefetch_count),
            configure_consume_topology: options
                .configure_consume_topology
                .unwrap_or(defaults.configure_consume_topology),
            auto_delete: options.auto_delete.unwrap_or(defaults.auto_delete),
            retry,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn exchange_kind(&self) -> ExchangeKind {
        self.exchange_kind
    }

    pub fn prefetch_count(&self) -> NonZeroU16 {
        self.prefetch_count
    }

    pub fn configure_consume_topology(&self) -> bool {
        self.configure_consume_topology
    }

    pub fn auto_delete(&self) -> bool {
        self.auto_delete
    }

    pub fn retry(&self) -> &RetryDescriptor {
        &self.retry
    }
}
