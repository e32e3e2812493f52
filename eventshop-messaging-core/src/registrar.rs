// eventshop-messaging-core/src/registrar.rs
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::retry::{RetryPolicyBuilder, RetryReporter, TracingRetryReporter};
use crate::{
    Consumer, ConsumerIdentity, EndpointDefaults, EndpointSpec, ErrorKind, MessagingConfig,
    MessagingError,
};

/// Caller-configurable part of the endpoint retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySettings {
    pub limit: u32,
    pub interval: Duration,
    pub exemptions: Vec<ErrorKind>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            limit: crate::retry::DEFAULT_RETRY_LIMIT,
            interval: crate::retry::DEFAULT_RETRY_INTERVAL,
            exemptions: Vec::new(),
        }
    }
}

/// One endpoint ready to be bound by the transport.
#[derive(Clone)]
pub struct Registration {
    pub spec: EndpointSpec,
    pub identity: ConsumerIdentity,
    pub consumer: Arc<dyn Consumer>,
    pub reporter: Arc<dyn RetryReporter>,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("spec", &self.spec)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// Derives an [`EndpointSpec`] for every registered consumer and hands each
/// one to the transport.
#[derive(Clone)]
pub struct Registrar {
    retry: RetrySettings,
    defaults: EndpointDefaults,
    reporter: Arc<dyn RetryReporter>,
}

impl Default for Registrar {
    fn default() -> Self {
        Self::new()
    }
}

impl Registrar {
    pub fn new() -> Self {
        Self {
            retry: RetrySettings::default(),
            defaults: EndpointDefaults::default(),
            reporter: Arc::new(TracingRetryReporter),
        }
    }

    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_defaults(mut self, defaults: EndpointDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn RetryReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn defaults(&self) -> &EndpointDefaults {
        &self.defaults
    }

    /// Builds every registration without binding anything. Fails on the first
    /// invalid identifier or on two distinct consumers sharing an address; a
    /// consumer type listed twice under the same name is planned once.
    pub fn plan(
        &self,
        consumers: &[Arc<dyn Consumer>],
        config: &MessagingConfig,
    ) -> Result<Vec<Registration>, MessagingError> {
        let mut assigned: HashMap<String, ConsumerIdentity> = HashMap::new();
        let mut registrations = Vec::with_capacity(consumers.len());

        for consumer in consumers {
            let identity = consumer.identity();
            let address = identity.resolve(&config.prefix)?;

            if let Some(existing) = assigned.get(&address) {
                if existing.is_same_consumer(&identity) {
                    warn!(queue = %address, consumer = %identity, "consumer registered twice, binding once");
                    continue;
                }
                return Err(MessagingError::Registration {
                    address,
                    existing: existing.to_string(),
                    conflicting: identity.to_string(),
                });
            }

            let retry = RetryPolicyBuilder::new(self.retry.limit, self.retry.interval)
                .exempt_all(self.retry.exemptions.iter().cloned())
                .build();
            let spec = EndpointSpec::new(
                address.clone(),
                &self.defaults,
                consumer.endpoint_options(),
                retry,
            );

            assigned.insert(address, identity.clone());
            registrations.push(Registration {
                spec,
                identity,
                consumer: Arc::clone(consumer),
                reporter: Arc::clone(&self.reporter),
            });
        }

        Ok(registrations)
    }

    /// Plans all endpoints, then calls `bind` once per endpoint in order.
    /// Nothing is bound when planning fails.
    pub fn register<F>(
        &self,
        consumers: &[Arc<dyn Consumer>],
        config: &MessagingConfig,
        mut bind: F,
    ) -> Result<usize, MessagingError>
    where
        F: FnMut(Registration),
    {
        let registrations = self.plan(consumers, config)?;
        let count = registrations.len();

        for registration in registrations {
            info!(
                queue = %registration.spec.address(),
                consumer = %registration.identity,
                prefetch = registration.spec.prefetch_count().get(),
                "registering endpoint"
            );
            bind(registration);
        }

        Ok(count)
    }
}
