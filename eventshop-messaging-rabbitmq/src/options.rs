use eventshop_messaging_core::MessagingConfig;

#[derive(Clone, Debug)]
pub struct RabbitMqOptions {
    pub uri: String,
    /// Shared topic exchange used when an endpoint configures consume topology.
    pub exchange: String,
    pub service: String,
    pub durable: bool,
    /// When true, publisher confirms are enabled and every send waits for the broker ACK/NACK.
    pub confirms: bool,
}

impl RabbitMqOptions {
    pub fn from_config(config: &MessagingConfig, service: &str) -> Self {
        Self {
            uri: config.transport.amqp_uri(),
            exchange: format!("{}.exchange", config.prefix),
            service: service.to_string(),
            durable: true,
            confirms: true,
        }
    }
}

/// Conventional dead-letter queue name for an endpoint queue.
pub fn dlq_queue(queue: &str) -> String {
    format!("{}.dlq", queue)
}
