mod options;
mod rabbit_event_bus;

pub use options::{dlq_queue, RabbitMqOptions};
pub use rabbit_event_bus::{RabbitEventBus, RabbitSendEndpoint};
