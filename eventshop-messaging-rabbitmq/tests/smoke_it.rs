use eventshop_messaging_core::{
    Consumer, ConsumerIdentity, ConventionTable, Envelope, EventCallback, MessagingConfig,
    MessagingError, Registrar, SendGateway, TransportConfig,
};
use eventshop_messaging_rabbitmq::{RabbitEventBus, RabbitMqOptions};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct SmokeTested {
    ok: bool,
}

struct SmokeTestedConsumer(Mutex<Option<oneshot::Sender<SmokeTested>>>);

#[async_trait::async_trait]
impl EventCallback for SmokeTestedConsumer {
    async fn handle(&self, _rk: &str, body: &[u8]) -> Result<(), MessagingError> {
        let envelope = Envelope::<SmokeTested>::from_slice(body)?;
        if let Some(tx) = self.0.lock().unwrap().take() {
            let _ = tx.send(envelope.message);
        }
        Ok(())
    }
}

impl Consumer for SmokeTestedConsumer {
    fn identity(&self) -> ConsumerIdentity {
        ConsumerIdentity::of::<Self>()
    }
}

#[tokio::test]
#[ignore = "requires a RabbitMQ broker on localhost:5672"]
async fn send_by_convention_reaches_registered_consumer() -> Result<(), Box<dyn std::error::Error>>
{
    let config = MessagingConfig {
        transport: TransportConfig {
            host: "localhost".into(),
            virtual_host: "/".into(),
            user: "admin".into(),
            pass: "admin".into(),
            port: 5672,
            use_ssl: false,
        },
        prefix: "it".into(),
    };

    let bus = RabbitEventBus::connect(RabbitMqOptions::from_config(&config, "test")).await?;

    let (tx, rx) = oneshot::channel();
    let consumers: Vec<Arc<dyn Consumer>> =
        vec![Arc::new(SmokeTestedConsumer(Mutex::new(Some(tx))))];
    let bound = bus
        .register_consumers(&Registrar::new(), &consumers, &config)
        .await?;
    assert_eq!(bound, 1);
    tokio::time::sleep(std::time::Duration::from_millis(400)).await;

    let conventions = ConventionTable::builder(&config.prefix)
        .consumer::<SmokeTested>("SmokeTestedConsumer")?
        .build();
    assert_eq!(
        conventions.address_for::<SmokeTested>(),
        Some("it.smoketested.event.v1")
    );

    let gateway = SendGateway::new(bus, conventions);
    gateway
        .send_by_convention(&SmokeTested { ok: true }, &CancellationToken::new())
        .await?;

    let received = tokio::time::timeout(std::time::Duration::from_secs(5), rx).await??;
    assert_eq!(received, SmokeTested { ok: true });
    Ok(())
}
