use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use lapin::{
    message::Delivery,
    options::*,
    types::{AMQPValue, FieldTable},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::{sync::RwLock, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::options::{dlq_queue, RabbitMqOptions};
use eventshop_messaging_core::{
    run_with_retry, Consumer, EndpointSpec, Envelope, ExchangeKind, MessagingConfig,
    MessagingError, Registrar, Registration, RetryReporter, SendContext, SendEndpoint,
    SendTransport,
};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

struct ConnState {
    conn: Connection,
    pub_ch: Channel,
}

/// What `current_channel` has to do before the publish channel is usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelHealth {
    Ready,
    /// The broker closed the channel (404 on an unknown exchange,
    /// PRECONDITION_FAILED, ...) but the connection is still up.
    ChannelClosed,
    Disconnected,
}

fn channel_health(connection_up: bool, channel_up: bool) -> ChannelHealth {
    match (connection_up, channel_up) {
        (false, _) => ChannelHealth::Disconnected,
        (true, false) => ChannelHealth::ChannelClosed,
        (true, true) => ChannelHealth::Ready,
    }
}

/// A queue binding: `(queue, exchange, routing_key)`.
type Binding = (String, String, String);

/// Bindings declared for one endpoint. The address exchange routes to its
/// queue under the address itself, which is the key every send publishes
/// with; a routing-key override only applies to the shared exchange.
fn endpoint_bindings(spec: &EndpointSpec, shared_exchange: &str) -> Vec<Binding> {
    let queue = spec.address();
    let dlq = dlq_queue(queue);

    let mut bindings = vec![
        (queue.to_string(), queue.to_string(), publish_routing_key(queue).to_string()),
        (dlq.clone(), shared_exchange.to_string(), dlq),
    ];
    if spec.configure_consume_topology() {
        bindings.push((
            queue.to_string(),
            shared_exchange.to_string(),
            spec.routing_key().to_string(),
        ));
    }
    bindings
}

fn publish_routing_key(address: &str) -> &str {
    address
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainOutcome {
    StreamEnded,
    Shutdown,
}

/// Runs `handle` on up to `limit` deliveries at once until the stream ends or
/// `shutdown` fires. Shutdown drops in-flight handlers, retry sleeps included;
/// their unsettled deliveries are redelivered by the broker.
async fn drain_deliveries<S, F, Fut>(
    deliveries: S,
    limit: usize,
    shutdown: &CancellationToken,
    handle: F,
) -> DrainOutcome
where
    S: Stream,
    F: FnMut(S::Item) -> Fut,
    Fut: Future<Output = ()>,
{
    tokio::select! {
        _ = shutdown.cancelled() => DrainOutcome::Shutdown,
        _ = deliveries.for_each_concurrent(limit.max(1), handle) => DrainOutcome::StreamEnded,
    }
}

async fn process_delivery(
    spec: &EndpointSpec,
    consumer: &dyn Consumer,
    reporter: &dyn RetryReporter,
    delivery: Delivery,
) {
    let queue = spec.address();
    let rk = delivery.routing_key.to_string();
    let (key, body) = (rk.as_str(), delivery.data.as_slice());

    let outcome = run_with_retry(spec.retry(), reporter, queue, move || {
        consumer.handle(key, body)
    })
    .await;

    let settled = match outcome {
        Ok(()) => delivery.ack(BasicAckOptions { multiple: false }).await,
        Err(_) => {
            delivery
                .nack(BasicNackOptions {
                    multiple: false,
                    requeue: false,
                })
                .await
        }
    };
    if let Err(e) = settled {
        warn!(queue = %queue, routing_key = %rk, "settling delivery failed: {e}");
    }
}

pub struct RabbitEventBus {
    opts: RabbitMqOptions,
    state: Arc<RwLock<Option<ConnState>>>,
    shutdown: CancellationToken,
}

impl RabbitEventBus {
    pub async fn connect(opts: RabbitMqOptions) -> Result<Self, MessagingError> {
        let bus = Self {
            opts,
            state: Arc::new(RwLock::new(None)),
            shutdown: CancellationToken::new(),
        };
        bus.connect_once().await?;
        Ok(bus)
    }

    pub fn options(&self) -> &RabbitMqOptions {
        &self.opts
    }

    async fn connect_once(&self) -> Result<(), MessagingError> {
        let conn = Connection::connect(&self.opts.uri, ConnectionProperties::default())
            .await
            .map_err(|e| MessagingError::Connection(e.to_string()))?;

        let ch = self.publish_channel(&conn).await?;

        ch.exchange_declare(
            &self.opts.exchange,
            lapin::ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: self.opts.durable,
                auto_delete: false,
                internal: false,
                nowait: false,
                passive: false,
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| MessagingError::Connection(e.to_string()))?;

        let mut guard = self.state.write().await;
        *guard = Some(ConnState { conn, pub_ch: ch });

        info!(exchange = %self.opts.exchange, service = %self.opts.service, "RabbitMQ connected");
        Ok(())
    }

    async fn publish_channel(&self, conn: &Connection) -> Result<Channel, MessagingError> {
        let ch = conn
            .create_channel()
            .await
            .map_err(|e| MessagingError::Connection(e.to_string()))?;

        if self.opts.confirms {
            ch.confirm_select(ConfirmSelectOptions::default())
                .await
                .map_err(|e| MessagingError::Connection(e.to_string()))?;
        }
        Ok(ch)
    }

    async fn health(&self) -> ChannelHealth {
        self.state.read().await.as_ref().map_or(ChannelHealth::Disconnected, |s| {
            channel_health(s.conn.status().connected(), s.pub_ch.status().connected())
        })
    }

    async fn reopen_publish_channel(&self) -> Result<(), MessagingError> {
        let mut guard = self.state.write().await;
        let Some(state) = guard.as_mut() else {
            return Err(MessagingError::Connection("not connected".into()));
        };
        // Another caller may have reopened it while we waited for the lock.
        if state.pub_ch.status().connected() {
            return Ok(());
        }
        state.pub_ch = self.publish_channel(&state.conn).await?;
        warn!(exchange = %self.opts.exchange, "publish channel was closed by the broker, reopened");
        Ok(())
    }

    async fn current_channel(&self) -> Result<Channel, MessagingError> {
        match self.health().await {
            ChannelHealth::Ready => {}
            ChannelHealth::ChannelClosed => self.reopen_publish_channel().await?,
            ChannelHealth::Disconnected => self.connect_once().await?,
        }
        self.state
            .read()
            .await
            .as_ref()
            .map(|s| s.pub_ch.clone())
            .ok_or_else(|| MessagingError::Connection("no channel after reconnect".into()))
    }

    /// Dedicated channel for one consumer, so prefetch applies per endpoint.
    async fn open_channel(&self) -> Result<Channel, MessagingError> {
        if self.health().await == ChannelHealth::Disconnected {
            self.connect_once().await?;
        }
        let guard = self.state.read().await;
        let state = guard
            .as_ref()
            .ok_or_else(|| MessagingError::Connection("not connected".into()))?;
        state
            .conn
            .create_channel()
            .await
            .map_err(|e| MessagingError::Connection(e.to_string()))
    }

    async fn declare_endpoint_topology(
        &self,
        spec: &EndpointSpec,
        ch: &Channel,
    ) -> Result<(), MessagingError> {
        let queue = spec.address();
        let dlq = dlq_queue(queue);

        ch.exchange_declare(
            queue,
            amqp_exchange_kind(spec.exchange_kind()),
            ExchangeDeclareOptions {
                durable: self.opts.durable,
                auto_delete: spec.auto_delete(),
                internal: false,
                nowait: false,
                passive: false,
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| MessagingError::Subscribe(e.to_string()))?;

        let mut args = FieldTable::default();
        args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(self.opts.exchange.clone().into()),
        );
        args.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(dlq.clone().into()),
        );

        ch.queue_declare(
            queue,
            queue_options(self.opts.durable, spec.auto_delete()),
            args,
        )
        .await
        .map_err(|e| MessagingError::Subscribe(e.to_string()))?;

        ch.queue_declare(
            &dlq,
            queue_options(self.opts.durable, false),
            FieldTable::default(),
        )
        .await
        .map_err(|e| MessagingError::Subscribe(e.to_string()))?;

        for (q, exchange, rk) in endpoint_bindings(spec, &self.opts.exchange) {
            ch.queue_bind(
                &q,
                &exchange,
                &rk,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::Subscribe(e.to_string()))?;
        }

        Ok(())
    }

    /// Declares the endpoint topology and starts consuming in a background task.
    /// Topology errors on the first attempt are returned; later ones are
    /// retried by the consume loop.
    pub async fn bind_endpoint(&self, registration: Registration) -> Result<(), MessagingError> {
        self.start_endpoint(registration, self.shutdown.child_token())
            .await
    }

    async fn start_endpoint(
        &self,
        registration: Registration,
        stop: CancellationToken,
    ) -> Result<(), MessagingError> {
        // Declared on a throwaway channel so a broker-side channel close
        // cannot take the publish channel down with it.
        let ch = self.open_channel().await?;
        let declared = self.declare_endpoint_topology(&registration.spec, &ch).await;
        if ch.status().connected() {
            let _ = ch.close(200, "topology declared").await;
        }
        declared?;

        let bus = self.clone_for_task();
        tokio::spawn(async move { bus.consume_loop(registration, stop).await });
        Ok(())
    }

    /// Binds every consumer the registrar accepts. Nothing is bound when the
    /// registrar rejects the consumer set; when one bind fails, the endpoints
    /// already started by this call are stopped again.
    pub async fn register_consumers(
        &self,
        registrar: &Registrar,
        consumers: &[Arc<dyn Consumer>],
        config: &MessagingConfig,
    ) -> Result<usize, MessagingError> {
        let mut registrations = Vec::with_capacity(consumers.len());
        let count = registrar.register(consumers, config, |registration| {
            registrations.push(registration)
        })?;

        let batch = self.shutdown.child_token();
        for registration in registrations {
            if let Err(e) = self.start_endpoint(registration, batch.child_token()).await {
                error!(error = %e, "endpoint bind failed, stopping endpoints of this batch");
                batch.cancel();
                return Err(e);
            }
        }
        Ok(count)
    }

    /// Stops every consume loop started by this bus.
    pub async fn close(&self) -> Result<(), MessagingError> {
        self.shutdown.cancel();
        if let Some(state) = self.state.write().await.take() {
            state
                .conn
                .close(200, "shutdown")
                .await
                .map_err(|e| MessagingError::Connection(e.to_string()))?;
        }
        Ok(())
    }

    async fn consume_loop(self, registration: Registration, stop: CancellationToken) {
        let Registration {
            spec,
            consumer,
            reporter,
            ..
        } = registration;
        let queue = spec.address().to_string();
        let prefetch = spec.prefetch_count().get();

        while !stop.is_cancelled() {
            let ch = match self.open_channel().await {
                Ok(c) => c,
                Err(e) => {
                    error!(queue = %queue, "no channel yet: {e}");
                    sleep(RECONNECT_DELAY).await;
                    continue;
                }
            };

            if let Err(e) = ch
                .basic_qos(prefetch, BasicQosOptions { global: false })
                .await
            {
                error!(queue = %queue, "basic_qos failed: {e}");
                sleep(RECONNECT_DELAY).await;
                continue;
            }

            if let Err(e) = self.declare_endpoint_topology(&spec, &ch).await {
                error!(queue = %queue, "declare_endpoint_topology failed: {e}");
                sleep(RECONNECT_DELAY).await;
                continue;
            }

            let deliveries = match ch
                .basic_consume(
                    &queue,
                    &format!("{}-{}", self.opts.service, queue),
                    BasicConsumeOptions {
                        no_ack: false,
                        exclusive: false,
                        nowait: false,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
            {
                Ok(c) => c,
                Err(e) => {
                    error!(queue = %queue, "basic_consume failed: {e}");
                    sleep(RECONNECT_DELAY).await;
                    continue;
                }
            };

            info!(queue = %queue, prefetch, "consuming");

            let (spec_ref, consumer_ref, reporter_ref, queue_ref) =
                (&spec, consumer.as_ref(), reporter.as_ref(), queue.as_str());
            let outcome = drain_deliveries(
                deliveries,
                usize::from(prefetch),
                &stop,
                move |delivery| async move {
                    match delivery {
                        Ok(d) => process_delivery(spec_ref, consumer_ref, reporter_ref, d).await,
                        Err(e) => error!(queue = %queue_ref, "delivery error: {e}"),
                    }
                },
            )
            .await;

            if outcome == DrainOutcome::Shutdown {
                let _ = ch.close(200, "shutdown").await;
                return;
            }
            sleep(RECONNECT_DELAY).await;
        }
    }

    fn clone_for_task(&self) -> Self {
        Self {
            opts: self.opts.clone(),
            state: Arc::clone(&self.state),
            shutdown: self.shutdown.clone(),
        }
    }
}

fn queue_options(durable: bool, auto_delete: bool) -> QueueDeclareOptions {
    QueueDeclareOptions {
        durable,
        auto_delete,
        exclusive: false,
        nowait: false,
        passive: false,
    }
}

fn amqp_exchange_kind(kind: ExchangeKind) -> lapin::ExchangeKind {
    match kind {
        ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
        ExchangeKind::Direct => lapin::ExchangeKind::Direct,
        ExchangeKind::Topic => lapin::ExchangeKind::Topic,
    }
}

/// Publishes to the exchange named after the destination queue.
pub struct RabbitSendEndpoint {
    channel: Channel,
    exchange: String,
    confirms: bool,
}

#[async_trait]
impl SendEndpoint for RabbitSendEndpoint {
    async fn send<M: serde::Serialize + Send + Sync>(
        &self,
        message: &M,
        context: &SendContext,
    ) -> Result<(), MessagingError> {
        let envelope = Envelope::new(context, message);
        let body = serde_json::to_vec(&envelope)?;

        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_message_id(envelope.message_id.to_string().into())
            .with_kind(envelope.message_type.clone().into());

        let delivery_error = |e: lapin::Error| MessagingError::Delivery {
            address: self.exchange.clone(),
            reason: e.to_string(),
        };

        // mandatory: an exchange without a matching queue binding returns the
        // message instead of dropping it.
        let confirm = self
            .channel
            .basic_publish(
                &self.exchange,
                publish_routing_key(&self.exchange),
                BasicPublishOptions {
                    mandatory: true,
                    immediate: false,
                },
                &body,
                properties,
            )
            .await
            .map_err(delivery_error)?
            .await
            .map_err(delivery_error)?;

        if self.confirms && confirm.is_nack() {
            return Err(MessagingError::Delivery {
                address: self.exchange.clone(),
                reason: "publisher confirm NACK".to_string(),
            });
        }
        if confirm.take_message().is_some() {
            return Err(MessagingError::Delivery {
                address: self.exchange.clone(),
                reason: "message returned as unroutable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SendTransport for RabbitEventBus {
    type Endpoint = RabbitSendEndpoint;

    async fn send_endpoint(&self, address: &str) -> Result<Self::Endpoint, MessagingError> {
        Ok(RabbitSendEndpoint {
            channel: self.current_channel().await?,
            exchange: address.to_string(),
            confirms: self.opts.confirms,
        })
    }
}
