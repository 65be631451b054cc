//! RabbitMQ transport built on lapin.
//!
//! One connection per process. Publishing goes through a single shared
//! channel; each subscription gets its own channel so that dropping the
//! subscription can close it, which removes the auto-delete queue.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    acker::Acker,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions,
        QueueBindOptions, QueueDeclareOptions,
    },
    types::{FieldTable, ShortString},
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{Acknowledge, Binding, BusError, Delivery, MessageBus, Publish, Subscription};

pub struct AmqpBus {
    connection: Connection,
    publisher: Channel,
}

struct AmqpAck {
    acker: Acker,
}

#[async_trait]
impl Acknowledge for AmqpAck {
    async fn ack(&self) -> Result<(), BusError> {
        self.acker.ack(BasicAckOptions::default()).await?;
        Ok(())
    }
}

impl AmqpBus {
    pub async fn connect(uri: &str) -> Result<Self, BusError> {
        let connection = Connection::connect(uri, ConnectionProperties::default()).await?;
        let publisher = connection.create_channel().await?;
        info!("connected to AMQP broker");
        Ok(Self {
            connection,
            publisher,
        })
    }

    pub async fn close(&self) -> Result<(), BusError> {
        self.connection.close(200, "shutdown").await?;
        Ok(())
    }
}

fn exchange_kind(exchange_type: &str) -> ExchangeKind {
    match exchange_type {
        "direct" => ExchangeKind::Direct,
        "fanout" => ExchangeKind::Fanout,
        "headers" => ExchangeKind::Headers,
        "topic" => ExchangeKind::Topic,
        other => ExchangeKind::Custom(other.to_string()),
    }
}

async fn declare_exchange(
    channel: &Channel,
    exchange: &str,
    exchange_type: &str,
) -> Result<(), BusError> {
    channel
        .exchange_declare(
            exchange,
            exchange_kind(exchange_type),
            ExchangeDeclareOptions {
                durable: true,
                ..ExchangeDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;
    Ok(())
}

fn to_delivery(delivery: lapin::message::Delivery) -> Delivery {
    let correlation_id = delivery
        .properties
        .correlation_id()
        .as_ref()
        .map(|id| id.as_str().to_string());
    let reply_to = delivery
        .properties
        .reply_to()
        .as_ref()
        .map(|to| to.as_str().to_string());

    Delivery::new(
        delivery.exchange.as_str(),
        delivery.routing_key.as_str(),
        delivery.delivery_tag,
        delivery.data,
        Arc::new(AmqpAck {
            acker: delivery.acker,
        }),
    )
    .with_correlation_id(correlation_id)
    .with_reply_to(reply_to)
}

/// Move deliveries from the lapin consumer into the subscription until either
/// side goes away, then close the subscription channel.
async fn forward_deliveries(
    channel: Channel,
    mut consumer: lapin::Consumer,
    sender: mpsc::UnboundedSender<Delivery>,
    queue: String,
) {
    loop {
        tokio::select! {
            _ = sender.closed() => {
                debug!(queue = %queue, "subscription dropped");
                break;
            }
            next = consumer.next() => match next {
                Some(Ok(delivery)) => {
                    if sender.send(to_delivery(delivery)).is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!(queue = %queue, error = %e, "AMQP consumer failed");
                    break;
                }
                None => {
                    debug!(queue = %queue, "AMQP consumer ended");
                    break;
                }
            },
        }
    }

    if let Err(e) = channel.close(200, "subscription closed").await {
        debug!(queue = %queue, error = %e, "failed to close subscription channel");
    }
}

#[async_trait]
impl MessageBus for AmqpBus {
    async fn listen(
        &self,
        binding: &Binding,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<Subscription, BusError> {
        let channel = self.connection.create_channel().await?;
        declare_exchange(&channel, &binding.exchange, &binding.exchange_type).await?;

        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    auto_delete: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        channel
            .queue_bind(
                queue,
                &binding.exchange,
                &binding.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        let consumer = channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(
            exchange = %binding.exchange,
            routing_key = %binding.routing_key,
            queue,
            "listening on AMQP queue"
        );

        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(forward_deliveries(
            channel,
            consumer,
            sender,
            queue.to_string(),
        ));
        Ok(Subscription::new(queue, receiver))
    }

    async fn send(&self, publish: Publish) -> Result<(), BusError> {
        declare_exchange(&self.publisher, &publish.exchange, &publish.exchange_type).await?;

        let mut properties = BasicProperties::default();
        if let Some(id) = publish.correlation_id {
            properties = properties.with_correlation_id(ShortString::from(id));
        }
        if let Some(reply_to) = publish.reply_to {
            properties = properties.with_reply_to(ShortString::from(reply_to));
        }

        self.publisher
            .basic_publish(
                &publish.exchange,
                &publish.routing_key,
                BasicPublishOptions::default(),
                &publish.body,
                properties,
            )
            .await?
            .await?;
        debug!(
            exchange = %publish.exchange,
            routing_key = %publish.routing_key,
            bytes = publish.body.len(),
            "published message"
        );
        Ok(())
    }
}
