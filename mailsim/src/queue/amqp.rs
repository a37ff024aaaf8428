//! RabbitMQ (CloudAMQP) broker built on lapin.
//!
//! One connection per process. Publishing goes through a shared confirm-mode
//! channel that is re-established lazily after a failure; every consumer gets
//! its own channel so its prefetch window is independent.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    acker::Acker,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, ConfirmSelectOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use super::broker::{Acknowledger, Broker, Deliveries, Delivery, OutboundMessage};
use super::types::{DEAD_LETTER_QUEUE, INBOUND_QUEUE, SIMULATOR_QUEUE};
use crate::error::BrokerError;

const DECLARED_QUEUES: [&str; 3] = [INBOUND_QUEUE, SIMULATOR_QUEUE, DEAD_LETTER_QUEUE];

/// AMQP broker with connection management.
pub struct AmqpBroker {
    url: String,
    connection: RwLock<Option<Connection>>,
    publish_channel: RwLock<Option<Channel>>,
    consumer_channels: Mutex<Vec<Channel>>,
}

impl AmqpBroker {
    /// Create a broker for `url`. Nothing connects until first use.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connection: RwLock::new(None),
            publish_channel: RwLock::new(None),
            consumer_channels: Mutex::new(Vec::new()),
        }
    }

    async fn ensure_connected(&self) -> Result<(), BrokerError> {
        if let Some(conn) = self.connection.read().await.as_ref() {
            if conn.status().connected() {
                return Ok(());
            }
        }

        let mut slot = self.connection.write().await;

        // Double-check after acquiring write lock
        if let Some(conn) = slot.as_ref() {
            if conn.status().connected() {
                return Ok(());
            }
        }

        info!(url_length = self.url.len(), "rabbitmq_connecting");
        let conn = Connection::connect(&self.url, ConnectionProperties::default()).await?;
        info!("rabbitmq_connected");

        *slot = Some(conn);
        Ok(())
    }

    async fn open_channel(&self) -> Result<Channel, BrokerError> {
        self.ensure_connected().await?;

        let channel = {
            let conn = self.connection.read().await;
            match conn.as_ref() {
                Some(conn) => conn.create_channel().await?,
                None => return Err(BrokerError::Unavailable("connection closed".to_string())),
            }
        };

        for queue in DECLARED_QUEUES {
            channel
                .queue_declare(
                    queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await?;
        }
        Ok(channel)
    }

    async fn publisher(&self) -> Result<Channel, BrokerError> {
        {
            let channel = self.publish_channel.read().await;
            if let Some(ch) = channel.as_ref() {
                if ch.status().connected() {
                    return Ok(ch.clone());
                }
            }
        }

        let mut slot = self.publish_channel.write().await;
        if let Some(ch) = slot.as_ref() {
            if ch.status().connected() {
                return Ok(ch.clone());
            }
        }

        let channel = self.open_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        info!(queues = ?DECLARED_QUEUES, "rabbitmq_publisher_ready");

        *slot = Some(channel.clone());
        Ok(channel)
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn publish(&self, queue: &str, message: OutboundMessage) -> Result<(), BrokerError> {
        let channel = self.publisher().await?;

        let confirmation = channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &message.body,
                BasicProperties::default()
                    .with_delivery_mode(2)
                    .with_content_type("application/json".into())
                    .with_message_id(message.message_id.as_str().into()),
            )
            .await?
            .await?;

        if confirmation.is_nack() {
            return Err(BrokerError::Unavailable(format!(
                "broker refused message {} on {}",
                message.message_id, queue
            )));
        }

        info!(
            queue = queue,
            message_id = %message.message_id,
            body_length = message.body.len(),
            "rabbitmq_published"
        );
        Ok(())
    }

    async fn consume(&self, queue: &str, prefetch: u16) -> Result<Deliveries, BrokerError> {
        let channel = self.open_channel().await?;
        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await?;

        let consumer = channel
            .basic_consume(
                queue,
                &format!("mailsim-{queue}"),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(queue = queue, prefetch_count = prefetch, "rabbitmq_consumer_started");
        self.consumer_channels.lock().await.push(channel);

        let stream = consumer.map(|delivery| -> Result<Delivery, BrokerError> {
            let delivery = delivery?;
            let message_id = delivery
                .properties
                .message_id()
                .as_ref()
                .map(|id| id.to_string());
            Ok(Delivery::new(
                delivery.data,
                message_id,
                delivery.redelivered,
                Box::new(AmqpAcker(delivery.acker)),
            ))
        });

        Ok(stream.boxed())
    }

    async fn close(&self) {
        for channel in self.consumer_channels.lock().await.drain(..) {
            if let Err(e) = channel.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_channel_close_error");
            }
        }

        if let Some(channel) = self.publish_channel.write().await.take() {
            if let Err(e) = channel.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_channel_close_error");
            }
        }

        if let Some(conn) = self.connection.write().await.take() {
            if let Err(e) = conn.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_connection_close_error");
            }
        }

        info!("rabbitmq_closed");
    }
}

struct AmqpAcker(Acker);

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.0.ack(BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<(), BrokerError> {
        self.0
            .nack(BasicNackOptions {
                requeue,
                ..Default::default()
            })
            .await?;
        Ok(())
    }
}
