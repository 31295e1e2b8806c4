//! RabbitMQ consumer built on lapin
//!
//! Consumes a durable queue with manual acknowledgment and a prefetch of one,
//! so the broker never hands this worker a second message before the first is settled.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    acker::Acker,
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
        BasicQosOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    Channel, Connection, ConnectionProperties, Consumer,
};
use tracing::{debug, info, warn};

use crate::{AckHandle, QueueConsumer, QueueError, QueuedDelivery, Result};

const PREFETCH_COUNT: u16 = 1;

/// Connection settings for the AMQP consumer
#[derive(Debug, Clone)]
pub struct AmqpConfig {
    pub uri: String,
    pub queue_name: String,
    pub consumer_tag: String,
}

impl AmqpConfig {
    pub fn new(uri: impl Into<String>, queue_name: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            queue_name: queue_name.into(),
            consumer_tag: String::new(),
        }
    }
}

pub struct AmqpConsumer {
    identifier: String,
    connection: Connection,
    channel: Channel,
    consumer: Consumer,
    stopped: bool,
}

impl AmqpConsumer {
    /// Connect, declare the durable queue, set QoS and register the consumer
    pub async fn connect(config: &AmqpConfig) -> Result<Self> {
        let connection = Connection::connect(&config.uri, ConnectionProperties::default())
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        info!(operation = "connect_rabbitmq", "Connected to RabbitMQ");

        let channel = connection.create_channel().await?;

        channel
            .queue_declare(
                &config.queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        info!(operation = "declare_queue", queue_name = %config.queue_name, "Queue declared");

        channel
            .basic_qos(PREFETCH_COUNT, BasicQosOptions::default())
            .await?;

        // no_ack defaults to false: every delivery must be settled explicitly
        let consumer = channel
            .basic_consume(
                &config.queue_name,
                &config.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        info!(
            operation = "consume_start",
            queue_name = %config.queue_name,
            prefetch = PREFETCH_COUNT,
            "Waiting for messages"
        );

        Ok(Self {
            identifier: format!("amqp:{}", config.queue_name),
            connection,
            channel,
            consumer,
            stopped: false,
        })
    }
}

#[async_trait]
impl QueueConsumer for AmqpConsumer {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn next_delivery(&mut self) -> Result<Option<QueuedDelivery>> {
        if self.stopped {
            return Ok(None);
        }

        match self.consumer.next().await {
            Some(Ok(delivery)) => {
                let handle = AmqpAckHandle { acker: delivery.acker };
                Ok(Some(QueuedDelivery::new(
                    delivery.data,
                    delivery.delivery_tag,
                    delivery.redelivered,
                    Box::new(handle),
                )))
            }
            Some(Err(e)) => Err(QueueError::Consume(e.to_string())),
            None => {
                debug!(consumer = %self.identifier, "Consumer stream ended");
                Ok(None)
            }
        }
    }

    async fn stop(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;

        let tag = self.consumer.tag();
        if let Err(e) = self
            .channel
            .basic_cancel(tag.as_str(), BasicCancelOptions::default())
            .await
        {
            warn!(error = %e, "Failed to cancel consumer");
        }

        // Closing the channel returns any unacknowledged delivery to the queue
        if let Err(e) = self.channel.close(200, "worker shutdown").await {
            warn!(error = %e, "Failed to close channel");
        }
        self.connection
            .close(200, "worker shutdown")
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        info!(consumer = %self.identifier, "AMQP consumer stopped");
        Ok(())
    }
}

struct AmqpAckHandle {
    acker: Acker,
}

#[async_trait]
impl AckHandle for AmqpAckHandle {
    async fn acknowledge(&self) -> Result<()> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| QueueError::Ack(e.to_string()))
    }

    async fn reject_requeue(&self) -> Result<()> {
        self.acker
            .nack(BasicNackOptions {
                multiple: false,
                requeue: true,
            })
            .await
            .map_err(|e| QueueError::Ack(e.to_string()))
    }

    async fn reject_discard(&self) -> Result<()> {
        self.acker
            .nack(BasicNackOptions {
                multiple: false,
                requeue: false,
            })
            .await
            .map_err(|e| QueueError::Ack(e.to_string()))
    }
}
