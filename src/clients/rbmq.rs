use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    Channel, Connection, ConnectionProperties,
    acker::Acker,
    options::{BasicAckOptions, BasicConsumeOptions, BasicQosOptions, QueueDeclareOptions},
    types::FieldTable,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::Config,
    dispatcher::Notifier,
    utils::{Acknowledge, MessageProcessor, run_consumer},
};

/// Owns the broker connection and its single channel for the process lifetime.
pub struct RabbitMqClient {
    connection: Connection,
    channel: Channel,
}

impl RabbitMqClient {
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        info!(
            host = %config.rabbitmq_host,
            port = config.rabbitmq_port,
            vhost = %config.rabbitmq_vhost,
            "Connecting to RabbitMQ"
        );

        let connection = Connection::connect(&config.amqp_url()?, ConnectionProperties::default())
            .await
            .map_err(|e| anyhow!("Failed to connect to RabbitMQ: {}", e))?;

        info!("RabbitMQ connection established");

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| anyhow!("RabbitMQ channel creation failed: {}", e))?;

        debug!("RabbitMQ channel created");

        channel
            .basic_qos(config.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to set up QoS: {}", e))?;

        debug!(prefetch_count = config.prefetch_count, "Prefetch count set");

        Ok(Self {
            connection,
            channel,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    /// Declares `queue_name` and spawns the consumption loop on its own task.
    ///
    /// The queue is non-durable, non-exclusive and never auto-deleted, so the
    /// declaration is idempotent across restarts. Deliveries must be acked by
    /// the loop; anything left unacked is redelivered when the channel drops.
    pub async fn subscribe<N>(
        &self,
        queue_name: &str,
        processor: Arc<MessageProcessor<N>>,
        shutdown: CancellationToken,
    ) -> Result<JoinHandle<Result<(), Error>>, Error>
    where
        N: Notifier + 'static,
    {
        self.channel
            .queue_declare(
                queue_name.into(),
                QueueDeclareOptions {
                    durable: false,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to declare queue {}: {}", queue_name, e))?;

        debug!(queue = queue_name, "Queue declared");

        let consumer_tag = format!("action-relay-{}", Uuid::new_v4());

        let consumer = self
            .channel
            .basic_consume(
                queue_name.into(),
                consumer_tag.as_str().into(),
                BasicConsumeOptions {
                    no_ack: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to register consumer: {}", e))?;

        info!(queue = queue_name, consumer_tag = %consumer_tag, "Consumer registered");

        let deliveries = Box::pin(
            consumer.map(|delivery| delivery.map(|delivery| (delivery.data, delivery.acker))),
        );

        Ok(tokio::spawn(run_consumer(deliveries, processor, shutdown)))
    }

    /// Closes the channel, then the connection. Either one already being closed is fine.
    pub async fn disconnect(&self) {
        if self.channel.status().connected() {
            if let Err(e) = self.channel.close(200, "Bye".into()).await {
                warn!(error = %e, "Failed to close RabbitMQ channel");
            }
        }

        if self.connection.status().connected() {
            if let Err(e) = self.connection.close(200, "Bye".into()).await {
                warn!(error = %e, "Failed to close RabbitMQ connection");
            }
        }

        info!("RabbitMQ connection closed");
    }
}

#[async_trait]
impl Acknowledge for Acker {
    async fn acknowledge(&self) -> Result<(), Error> {
        Acker::ack(self, BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| anyhow!("Failed to acknowledge message: {}", e))
    }
}
