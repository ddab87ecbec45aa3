use futures::StreamExt;
use lapin::{options::*, types::FieldTable, Connection, ConnectionProperties};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::config::{all_ticks_binding, AmqpConfig};
use super::publisher::{AmqpError, Result};
use crate::aggregator::SecondAggregator;
use crate::models::Price;

/// Consumes the tick stream off the AMQP exchange and feeds the
/// second-window aggregator
///
/// Binds an exclusive auto-delete queue with `tick.#`. Undecodable
/// payloads are logged and skipped; a closed delivery stream ends the
/// run loop with an error so the owner can decide to restart or shut
/// down.
pub struct TickConsumer {
    config: AmqpConfig,
}

impl TickConsumer {
    pub fn new(config: AmqpConfig) -> Self {
        Self { config }
    }

    /// Run the receive loop until cancellation or transport failure
    pub async fn run(
        &self,
        aggregator: Arc<SecondAggregator>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let connection = tokio::time::timeout(
            Duration::from_secs(self.config.connection_timeout_secs),
            Connection::connect(&self.config.uri, ConnectionProperties::default()),
        )
        .await
        .map_err(|_| {
            AmqpError::Connection(lapin::Error::InvalidConnectionState(
                lapin::ConnectionState::Closed,
            ))
        })??;

        let channel = connection.create_channel().await?;

        // The publisher declares the exchange too; declaring on both
        // sides makes startup order irrelevant.
        channel
            .exchange_declare(
                &self.config.exchange,
                lapin::ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: self.config.durable,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        let queue = channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        channel
            .queue_bind(
                queue.name().as_str(),
                &self.config.exchange,
                all_ticks_binding(),
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let mut consumer = channel
            .basic_consume(
                queue.name().as_str(),
                "price-aggregator",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        tracing::info!(
            exchange = %self.config.exchange,
            queue = %queue.name(),
            "AMQP tick consumer started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("AMQP tick consumer stopped");
                    return Ok(());
                }
                delivery = consumer.next() => {
                    match delivery {
                        Some(Ok(delivery)) => {
                            match serde_json::from_slice::<Price>(&delivery.data) {
                                Ok(price) => aggregator.ingest(price),
                                Err(e) => {
                                    // Malformed payloads are skipped, never fatal.
                                    tracing::warn!(error = %e, "undecodable tick payload skipped");
                                }
                            }
                            if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                                tracing::warn!(error = %e, "tick ack failed");
                            }
                        }
                        Some(Err(e)) => {
                            tracing::error!(error = %e, "AMQP delivery error");
                            return Err(AmqpError::Connection(e));
                        }
                        None => {
                            // Transport disconnection is fatal to this loop.
                            tracing::error!("AMQP delivery stream closed");
                            return Err(AmqpError::StreamClosed);
                        }
                    }
                }
            }
        }
    }
}
