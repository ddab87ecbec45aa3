use lapin::{
    options::*, types::FieldTable, BasicProperties, Channel, Connection, ConnectionProperties,
    ExchangeKind,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::config::{tick_routing_key, AmqpConfig};
use crate::models::Price;

/// Error types for AMQP operations
#[derive(Debug, thiserror::Error)]
pub enum AmqpError {
    #[error("connection error: {0}")]
    Connection(#[from] lapin::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("publisher not connected")]
    NotConnected,

    #[error("delivery stream closed")]
    StreamClosed,
}

pub type Result<T> = std::result::Result<T, AmqpError>;

/// Statistics for the tick publisher
#[derive(Debug, Clone)]
pub struct PublisherStats {
    pub ticks_published: u64,
    pub ticks_failed: u64,
    pub reconnect_count: u64,
    pub is_connected: bool,
}

/// Pushes each tick onto the AMQP topic exchange
///
/// Routing key is `tick.{SYMBOL}`, payload is the JSON wire encoding of
/// [`Price`]. Decouples the generator process from the aggregating
/// consumer; publishing is fire-and-forget with bounded retry.
pub struct TickPublisher {
    config: AmqpConfig,
    connection: Arc<RwLock<Option<Connection>>>,
    channel: Arc<RwLock<Option<Channel>>>,
    is_connected: Arc<AtomicBool>,

    ticks_published: Arc<AtomicU64>,
    ticks_failed: Arc<AtomicU64>,
    reconnect_count: Arc<AtomicU64>,
}

impl TickPublisher {
    pub fn new(config: AmqpConfig) -> Self {
        Self {
            config,
            connection: Arc::new(RwLock::new(None)),
            channel: Arc::new(RwLock::new(None)),
            is_connected: Arc::new(AtomicBool::new(false)),
            ticks_published: Arc::new(AtomicU64::new(0)),
            ticks_failed: Arc::new(AtomicU64::new(0)),
            reconnect_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Connect and declare the topic exchange
    pub async fn connect(&self) -> Result<()> {
        tracing::info!(uri = %self.config.uri, "connecting to AMQP broker");

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

        channel
            .exchange_declare(
                &self.config.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: self.config.durable,
                    auto_delete: false,
                    internal: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        *self.connection.write().await = Some(connection);
        *self.channel.write().await = Some(channel);
        self.is_connected.store(true, Ordering::Release);

        tracing::info!(exchange = %self.config.exchange, "AMQP publisher connected");
        Ok(())
    }

    /// Close channel and connection
    pub async fn disconnect(&self) -> Result<()> {
        if let Some(channel) = self.channel.write().await.take() {
            let _ = channel.close(200, "normal shutdown").await;
        }
        if let Some(connection) = self.connection.write().await.take() {
            let _ = connection.close(200, "normal shutdown").await;
        }

        self.is_connected.store(false, Ordering::Release);
        tracing::info!("AMQP publisher disconnected");
        Ok(())
    }

    /// Publish one tick
    pub async fn publish(&self, price: &Price) -> Result<()> {
        if !self.is_connected.load(Ordering::Acquire) {
            return Err(AmqpError::NotConnected);
        }

        let payload = serde_json::to_vec(price)?;
        let routing_key = tick_routing_key(price.symbol);

        let channel_guard = self.channel.read().await;
        let channel = channel_guard.as_ref().ok_or(AmqpError::NotConnected)?;

        channel
            .basic_publish(
                &self.config.exchange,
                &routing_key,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default(),
            )
            .await?;

        self.ticks_published.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(%routing_key, "tick published");
        Ok(())
    }

    /// Publish with retry and exponential backoff
    pub async fn publish_with_retry(&self, price: &Price, max_retries: u32) -> Result<()> {
        let mut attempts = 0;
        let mut delay_ms = self.config.reconnect.initial_delay_ms;

        loop {
            match self.publish(price).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    attempts += 1;
                    if attempts >= max_retries {
                        self.ticks_failed.fetch_add(1, Ordering::Relaxed);
                        return Err(e);
                    }

                    tracing::warn!(
                        attempt = attempts,
                        max_retries,
                        error = %e,
                        delay_ms,
                        "publish failed, retrying"
                    );

                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    delay_ms = ((delay_ms as f64 * self.config.reconnect.backoff_multiplier)
                        as u64)
                        .min(self.config.reconnect.max_delay_ms);

                    if !self.is_connected() {
                        let _ = self.reconnect().await;
                    }
                }
            }
        }
    }

    /// Tear down and re-establish the connection
    pub async fn reconnect(&self) -> Result<()> {
        let _ = self.disconnect().await;

        match self.connect().await {
            Ok(()) => {
                self.reconnect_count.fetch_add(1, Ordering::Relaxed);
                tracing::info!("AMQP publisher reconnected");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "AMQP reconnection failed");
                Err(e)
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.is_connected.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> PublisherStats {
        PublisherStats {
            ticks_published: self.ticks_published.load(Ordering::Relaxed),
            ticks_failed: self.ticks_failed.load(Ordering::Relaxed),
            reconnect_count: self.reconnect_count.load(Ordering::Relaxed),
            is_connected: self.is_connected(),
        }
    }
}
