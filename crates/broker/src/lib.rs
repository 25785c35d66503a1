//! Durable topic-exchange transport for the depot upload service.
//!
//! Thin wrapper over a lapin connection: declare, bind, consume with manual
//! acknowledgment, publish with confirms. The fixed topology used by the
//! service is declared by [`declare_topology`].

pub mod error;

pub use error::{BrokerError, BrokerResult};

use depot_core::config::BrokerConfig;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions,
    QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind,
};

/// Topic exchange all upload traffic flows through.
pub const UPLOAD_EXCHANGE: &str = "upload.exchange";
/// Inbound queue and routing key for chunk-complete notifications.
pub const CHUNK_COMPLETE_QUEUE: &str = "upload.chunk_complete";
/// Outbound queue and routing key for compose-completed notifications.
pub const COMPOSE_COMPLETED_QUEUE: &str = "upload.compose_completed";
/// Inbound queue and routing key for single-object transfer requests.
pub const TRANSFER_QUEUE: &str = "upload.chunked";

/// A connected broker channel.
///
/// The channel has publisher confirms enabled; [`Broker::publish`] blocks
/// until the broker acknowledges the message or fails.
pub struct Broker {
    connection: Connection,
    channel: Channel,
}

impl Broker {
    /// Connect and open a confirming channel.
    pub async fn connect(config: &BrokerConfig) -> BrokerResult<Self> {
        let uri = config.amqp_uri();
        let connection =
            Connection::connect(&uri, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        tracing::info!(host = %config.host, port = config.port, "broker connected");

        Ok(Self {
            connection,
            channel,
        })
    }

    /// Declare a durable exchange.
    pub async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> BrokerResult<()> {
        self.channel
            .exchange_declare(
                name,
                kind,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        tracing::debug!(exchange = name, "exchange declared");
        Ok(())
    }

    /// Declare a durable, non-auto-delete queue.
    pub async fn declare_queue(&self, name: &str) -> BrokerResult<()> {
        self.channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable: true,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        tracing::debug!(queue = name, "queue declared");
        Ok(())
    }

    /// Bind a queue to an exchange by routing key.
    pub async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> BrokerResult<()> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        tracing::debug!(queue, exchange, routing_key, "queue bound");
        Ok(())
    }

    /// Start consuming a queue with manual acknowledgment.
    ///
    /// Each delivery exposes `ack`/`nack`; the consumer loop is responsible
    /// for acknowledging after processing.
    pub async fn consume(&self, queue: &str, consumer_tag: &str) -> BrokerResult<Consumer> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        tracing::info!(queue, consumer_tag, "consumer registered");
        Ok(consumer)
    }

    /// Publish a persistent JSON payload, waiting for broker confirmation.
    pub async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> BrokerResult<()> {
        let confirm = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_delivery_mode(2),
            )
            .await?
            .await?;

        if confirm.is_nack() {
            return Err(BrokerError::NotConfirmed {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
            });
        }
        Ok(())
    }

    /// Close the channel and connection.
    pub async fn close(&self) -> BrokerResult<()> {
        self.channel.close(200, "bye").await?;
        self.connection.close(200, "bye").await?;
        tracing::info!("broker connection closed");
        Ok(())
    }
}

/// Declare the fixed topology: the upload exchange plus both queues, bound
/// by their own names as routing keys.
pub async fn declare_topology(broker: &Broker) -> BrokerResult<()> {
    broker
        .declare_exchange(UPLOAD_EXCHANGE, ExchangeKind::Topic)
        .await?;

    for queue in [CHUNK_COMPLETE_QUEUE, COMPOSE_COMPLETED_QUEUE, TRANSFER_QUEUE] {
        broker.declare_queue(queue).await?;
        broker.bind_queue(queue, UPLOAD_EXCHANGE, queue).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topology_constants() {
        assert_eq!(UPLOAD_EXCHANGE, "upload.exchange");
        assert_eq!(CHUNK_COMPLETE_QUEUE, "upload.chunk_complete");
        assert_eq!(COMPOSE_COMPLETED_QUEUE, "upload.compose_completed");
    }
}
