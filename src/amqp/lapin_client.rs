use crate::amqp::client::{AmqpChannel, AmqpClient, Delivery, DeliveryCallback, Protocol, Transport};
use amq_protocol_types::{DeliveryTag, FieldTable};
use anyhow::Context;
use lapin::{
    message::DeliveryResult,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

/// Reply code sent to the broker when closing a connection on purpose.
const REPLY_SUCCESS: u16 = 200;

#[derive(Clone, Debug)]
/// [`AmqpClient`] backed by [`lapin`], driven by the current `tokio` runtime.
///
/// `amqps://` URLs are supported out of the box, using the system's trust root.
pub struct LapinClient {
    /// The timeout observed when trying to connect to RabbitMq.
    connection_timeout: Duration,
}

impl Default for LapinClient {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
        }
    }
}

impl LapinClient {
    /// Give up connecting to RabbitMq after `connection_timeout`.
    /// Defaults to 10 seconds if left unspecified.
    #[must_use]
    pub fn with_connection_timeout(mut self, connection_timeout: Duration) -> Self {
        self.connection_timeout = connection_timeout;
        self
    }
}

#[async_trait::async_trait]
impl AmqpClient for LapinClient {
    type Transport = LapinTransport;
    type Protocol = LapinProtocol;
    type Channel = Channel;

    #[tracing::instrument(name = "rabbitmq_connect", skip_all)]
    async fn from_url(
        &self,
        url: &str,
    ) -> Result<(LapinTransport, LapinProtocol), anyhow::Error> {
        let properties =
            ConnectionProperties::default().with_executor(tokio_executor_trait::Tokio::current());
        let connection = match timeout(self.connection_timeout, Connection::connect(url, properties))
            .await
        {
            Ok(result) => result.context("Failed to connect to RabbitMQ.")?,
            Err(_) => anyhow::bail!("Timed out while trying to connect to RabbitMQ."),
        };
        // Register a callback to log connection errors.
        connection.on_error(|e| {
            warn!("RabbitMQ broken connection: {:?}", e);
        });

        let connection = Arc::new(connection);
        Ok((
            LapinTransport(Some(Arc::clone(&connection))),
            LapinProtocol(connection),
        ))
    }
}

/// The AMQP session of a `lapin` connection.
pub struct LapinProtocol(Arc<Connection>);

#[async_trait::async_trait]
impl Protocol for LapinProtocol {
    type Channel = Channel;

    #[tracing::instrument(name = "rabbitmq_create_channel", skip(self))]
    async fn channel(&self) -> Result<Channel, anyhow::Error> {
        Ok(self.0.create_channel().await?)
    }

    fn is_open(&self) -> bool {
        self.0.status().connected()
    }

    async fn close(&self) -> Result<(), anyhow::Error> {
        Ok(self.0.close(REPLY_SUCCESS, "OK").await?)
    }
}

/// The socket of a `lapin` connection.
///
/// `lapin` runs the socket on its own I/O loop and tears it down as part of the protocol close:
/// closing the transport releases this handle on the connection.
pub struct LapinTransport(Option<Arc<Connection>>);

impl Transport for LapinTransport {
    fn close(&mut self) {
        self.0.take();
    }
}

#[async_trait::async_trait]
impl AmqpChannel for Channel {
    async fn exchange_declare(
        &self,
        exchange: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
    ) -> Result<(), anyhow::Error> {
        Ok(Channel::exchange_declare(self, exchange, kind, options, FieldTable::default()).await?)
    }

    async fn queue_declare(
        &self,
        queue: &str,
        options: QueueDeclareOptions,
    ) -> Result<(), anyhow::Error> {
        Channel::queue_declare(self, queue, options, FieldTable::default()).await?;
        Ok(())
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), anyhow::Error> {
        let options = QueueBindOptions { nowait: false };
        Ok(Channel::queue_bind(
            self,
            queue,
            exchange,
            routing_key,
            options,
            FieldTable::default(),
        )
        .await?)
    }

    async fn basic_qos(
        &self,
        prefetch_count: u16,
        prefetch_size: u32,
        options: BasicQosOptions,
    ) -> Result<(), anyhow::Error> {
        // RabbitMq does not implement prefetch-size and `lapin` does not expose it.
        if prefetch_size != 0 {
            warn!(prefetch_size, "Ignoring a prefetch size limit, RabbitMq only supports prefetch count");
        }
        Ok(Channel::basic_qos(self, prefetch_count, options).await?)
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        options: BasicPublishOptions,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), anyhow::Error> {
        // The returned confirmation is dropped: outcomes are not tracked at this layer.
        Channel::basic_publish(self, exchange, routing_key, options, payload, properties).await?;
        Ok(())
    }

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        callback: DeliveryCallback,
    ) -> Result<(), anyhow::Error> {
        let consumer = Channel::basic_consume(
            self,
            queue,
            consumer_tag,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await?;

        consumer.set_delegate(move |delivery: DeliveryResult| {
            let callback = Arc::clone(&callback);
            async move {
                match delivery {
                    Ok(Some(delivery)) => callback(Delivery::from(delivery)).await,
                    // The consumer has been cancelled.
                    Ok(None) => {}
                    Err(e) => warn!("RabbitMQ consumer error: {:?}", e),
                }
            }
        });
        Ok(())
    }

    async fn basic_client_ack(&self, delivery_tag: DeliveryTag) -> Result<(), anyhow::Error> {
        Ok(Channel::basic_ack(self, delivery_tag, BasicAckOptions { multiple: false }).await?)
    }

    async fn basic_nack(
        &self,
        delivery_tag: DeliveryTag,
        requeue: bool,
    ) -> Result<(), anyhow::Error> {
        let options = BasicNackOptions {
            multiple: false,
            requeue,
        };
        Ok(Channel::basic_nack(self, delivery_tag, options).await?)
    }
}
