//! The slice of an AMQP client that producers and consumers rely upon.
//!
//! [`LapinClient`](super::LapinClient) is the production implementation. Everything in the crate is
//! written against these traits, so the connection lifecycle can be driven by any client that
//! provides the same primitives.
use amq_protocol_types::{DeliveryTag, ShortString};
use futures_util::future::BoxFuture;
use lapin::{
    options::{BasicPublishOptions, BasicQosOptions, ExchangeDeclareOptions, QueueDeclareOptions},
    BasicProperties, ExchangeKind,
};
use std::sync::Arc;

/// `AmqpClient` opens connections to a broker.
///
/// A connection is made of two handles: the [`Transport`] (the socket) and the [`Protocol`]
/// (the AMQP session running on top of it), which hands out [`AmqpChannel`]s.
#[async_trait::async_trait]
pub trait AmqpClient: Send + Sync {
    type Transport: Transport;
    type Protocol: Protocol<Channel = Self::Channel>;
    type Channel: AmqpChannel;

    /// Connect to the broker at `url` and perform the AMQP handshake.
    async fn from_url(
        &self,
        url: &str,
    ) -> Result<(Self::Transport, Self::Protocol), anyhow::Error>;
}

/// The AMQP session of an open connection.
#[async_trait::async_trait]
pub trait Protocol: Send + Sync {
    type Channel;

    /// Open a new channel on this connection.
    async fn channel(&self) -> Result<Self::Channel, anyhow::Error>;

    /// `true` while the session is established and has not started closing.
    fn is_open(&self) -> bool;

    /// Close the session with the broker.
    async fn close(&self) -> Result<(), anyhow::Error>;
}

/// The network transport underneath a [`Protocol`].
pub trait Transport: Send + Sync {
    /// Release the transport. Closing twice is a no-op.
    fn close(&mut self);
}

/// Invoked once for each message pushed by the broker to a consumer.
pub type DeliveryCallback = Arc<dyn Fn(Delivery) -> BoxFuture<'static, ()> + Send + Sync>;

/// The channel operations used by producers and consumers.
///
/// Channels are cheap handles: cloning one yields another handle on the same AMQP channel.
#[async_trait::async_trait]
pub trait AmqpChannel: Clone + Send + Sync + 'static {
    async fn exchange_declare(
        &self,
        exchange: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
    ) -> Result<(), anyhow::Error>;

    async fn queue_declare(
        &self,
        queue: &str,
        options: QueueDeclareOptions,
    ) -> Result<(), anyhow::Error>;

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), anyhow::Error>;

    async fn basic_qos(
        &self,
        prefetch_count: u16,
        prefetch_size: u32,
        options: BasicQosOptions,
    ) -> Result<(), anyhow::Error>;

    /// Hand a message over to the broker. Publisher confirms, if any, are not awaited.
    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        options: BasicPublishOptions,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), anyhow::Error>;

    /// Start a consumer on `queue`. Returns once the broker has registered the consumer:
    /// deliveries are then pushed to `callback` on the client's executor.
    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        callback: DeliveryCallback,
    ) -> Result<(), anyhow::Error>;

    async fn basic_client_ack(&self, delivery_tag: DeliveryTag) -> Result<(), anyhow::Error>;

    async fn basic_nack(&self, delivery_tag: DeliveryTag, requeue: bool)
        -> Result<(), anyhow::Error>;
}

/// A received AMQP message.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// The delivery tag of the message, used to acknowledge it.
    pub delivery_tag: DeliveryTag,

    /// The exchange of the message. May be an empty string
    /// if the default exchange is used.
    pub exchange: ShortString,

    /// The routing key of the message. May be an empty string
    /// if no routing key is specified.
    pub routing_key: ShortString,

    /// Whether this message was redelivered
    pub redelivered: bool,

    /// Contains the properties and the headers of the
    /// message.
    pub properties: BasicProperties,

    /// The payload of the message in binary format.
    pub data: Vec<u8>,
}

impl From<lapin::message::Delivery> for Delivery {
    fn from(value: lapin::message::Delivery) -> Self {
        Self {
            delivery_tag: value.delivery_tag,
            exchange: value.exchange,
            routing_key: value.routing_key,
            redelivered: value.redelivered,
            properties: value.properties,
            data: value.data,
        }
    }
}
