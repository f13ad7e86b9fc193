use crate::{
    amqp::{
        configuration::AmqpSettings, AmqpChannel, AmqpClient, LapinClient, Protocol, Transport,
    },
    serializer::{get_serializer, DeserializeError, SerializeError, SerializerKind, UnknownSerializer},
    Error,
};
use lapin::options::{BasicQosOptions, ExchangeDeclareOptions, QueueDeclareOptions};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

/// A connection to a RabbitMq broker, together with the exchange/queue topology it works with.
///
/// `AmqpBase` exposes each setup step on its own ([`connect`], [`declare_exchange`],
/// [`declare_queue`], [`bind_queue`], [`specify_basic_qos`]) so that [`Producer`] and [`Consumer`]
/// can each run the subset they need.
///
/// Setup steps other than `connect` need an open channel and fail with [`Error::NotConnected`]
/// when called first.
///
/// [`connect`]: AmqpBase::connect
/// [`declare_exchange`]: AmqpBase::declare_exchange
/// [`declare_queue`]: AmqpBase::declare_queue
/// [`bind_queue`]: AmqpBase::bind_queue
/// [`specify_basic_qos`]: AmqpBase::specify_basic_qos
/// [`Producer`]: crate::Producer
/// [`Consumer`]: crate::Consumer
pub struct AmqpBase<C: AmqpClient = LapinClient> {
    client: C,
    settings: AmqpSettings,
    serializer: SerializerKind,
    transport: Option<C::Transport>,
    protocol: Option<C::Protocol>,
    channel: Option<C::Channel>,
}

impl AmqpBase<LapinClient> {
    /// Use [`LapinClient`] with its default connection timeout.
    pub fn lapin(settings: AmqpSettings) -> Result<Self, UnknownSerializer> {
        Self::new(LapinClient::default(), settings)
    }
}

impl<C: AmqpClient> AmqpBase<C> {
    /// Fails if `settings.serializer` is not a registered serializer name.
    ///
    /// No connection is established until [`AmqpBase::connect`] is called.
    pub fn new(client: C, settings: AmqpSettings) -> Result<Self, UnknownSerializer> {
        let serializer = get_serializer(&settings.serializer)?;
        Ok(Self {
            client,
            settings,
            serializer,
            transport: None,
            protocol: None,
            channel: None,
        })
    }

    pub fn settings(&self) -> &AmqpSettings {
        &self.settings
    }

    pub fn serializer(&self) -> SerializerKind {
        self.serializer
    }

    /// Connect to the broker and open a channel.
    ///
    /// There is no retry: on failure, it is up to the caller to try again.
    #[tracing::instrument(name = "amqp_connect", skip(self))]
    pub async fn connect(&mut self) -> Result<(), Error> {
        let (transport, protocol) = self
            .client
            .from_url(self.settings.url.expose_secret())
            .await
            .map_err(Error::Connection)?;
        self.transport = Some(transport);
        let protocol = self.protocol.insert(protocol);

        let channel = protocol.channel().await.map_err(Error::Connection)?;
        self.channel = Some(channel);
        debug!("Connected to RabbitMq");
        Ok(())
    }

    /// Declare the configured exchange, as durable.
    ///
    /// Re-declaring an existing exchange with identical parameters is a no-op, while mismatched
    /// parameters are rejected by the broker.
    #[tracing::instrument(
        name = "amqp_declare_exchange",
        skip(self),
        fields(exchange = %self.settings.exchange, exchange_type = %self.settings.exchange_type)
    )]
    pub async fn declare_exchange(&self) -> Result<(), Error> {
        let options = ExchangeDeclareOptions {
            passive: false,
            // The exchange will survive RabbitMq server restarts
            durable: true,
            auto_delete: false,
            internal: false,
            nowait: false,
        };
        self.channel()?
            .exchange_declare(&self.settings.exchange, self.settings.exchange_kind(), options)
            .await
            .map_err(Error::channel("exchange.declare"))
    }

    /// Declare the configured queue, as durable.
    #[tracing::instrument(name = "amqp_declare_queue", skip(self), fields(queue = %self.settings.queue))]
    pub async fn declare_queue(&self) -> Result<(), Error> {
        let options = QueueDeclareOptions {
            passive: false,
            durable: true,
            exclusive: false,
            auto_delete: false,
            nowait: false,
        };
        self.channel()?
            .queue_declare(&self.settings.queue, options)
            .await
            .map_err(Error::channel("queue.declare"))
    }

    /// Bind the configured queue to the configured exchange, once per routing key, in order.
    ///
    /// Bindings are independent of each other: if one fails, the ones that came before it stay
    /// in place.
    #[tracing::instrument(
        name = "amqp_bind_queue",
        skip(self),
        fields(queue = %self.settings.queue, exchange = %self.settings.exchange)
    )]
    pub async fn bind_queue(&self) -> Result<(), Error> {
        let channel = self.channel()?;
        for routing_key in self.settings.routing_key.keys() {
            channel
                .queue_bind(&self.settings.queue, &self.settings.exchange, routing_key)
                .await
                .map_err(Error::channel("queue.bind"))?;
            debug!(routing_key = %routing_key, "Bound queue");
        }
        Ok(())
    }

    /// Limit the unacknowledged messages the broker pushes on this channel.
    #[tracing::instrument(name = "amqp_basic_qos", skip(self))]
    pub async fn specify_basic_qos(&self) -> Result<(), Error> {
        self.channel()?
            .basic_qos(
                self.settings.prefetch_count,
                self.settings.prefetch_size,
                BasicQosOptions { global: false },
            )
            .await
            .map_err(Error::channel("basic.qos"))
    }

    /// Close the protocol, if it is still open, then the transport, if any.
    ///
    /// Closing an instance that never connected is a no-op.
    #[tracing::instrument(name = "amqp_close", skip(self))]
    pub async fn close(&mut self) -> Result<(), Error> {
        if let Some(protocol) = self.protocol.as_ref().filter(|p| p.is_open()) {
            protocol.close().await.map_err(Error::Close)?;
        }
        if let Some(transport) = self.transport.as_mut() {
            transport.close();
        }
        Ok(())
    }

    /// `true` if both transport and protocol are there and the protocol is open.
    pub fn is_connected(&self) -> bool {
        self.transport.is_some() && self.protocol.as_ref().is_some_and(|p| p.is_open())
    }

    pub fn serialize_data<T>(&self, data: &T) -> Result<Vec<u8>, SerializeError>
    where
        T: Serialize + ?Sized,
    {
        self.serializer.serialize(data)
    }

    pub fn deserialize_data<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, DeserializeError> {
        self.serializer.deserialize(data)
    }

    pub(crate) fn channel(&self) -> Result<&C::Channel, Error> {
        self.channel.as_ref().ok_or(Error::NotConnected)
    }
}
