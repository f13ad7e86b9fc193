use crate::{
    amqp::{configuration::AmqpSettings, AmqpChannel, AmqpClient, BasicProperties, LapinClient},
    serializer::UnknownSerializer,
    AmqpBase, Error,
};
use lapin::options::BasicPublishOptions;
use serde::Serialize;

/// Delivery mode: the broker may drop the message on restart.
pub const NON_PERSISTENT: u8 = 1;
/// Delivery mode: the broker keeps the message across restarts, if the queue is durable.
pub const PERSISTENT: u8 = 2;

/// The properties used when publishing without explicit properties: persistent delivery.
pub fn default_properties() -> BasicProperties {
    BasicProperties::default().with_delivery_mode(PERSISTENT)
}

/// Per-message overrides for [`Producer::publish_with_options`].
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Defaults to the configured routing key (the first one, if a list was configured).
    pub routing_key: Option<String>,
    /// Defaults to [`default_properties`].
    pub properties: Option<BasicProperties>,
    /// Ask the broker to return the message if it cannot be routed to any queue.
    pub mandatory: bool,
    /// Ask the broker to return the message if it cannot be delivered to a consumer right away.
    ///
    /// RabbitMq 3.0+ does not support it and closes the channel if set.
    pub immediate: bool,
}

impl PublishOptions {
    #[must_use]
    pub fn with_routing_key<T: Into<String>>(mut self, routing_key: T) -> Self {
        self.routing_key = Some(routing_key.into());
        self
    }

    #[must_use]
    pub fn with_properties(mut self, properties: BasicProperties) -> Self {
        self.properties = Some(properties);
        self
    }

    #[must_use]
    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    #[must_use]
    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }
}

/// Publishes serialized payloads to the configured exchange.
///
/// The connection is established lazily, on the first publish (and again after it drops):
/// `Producer` connects and declares the exchange, but never declares or binds a queue.
///
/// Publishing is fire-and-forget: the producer does not wait for publisher confirms.
pub struct Producer<C: AmqpClient = LapinClient> {
    base: AmqpBase<C>,
}

impl Producer<LapinClient> {
    pub fn lapin(settings: AmqpSettings) -> Result<Self, UnknownSerializer> {
        Self::new(LapinClient::default(), settings)
    }
}

impl<C: AmqpClient> Producer<C> {
    pub fn new(client: C, settings: AmqpSettings) -> Result<Self, UnknownSerializer> {
        Ok(Self {
            base: AmqpBase::new(client, settings)?,
        })
    }

    async fn init_connection(&mut self) -> Result<(), Error> {
        self.base.connect().await?;
        self.base.declare_exchange().await
    }

    /// Publish `payload` with the configured routing key and persistent delivery.
    pub async fn publish<T>(&mut self, payload: &T) -> Result<(), Error>
    where
        T: Serialize + Sync + ?Sized,
    {
        self.publish_with_options(payload, PublishOptions::default())
            .await
    }

    /// Publish `payload`, overriding routing key, properties or flags.
    #[tracing::instrument(
        name = "amqp_publish",
        skip_all,
        fields(exchange = %self.base.settings().exchange)
    )]
    pub async fn publish_with_options<T>(
        &mut self,
        payload: &T,
        options: PublishOptions,
    ) -> Result<(), Error>
    where
        T: Serialize + Sync + ?Sized,
    {
        let PublishOptions {
            routing_key,
            properties,
            mandatory,
            immediate,
        } = options;
        let properties = properties.unwrap_or_else(default_properties);
        let routing_key = routing_key
            .unwrap_or_else(|| self.base.settings().routing_key.default_key().to_owned());

        if !self.base.is_connected() {
            self.init_connection().await?;
        }

        let payload = self.base.serialize_data(payload)?;
        self.base
            .channel()?
            .basic_publish(
                &self.base.settings().exchange,
                &routing_key,
                BasicPublishOptions {
                    mandatory,
                    immediate,
                },
                &payload,
                properties,
            )
            .await
            .map_err(Error::channel("basic.publish"))
    }

    pub async fn close(&mut self) -> Result<(), Error> {
        self.base.close().await
    }

    pub fn is_connected(&self) -> bool {
        self.base.is_connected()
    }

    /// The underlying connection, e.g. to run setup steps by hand.
    pub fn base(&self) -> &AmqpBase<C> {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut AmqpBase<C> {
        &mut self.base
    }
}
