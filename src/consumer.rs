use crate::{
    amqp::{
        configuration::AmqpSettings, AmqpChannel, AmqpClient, Delivery, DeliveryCallback,
        LapinClient,
    },
    serializer::{DeserializeError, SerializerKind, UnknownSerializer},
    AmqpBase, Error,
};
use futures_util::{future::BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use std::{any::Any, fmt, panic::AssertUnwindSafe, sync::Arc};
use tracing::{error, warn};
use uuid::Uuid;

/// Implementers of `RequestHandler` hold the business logic of a [`Consumer`]: they get the
/// deserialized body of every message pulled from the queue.
///
/// # Scope
///
/// `process_request` does not get access to the underlying RabbitMq channel.
/// The consumer acknowledges each message once the handler returns, whatever the outcome: a
/// failure (an `Err`, or a panic) is logged and the message is gone, unless the consumer is
/// configured with [`FailureAction::Reject`].
#[async_trait::async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// What the message body is deserialized into.
    type Payload: DeserializeOwned + Send;
    type Error: fmt::Display + Send;

    async fn process_request(&self, data: Self::Payload) -> Result<(), Self::Error>;
}

/// What happens to a message whose processing failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailureAction {
    /// Acknowledge it anyway: the message is never redelivered (at-most-once delivery).
    /// A poison message cannot block the queue, at the cost of losing messages on handler bugs.
    #[default]
    Ack,
    /// Reject it. With `requeue: false` the broker dead-letters the message, if the queue has a
    /// dead letter exchange, or drops it.
    Reject { requeue: bool },
}

/// Pulls messages from the configured queue and hands them over to a [`RequestHandler`].
///
/// The connection is established lazily by [`Consumer::consume`]: `Consumer` connects, declares
/// the exchange and the queue, binds them with every configured routing key and sets the
/// prefetch limits.
pub struct Consumer<H: RequestHandler, C: AmqpClient = LapinClient> {
    base: AmqpBase<C>,
    handler: Arc<H>,
    failure_action: FailureAction,
}

impl<H: RequestHandler> Consumer<H, LapinClient> {
    pub fn lapin(settings: AmqpSettings, handler: H) -> Result<Self, UnknownSerializer> {
        Self::new(LapinClient::default(), settings, handler)
    }
}

impl<H: RequestHandler, C: AmqpClient> Consumer<H, C> {
    pub fn new(client: C, settings: AmqpSettings, handler: H) -> Result<Self, UnknownSerializer> {
        Ok(Self {
            base: AmqpBase::new(client, settings)?,
            handler: Arc::new(handler),
            failure_action: FailureAction::default(),
        })
    }

    /// Configure what happens to messages whose processing failed.
    /// Defaults to [`FailureAction::Ack`].
    #[must_use]
    pub fn with_failure_action(mut self, failure_action: FailureAction) -> Self {
        self.failure_action = failure_action;
        self
    }

    async fn init_connection(&mut self) -> Result<(), Error> {
        self.base.connect().await?;
        self.base.declare_exchange().await?;
        self.base.declare_queue().await?;
        self.base.bind_queue().await?;
        self.base.specify_basic_qos().await
    }

    /// Start consuming from the configured queue.
    ///
    /// `consume` returns as soon as the broker has registered the consumer: messages are then
    /// processed in the background, on the executor driving the AMQP client.
    #[tracing::instrument(name = "amqp_consume", skip(self), fields(queue = %self.base.settings().queue))]
    pub async fn consume(&mut self) -> Result<(), Error> {
        if !self.base.is_connected() {
            self.init_connection().await?;
        }

        let channel = self.base.channel()?.clone();
        let processor = Arc::new(self.processor());
        let callback: DeliveryCallback = {
            let channel = channel.clone();
            Arc::new(move |delivery: Delivery| -> BoxFuture<'static, ()> {
                let processor = Arc::clone(&processor);
                let channel = channel.clone();
                Box::pin(async move { processor.on_message(&channel, &delivery).await })
            })
        };

        let consumer_tag = Uuid::new_v4().to_string();
        channel
            .basic_consume(&self.base.settings().queue, &consumer_tag, callback)
            .await
            .map_err(Error::channel("basic.consume"))
    }

    /// Process a single message: deserialize the body, run the handler, then acknowledge.
    ///
    /// This is what [`Consumer::consume`] runs for every delivery. It never fails: errors are
    /// logged.
    pub async fn on_message(&self, channel: &C::Channel, delivery: &Delivery) {
        self.processor().on_message(channel, delivery).await
    }

    pub async fn close(&mut self) -> Result<(), Error> {
        self.base.close().await
    }

    pub fn is_connected(&self) -> bool {
        self.base.is_connected()
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// The underlying connection, e.g. to run setup steps by hand.
    pub fn base(&self) -> &AmqpBase<C> {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut AmqpBase<C> {
        &mut self.base
    }

    fn processor(&self) -> MessageProcessor<H> {
        MessageProcessor {
            handler: Arc::clone(&self.handler),
            serializer: self.base.serializer(),
            failure_action: self.failure_action,
        }
    }
}

/// Everything the delivery callback needs, detached from the `Consumer` so that it can outlive
/// the call to `consume`.
struct MessageProcessor<H> {
    handler: Arc<H>,
    serializer: SerializerKind,
    failure_action: FailureAction,
}

impl<H: RequestHandler> MessageProcessor<H> {
    #[tracing::instrument(
        name = "process_message",
        skip_all,
        fields(delivery_tag = delivery.delivery_tag),
        level = "debug"
    )]
    async fn on_message<Ch: AmqpChannel>(&self, channel: &Ch, delivery: &Delivery) {
        let outcome = match self.process(&delivery.data).await {
            Ok(()) => channel.basic_client_ack(delivery.delivery_tag).await,
            Err(e) => {
                warn!("Failed to process message {}: {:?}", delivery.delivery_tag, e);
                match self.failure_action {
                    FailureAction::Ack => channel.basic_client_ack(delivery.delivery_tag).await,
                    FailureAction::Reject { requeue } => {
                        channel.basic_nack(delivery.delivery_tag, requeue).await
                    }
                }
            }
        };
        if let Err(e) = outcome {
            error!(
                "Failed to settle message {} with the broker: {:?}",
                delivery.delivery_tag, e
            );
        }
    }

    async fn process(&self, body: &[u8]) -> Result<(), ProcessingError> {
        let data: H::Payload = self.serializer.deserialize(body)?;
        // A panicking handler must not prevent the message from being settled.
        match AssertUnwindSafe(self.handler.process_request(data))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ProcessingError::Handler(e.to_string())),
            Err(panic) => Err(ProcessingError::Panic(panic_message(panic.as_ref()))),
        }
    }
}

#[derive(thiserror::Error, Debug)]
enum ProcessingError {
    #[error(transparent)]
    Deserialize(#[from] DeserializeError),
    #[error("The request handler failed: {0}")]
    Handler(String),
    #[error("The request handler panicked: {0}")]
    Panic(String),
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
