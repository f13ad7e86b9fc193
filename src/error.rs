use crate::serializer::SerializeError;

/// Error returned by the lifecycle operations of producers and consumers.
///
/// Broker-side failures are surfaced as-is: nothing is retried or rolled back.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Failed to connect to the RabbitMq broker")]
    Connection(#[source] anyhow::Error),
    #[error("There is no open channel: `connect` must succeed first")]
    NotConnected,
    #[error("`{operation}` failed on the RabbitMq channel")]
    Channel {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("Failed to close the connection to the RabbitMq broker")]
    Close(#[source] anyhow::Error),
    #[error(transparent)]
    Serialize(#[from] SerializeError),
}

impl Error {
    pub(crate) fn channel(operation: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        move |source| Self::Channel { operation, source }
    }
}
