//! `carrot-cake-ext` is a thin layer on top of [`lapin`] to publish and consume serialized
//! messages with RabbitMQ, without wiring the AMQP topology by hand.
//!
//! [`Producer`] and [`Consumer`] are the best starting points: both share the connection
//! lifecycle of [`AmqpBase`], driven by an [`AmqpSettings`](crate::amqp::configuration::AmqpSettings).
//!
//! ## Examples
//!
//! Check the `demos` directory to see the library in action against a local broker.

pub mod amqp;
mod base;
pub mod consumer;
mod error;
pub mod producer;
pub mod serializer;

#[cfg(test)]
mod testing;

pub use base::AmqpBase;
pub use consumer::{Consumer, FailureAction, RequestHandler};
pub use error::Error;
pub use producer::{Producer, PublishOptions};
