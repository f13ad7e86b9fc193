//! Helpers for connecting to a rabbitmq broker

pub mod client;
pub mod configuration;
mod lapin_client;

pub use client::{AmqpChannel, AmqpClient, Delivery, DeliveryCallback, Protocol, Transport};
pub use lapin_client::{LapinClient, LapinProtocol, LapinTransport};

pub use lapin::{options, types, BasicProperties, ExchangeKind};
