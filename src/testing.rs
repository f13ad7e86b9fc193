//! An in-memory broker that records every call it receives, to drive the connection lifecycle
//! without RabbitMq.
use crate::amqp::client::{AmqpChannel, AmqpClient, Delivery, DeliveryCallback, Protocol, Transport};
use amq_protocol_types::DeliveryTag;
use lapin::{
    options::{BasicPublishOptions, BasicQosOptions, ExchangeDeclareOptions, QueueDeclareOptions},
    BasicProperties, ExchangeKind,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    Connect(String),
    OpenChannel,
    ExchangeDeclare {
        exchange: String,
        kind: String,
        durable: bool,
    },
    QueueDeclare {
        queue: String,
        durable: bool,
    },
    QueueBind {
        queue: String,
        exchange: String,
        routing_key: String,
    },
    BasicQos {
        prefetch_count: u16,
        prefetch_size: u32,
        global: bool,
    },
    BasicPublish {
        exchange: String,
        routing_key: String,
        mandatory: bool,
        immediate: bool,
        payload: Vec<u8>,
        properties: BasicProperties,
    },
    BasicConsume {
        queue: String,
    },
    Ack(DeliveryTag),
    Nack {
        delivery_tag: DeliveryTag,
        requeue: bool,
    },
    CloseProtocol,
    CloseTransport,
}

#[derive(Default)]
struct State {
    calls: Mutex<Vec<Call>>,
    open: AtomicBool,
    refuse_connections: AtomicBool,
    failing_routing_key: Mutex<Option<String>>,
    consumers: Mutex<Vec<DeliveryCallback>>,
}

/// Shared handle on the fake broker state. Clients, protocols and channels created from the same
/// broker record into the same call log.
#[derive(Clone, Default)]
pub(crate) struct FakeBroker(Arc<State>);

impl FakeBroker {
    pub(crate) fn client(&self) -> FakeClient {
        FakeClient(self.clone())
    }

    pub(crate) fn protocol(&self) -> FakeProtocol {
        FakeProtocol(self.clone())
    }

    pub(crate) fn transport(&self) -> FakeTransport {
        FakeTransport(self.clone())
    }

    pub(crate) fn channel(&self) -> FakeChannel {
        FakeChannel(self.clone())
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.0.calls.lock().unwrap().clone()
    }

    pub(crate) fn clear_calls(&self) {
        self.0.calls.lock().unwrap().clear();
    }

    /// Simulate the broker dropping (or restoring) the AMQP session.
    pub(crate) fn set_open(&self, open: bool) {
        self.0.open.store(open, Ordering::SeqCst);
    }

    pub(crate) fn refuse_connections(&self) {
        self.0.refuse_connections.store(true, Ordering::SeqCst);
    }

    /// Make binding with `routing_key` fail.
    pub(crate) fn fail_binding(&self, routing_key: &str) {
        *self.0.failing_routing_key.lock().unwrap() = Some(routing_key.to_owned());
    }

    /// Push a message to every registered consumer.
    pub(crate) async fn deliver(&self, delivery: Delivery) {
        let consumers = self.0.consumers.lock().unwrap().clone();
        for consumer in consumers {
            consumer(delivery.clone()).await;
        }
    }

    fn record(&self, call: Call) {
        self.0.calls.lock().unwrap().push(call);
    }
}

pub(crate) fn delivery(delivery_tag: DeliveryTag, data: &[u8]) -> Delivery {
    Delivery {
        delivery_tag,
        exchange: "orders".into(),
        routing_key: "orders.created".into(),
        redelivered: false,
        properties: BasicProperties::default(),
        data: data.to_vec(),
    }
}

fn kind_name(kind: &ExchangeKind) -> String {
    match kind {
        ExchangeKind::Direct => "direct".into(),
        ExchangeKind::Fanout => "fanout".into(),
        ExchangeKind::Headers => "headers".into(),
        ExchangeKind::Topic => "topic".into(),
        ExchangeKind::Custom(custom) => custom.clone(),
    }
}

pub(crate) struct FakeClient(FakeBroker);

#[async_trait::async_trait]
impl AmqpClient for FakeClient {
    type Transport = FakeTransport;
    type Protocol = FakeProtocol;
    type Channel = FakeChannel;

    async fn from_url(
        &self,
        url: &str,
    ) -> Result<(FakeTransport, FakeProtocol), anyhow::Error> {
        if self.0 .0.refuse_connections.load(Ordering::SeqCst) {
            anyhow::bail!("Connection refused");
        }
        self.0.record(Call::Connect(url.to_owned()));
        self.0.set_open(true);
        Ok((self.0.transport(), self.0.protocol()))
    }
}

pub(crate) struct FakeProtocol(FakeBroker);

#[async_trait::async_trait]
impl Protocol for FakeProtocol {
    type Channel = FakeChannel;

    async fn channel(&self) -> Result<FakeChannel, anyhow::Error> {
        self.0.record(Call::OpenChannel);
        Ok(self.0.channel())
    }

    fn is_open(&self) -> bool {
        self.0 .0.open.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), anyhow::Error> {
        self.0.record(Call::CloseProtocol);
        self.0.set_open(false);
        Ok(())
    }
}

pub(crate) struct FakeTransport(FakeBroker);

impl Transport for FakeTransport {
    fn close(&mut self) {
        self.0.record(Call::CloseTransport);
    }
}

#[derive(Clone)]
pub(crate) struct FakeChannel(FakeBroker);

#[async_trait::async_trait]
impl AmqpChannel for FakeChannel {
    async fn exchange_declare(
        &self,
        exchange: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
    ) -> Result<(), anyhow::Error> {
        self.0.record(Call::ExchangeDeclare {
            exchange: exchange.to_owned(),
            kind: kind_name(&kind),
            durable: options.durable,
        });
        Ok(())
    }

    async fn queue_declare(
        &self,
        queue: &str,
        options: QueueDeclareOptions,
    ) -> Result<(), anyhow::Error> {
        self.0.record(Call::QueueDeclare {
            queue: queue.to_owned(),
            durable: options.durable,
        });
        Ok(())
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), anyhow::Error> {
        if self.0 .0.failing_routing_key.lock().unwrap().as_deref() == Some(routing_key) {
            anyhow::bail!("NOT_FOUND - no exchange '{exchange}'");
        }
        self.0.record(Call::QueueBind {
            queue: queue.to_owned(),
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
        });
        Ok(())
    }

    async fn basic_qos(
        &self,
        prefetch_count: u16,
        prefetch_size: u32,
        options: BasicQosOptions,
    ) -> Result<(), anyhow::Error> {
        self.0.record(Call::BasicQos {
            prefetch_count,
            prefetch_size,
            global: options.global,
        });
        Ok(())
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        options: BasicPublishOptions,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), anyhow::Error> {
        self.0.record(Call::BasicPublish {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            mandatory: options.mandatory,
            immediate: options.immediate,
            payload: payload.to_vec(),
            properties,
        });
        Ok(())
    }

    async fn basic_consume(
        &self,
        queue: &str,
        _consumer_tag: &str,
        callback: DeliveryCallback,
    ) -> Result<(), anyhow::Error> {
        self.0.record(Call::BasicConsume {
            queue: queue.to_owned(),
        });
        self.0 .0.consumers.lock().unwrap().push(callback);
        Ok(())
    }

    async fn basic_client_ack(&self, delivery_tag: DeliveryTag) -> Result<(), anyhow::Error> {
        self.0.record(Call::Ack(delivery_tag));
        Ok(())
    }

    async fn basic_nack(
        &self,
        delivery_tag: DeliveryTag,
        requeue: bool,
    ) -> Result<(), anyhow::Error> {
        self.0.record(Call::Nack {
            delivery_tag,
            requeue,
        });
        Ok(())
    }
}
