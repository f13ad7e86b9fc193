use crate::helpers::{get_client, get_settings};
use carrot_cake_ext::{AmqpBase, Error, Producer, PublishOptions};
use serde_json::json;

#[test]
fn an_unknown_serializer_is_rejected_upfront() {
    let settings = get_settings().with_serializer("yaml");

    let error = Producer::new(get_client(), settings).err().unwrap();

    assert_eq!(error.to_string(), "Unknown serializer: yaml");
}

#[tokio::test]
async fn setup_steps_require_a_connection() {
    // Arrange
    let base = AmqpBase::new(get_client(), get_settings()).unwrap();

    // Act
    let outcomes = [
        base.declare_exchange().await,
        base.declare_queue().await,
        base.bind_queue().await,
        base.specify_basic_qos().await,
    ];

    // Assert
    for outcome in outcomes {
        assert!(matches!(outcome, Err(Error::NotConnected)));
    }
    assert!(!base.is_connected());
}

#[tokio::test]
async fn closing_a_producer_that_never_connected_is_a_no_op() {
    let mut producer = Producer::new(get_client(), get_settings()).unwrap();

    producer.close().await.unwrap();

    assert!(!producer.is_connected());
}

#[tokio::test]
async fn publishing_fails_when_the_broker_is_unreachable() {
    // Arrange
    let settings = get_settings().with_url("amqp://127.0.0.1:1/%2f");
    let mut producer = Producer::new(get_client(), settings).unwrap();

    // Act
    let outcome = producer.publish(&json!({"id": 1})).await;

    // Assert
    assert!(matches!(outcome, Err(Error::Connection(_))));
    assert!(!producer.is_connected());
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn the_full_setup_runs_against_a_real_broker() {
    // Arrange
    let mut base = AmqpBase::new(get_client(), get_settings()).unwrap();

    // Act
    base.connect().await.unwrap();
    base.declare_exchange().await.unwrap();
    base.declare_queue().await.unwrap();
    base.bind_queue().await.unwrap();
    base.specify_basic_qos().await.unwrap();

    // Assert
    assert!(base.is_connected());
    base.close().await.unwrap();
    assert!(!base.is_connected());
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn publishing_connects_lazily_and_reuses_the_connection() {
    // Arrange
    let mut producer = Producer::new(get_client(), get_settings()).unwrap();
    assert!(!producer.is_connected());

    // Act
    producer.publish(&json!({"id": 1})).await.unwrap();
    producer
        .publish_with_options(&json!({"id": 2}), PublishOptions::default().with_routing_key("other"))
        .await
        .unwrap();

    // Assert
    assert!(producer.is_connected());
    producer.close().await.unwrap();
    assert!(!producer.is_connected());
}
