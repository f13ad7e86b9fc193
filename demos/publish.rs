use carrot_cake_ext::{amqp::configuration::AmqpSettings, Producer, PublishOptions};
use serde::Serialize;

#[derive(Serialize)]
struct Greeting {
    message: String,
    #[serde(with = "carrot_cake_ext::serializer::epoch_seconds")]
    sent_at: chrono::DateTime<chrono::Utc>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // We are using the out-of-the-box parameters for the default RabbitMq Docker image.
    // Run `cargo run --example consume` in another terminal to see the messages coming through.
    let settings = AmqpSettings::default()
        .with_exchange("hello-exchange")
        .with_routing_key(vec!["hello", "goodbye"]);

    // Nothing happens on the network until the first publish.
    let mut producer = Producer::lapin(settings)?;

    for i in 0..3 {
        let greeting = Greeting {
            message: format!("Hello world #{i}!"),
            sent_at: chrono::Utc::now(),
        };
        // Published with the first configured routing key, `hello`.
        producer.publish(&greeting).await?;
    }

    let farewell = Greeting {
        message: "Goodbye!".into(),
        sent_at: chrono::Utc::now(),
    };
    producer
        .publish_with_options(&farewell, PublishOptions::default().with_routing_key("goodbye"))
        .await?;

    producer.close().await?;
    Ok(())
}
