use carrot_cake_ext::{amqp::configuration::AmqpSettings, Consumer, RequestHandler};
use serde::Deserialize;

#[derive(Deserialize, Debug)]
struct Greeting {
    message: String,
    #[serde(with = "carrot_cake_ext::serializer::epoch_seconds")]
    sent_at: chrono::DateTime<chrono::Utc>,
}

struct PrintHandler;

#[async_trait::async_trait]
impl RequestHandler for PrintHandler {
    type Payload = Greeting;
    type Error = String;

    async fn process_request(&self, greeting: Greeting) -> Result<(), String> {
        if greeting.message.is_empty() {
            // Logged by the consumer, then acknowledged: the message is not redelivered.
            return Err("Empty greeting".into());
        }
        println!("[{}] {}", greeting.sent_at, greeting.message);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = AmqpSettings::default()
        .with_exchange("hello-exchange")
        .with_queue("hello-queue")
        .with_routing_key(vec!["hello", "goodbye"])
        .with_prefetch_count(10);

    // `consume` declares the exchange and the queue, binds them with both routing keys and
    // registers the handler. Messages are then processed in the background.
    let mut consumer = Consumer::lapin(settings, PrintHandler)?;
    consumer.consume().await?;

    tokio::signal::ctrl_c().await?;
    consumer.close().await?;
    Ok(())
}
