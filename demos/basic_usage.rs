use mq_client::{ClientEvent, MqClient, MqError};
use tracing::Level;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_target(false)
        .try_init();

    let config = MqClient::builder()
        .name("demo")
        .host("localhost")
        .port(1337)
        .timeout_ms(5000)
        .build();
    let client = MqClient::with_config(config)?.with_event_sink(|event: &ClientEvent| {
        if let Ok(json) = serde_json::to_string(event) {
            println!("event: {}", json);
        }
    });

    println!("Connecting to broker...");
    client.start().await?;

    client.subscribe("news").await?;
    println!("Subscribed to 'news'");

    client.publish("news", "Hello, broker!").await?;
    println!("Published a message");

    match client.retrieve().await {
        Ok(body) => println!("Retrieved: {}", body),
        Err(MqError::RequestFailed { status, message }) => {
            println!("Nothing to retrieve ({} {})", status, message)
        }
        Err(e) => return Err(e.into()),
    }

    client.unsubscribe("news").await?;
    client.stop().await?;
    println!("Stopped: {}", client.is_shutdown());

    Ok(())
}
