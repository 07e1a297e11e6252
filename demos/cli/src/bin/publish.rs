//! Connect to a gateway, register a topic and publish a counter with QoS 1,
//! reconnecting whenever the session is lost.

use mqttsn_client::client::{ExponentialBackoff, MqttsnClientBuilder};
use mqttsn_client::core::{ClientError, SessionState};
use mqttsn_client::session::{ConnectConfig, Topic};
use mqttsn_client::transport::QoS;
use mqttsn_demo::{DemoResult, Settings, init_logging};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> DemoResult<()> {
    init_logging();
    let settings = Settings::from_env()?;

    let (client, _messages) = MqttsnClientBuilder::new()
        .reconnect(ExponentialBackoff::default())
        .start()
        .await?;

    let config = ConnectConfig::new(settings.client_id.clone(), settings.gateway)?;
    client.connect(config).await?;
    info!(gateway = %settings.gateway, "connected");

    let mut ticker = tokio::time::interval(settings.interval);
    let mut counter: u64 = 0;
    let mut topic_id = None;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {}
        }
        if client.state() != SessionState::Connected {
            // Ids do not survive a reconnect
            topic_id = None;
            continue;
        }

        let id = match topic_id {
            Some(id) => id,
            None => match client.register(&settings.topic).await {
                Ok(id) => {
                    info!(topic = %settings.topic, topic_id = id, "registered");
                    topic_id = Some(id);
                    id
                }
                Err(error) => {
                    warn!(%error, "register failed");
                    continue;
                }
            },
        };

        counter += 1;
        let payload = counter.to_string();
        match client
            .publish(Topic::Normal(id), payload.clone(), QoS::AtLeastOnce, false)
            .await
        {
            Ok(()) => info!(%payload, "published"),
            Err(ClientError::Request(error)) if error.needs_registration() => {
                warn!(%error, "topic id no longer valid");
                topic_id = None;
            }
            Err(error) => warn!(%error, "publish failed"),
        }
    }

    client.disconnect().await?;
    client.close().await?;
    Ok(())
}
