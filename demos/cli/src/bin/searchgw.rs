//! Search for a gateway, connect to the first one that answers, register a
//! topic and publish one message.

use mqttsn_client::client::MqttsnClientBuilder;
use mqttsn_client::session::{ConnectConfig, Topic};
use mqttsn_client::transport::QoS;
use mqttsn_demo::{DemoResult, Settings, init_logging};
use tracing::info;

#[tokio::main]
async fn main() -> DemoResult<()> {
    init_logging();
    let settings = Settings::from_env()?;

    let (client, _messages) = MqttsnClientBuilder::new()
        .join_multicast(settings.group)
        .discovery_target(settings.discovery_target())
        .search_radius(settings.radius)
        .start()
        .await?;

    let gateway = client.search_gateway().await?;
    info!(gw_id = gateway.gateway_id, address = %gateway.address, "gateway found");

    client
        .connect(ConnectConfig::new(settings.client_id.clone(), gateway.address)?)
        .await?;
    let topic_id = client.register(&settings.topic).await?;
    client
        .publish(Topic::Normal(topic_id), "hello", QoS::AtLeastOnce, false)
        .await?;
    info!(topic = %settings.topic, topic_id, "published");

    client.disconnect().await?;
    client.close().await?;
    Ok(())
}
