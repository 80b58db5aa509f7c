//! bridge - 通道与 Kafka 之间的桥接服务

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bridge_bootstrap::{
    Foo, build_bridge, init_runtime, kafka_client, log_received, send_demo_sequence,
    shutdown_signal,
};
use bridge_channel::Bridge;
use bridge_config::BridgeSettings;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config_dir = std::env::var("BRIDGE_CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
    let settings = BridgeSettings::load(&config_dir).context("failed to load settings")?;
    init_runtime(&settings)?;

    let client = Arc::new(kafka_client(&settings)?);

    let health = client.health_checker()?.check_async(Vec::new()).await;
    if health.healthy {
        info!(
            brokers = health.broker_count,
            latency_ms = ?health.latency_ms,
            "Kafka reachable"
        );
    } else {
        warn!(error = ?health.error, "Kafka health check failed, provisioning will retry");
    }

    // 订阅者就绪后再启动消费
    let bridge: Bridge<Foo> = build_bridge(&settings, client.clone(), false)
        .await
        .context("failed to build bridge")?;
    let _logger = log_received(&bridge);
    bridge.start()?;

    for listener in &settings.listeners {
        let handle = bridge
            .registrar()
            .add_listener(listener.topics.iter().cloned(), &listener.suffix)?;
        info!(group_id = %handle.group_id(), topics = ?handle.topics(), "Listener added");
    }

    if settings.demo.enabled {
        send_demo_sequence(&bridge.outbound(), settings.demo.messages).await?;
    }

    info!(
        outbound = %bridge.binding().outbound_topic,
        inbound = ?bridge.inbound_topics(),
        "Bridge running"
    );

    shutdown_signal().await;

    bridge.shutdown().await;
    client.flush(Duration::from_secs(5));
    info!("Bridge stopped");
    Ok(())
}
