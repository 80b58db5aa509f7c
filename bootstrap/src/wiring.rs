//! 配置 → 组件
//!
//! 把 `BridgeSettings` 翻译成 Kafka 客户端配置、适配器选项与通道绑定

use std::sync::Arc;

use anyhow::{Context, anyhow};
use bridge_adapter_kafka::{
    AutoOffsetReset, CompressionType, ConsumerConfig, KafkaBrokerClient, KafkaConfig,
    ProducerConfig, SaslConfig, SaslMechanism, SecurityProtocol, SslConfig,
};
use bridge_channel::{
    Bridge, BridgePayload, BridgeResult, BrokerClient, ChannelBinding, ConsumerOptions,
    KeyStrategy, ProducerOptions, TopicSpec,
};
use bridge_common::RetryConfig;
use bridge_config::{
    BridgeSettings, ConsumerSettings, KafkaSettings, KeySettings, ProducerSettings, SslSettings,
    TopicSettings,
};
use tracing::info;

pub fn kafka_config(settings: &KafkaSettings) -> anyhow::Result<KafkaConfig> {
    let protocol = SecurityProtocol::parse(&settings.security_protocol)
        .ok_or_else(|| anyhow!("unknown security protocol: {}", settings.security_protocol))?;

    let mut config = KafkaConfig::new(&settings.brokers).with_security_protocol(protocol);

    if let Some(client_id) = &settings.client_id {
        config = config.with_client_id(client_id);
    }

    if let Some(sasl) = &settings.sasl {
        let mechanism = SaslMechanism::parse(&sasl.mechanism)
            .ok_or_else(|| anyhow!("unknown SASL mechanism: {}", sasl.mechanism))?;
        config = config.with_sasl(SaslConfig::new(
            mechanism,
            &sasl.username,
            sasl.password.clone(),
        ));
    }

    if let Some(ssl) = &settings.ssl {
        config = config.with_ssl(ssl_config(ssl)?);
    }

    for (key, value) in &settings.extra {
        config = config.with_extra(key, value);
    }

    Ok(config)
}

fn ssl_config(settings: &SslSettings) -> anyhow::Result<SslConfig> {
    let mut config = SslConfig::new();

    if let Some(ca) = &settings.ca_location {
        config = config.with_ca(ca);
    }

    match (&settings.certificate_location, &settings.key_location) {
        (Some(cert), Some(key)) => config = config.with_client_cert(cert, key),
        (None, None) => {}
        _ => {
            return Err(anyhow!(
                "ssl.certificate_location and ssl.key_location must be set together"
            ));
        }
    }

    if let Some(password) = &settings.key_password {
        config = config.with_key_password(password.clone());
    }

    if !settings.verify_hostname {
        config = config.without_verification();
    }

    Ok(config)
}

pub fn producer_config(settings: &ProducerSettings) -> anyhow::Result<ProducerConfig> {
    let compression = CompressionType::parse(&settings.compression)
        .ok_or_else(|| anyhow!("unknown compression type: {}", settings.compression))?;

    let config = ProducerConfig::default()
        .with_compression(compression)
        .with_linger_ms(settings.linger_ms)
        .with_acks(settings.acks);

    Ok(if settings.idempotence {
        config
    } else {
        config.without_idempotence()
    })
}

pub fn consumer_config(settings: &ConsumerSettings) -> anyhow::Result<ConsumerConfig> {
    let reset = match settings.auto_offset_reset.as_str() {
        "earliest" => AutoOffsetReset::Earliest,
        "latest" => AutoOffsetReset::Latest,
        other => return Err(anyhow!("unknown auto_offset_reset: {}", other)),
    };

    Ok(ConsumerConfig::default()
        .with_auto_offset_reset(reset)
        .with_session_timeout(settings.session_timeout())
        .with_max_poll_records(settings.max_poll_records))
}

pub fn producer_options(settings: &ProducerSettings) -> ProducerOptions {
    ProducerOptions {
        linger: settings.linger(),
        batch_size: settings.batch_size.max(1),
        buffer_capacity: settings.buffer_capacity.max(1),
        send_timeout: settings.send_timeout(),
    }
}

pub fn consumer_options(settings: &ConsumerSettings) -> ConsumerOptions {
    ConsumerOptions {
        poll_timeout: settings.poll_timeout(),
        fetch_backoff: RetryConfig::new(u32::MAX, settings.backoff_initial(), settings.backoff_max()),
        delivery_retry: RetryConfig::new(
            settings.delivery_attempts,
            settings.backoff_initial(),
            settings.backoff_max(),
        ),
    }
}

pub fn topic_specs(settings: &[TopicSettings]) -> Vec<TopicSpec> {
    settings
        .iter()
        .map(|topic| {
            topic.config.iter().fold(
                TopicSpec::new(&topic.name, topic.partitions, topic.replication_factor),
                |spec, (key, value)| spec.with_config(key, value),
            )
        })
        .collect()
}

pub fn key_strategy<T>(settings: &KeySettings) -> KeyStrategy<T> {
    match settings {
        KeySettings::Constant { value } => KeyStrategy::constant(value),
        KeySettings::Header { name } => KeyStrategy::header(name),
        KeySettings::PayloadField { pointer } => KeyStrategy::payload_field(pointer),
    }
}

pub fn channel_binding<T>(settings: &BridgeSettings) -> ChannelBinding<T> {
    let mut binding = ChannelBinding::new(
        &settings.binding.outbound_topic,
        &settings.consumer.group_id,
    );
    if let Some(key) = &settings.binding.key {
        binding = binding.with_key_strategy(key_strategy(key));
    }
    settings
        .binding
        .inbound_topics
        .iter()
        .fold(binding, |binding, topic| binding.with_inbound_topic(topic))
}

/// 创建 Kafka 客户端（admin + producer）
pub fn kafka_client(settings: &BridgeSettings) -> anyhow::Result<KafkaBrokerClient> {
    let client = KafkaBrokerClient::new(
        kafka_config(&settings.kafka)?,
        producer_config(&settings.producer)?,
        consumer_config(&settings.consumer)?,
    )
    .context("failed to create Kafka client")?
    .with_request_timeout(settings.kafka.request_timeout());

    info!(brokers = %settings.kafka.brokers, "Kafka client created");
    Ok(client)
}

/// 预置 topic 并组装 Bridge
pub async fn build_bridge<T: BridgePayload>(
    settings: &BridgeSettings,
    client: Arc<dyn BrokerClient>,
    auto_startup: bool,
) -> BridgeResult<Bridge<T>> {
    Bridge::builder(client, channel_binding(settings))
        .topics(topic_specs(&settings.topics))
        .producer_options(producer_options(&settings.producer))
        .consumer_options(consumer_options(&settings.consumer))
        .auto_startup(auto_startup)
        .build()
        .await
}
