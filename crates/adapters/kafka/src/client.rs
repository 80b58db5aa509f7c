//! `BrokerClient` 的 Kafka 实现

use std::time::Duration;

use async_trait::async_trait;
use bridge_errors::ClientError;
use bridge_ports::{
    Ack, BrokerClient, BrokerConsumer, OutboundRecord, TopicCreation, TopicSpec,
};

use crate::admin::KafkaAdmin;
use crate::config::{ConsumerConfig, KafkaConfig, ProducerConfig};
use crate::consumer::KafkaConsumer;
use crate::health::KafkaHealthChecker;
use crate::producer::KafkaProducer;

/// Kafka broker 客户端
///
/// admin 与 producer 在构造时创建并共享；每次 `subscribe` 创建一个新的消费者组成员。
pub struct KafkaBrokerClient {
    config: KafkaConfig,
    consumer_config: ConsumerConfig,
    admin: KafkaAdmin,
    producer: KafkaProducer,
    request_timeout: Duration,
}

impl KafkaBrokerClient {
    pub fn new(
        config: KafkaConfig,
        producer_config: ProducerConfig,
        consumer_config: ConsumerConfig,
    ) -> Result<Self, ClientError> {
        let admin = KafkaAdmin::new(&config)?;
        let producer = KafkaProducer::new(&config, &producer_config)?;

        Ok(Self {
            config,
            consumer_config,
            admin,
            producer,
            request_timeout: Duration::from_secs(30),
        })
    }

    /// Admin 与健康检查的请求超时
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.admin = self.admin.with_timeout(timeout);
        self.request_timeout = timeout;
        self
    }

    /// 使用默认 producer / consumer 配置
    pub fn from_config(config: KafkaConfig) -> Result<Self, ClientError> {
        Self::new(config, ProducerConfig::default(), ConsumerConfig::default())
    }

    pub fn config(&self) -> &KafkaConfig {
        &self.config
    }

    pub fn health_checker(&self) -> Result<KafkaHealthChecker, ClientError> {
        Ok(KafkaHealthChecker::new(&self.config)?.with_timeout(self.request_timeout))
    }

    /// 等待 producer 队列中的记录发送完毕
    pub fn flush(&self, timeout: Duration) {
        self.producer.flush(timeout);
    }
}

#[async_trait]
impl BrokerClient for KafkaBrokerClient {
    async fn create_topic(&self, spec: &TopicSpec) -> Result<TopicCreation, ClientError> {
        self.admin.create_topic(spec).await
    }

    async fn produce(&self, record: OutboundRecord) -> Result<Ack, ClientError> {
        self.producer.send(record).await
    }

    async fn subscribe(
        &self,
        group_id: &str,
        topics: &[String],
    ) -> Result<Box<dyn BrokerConsumer>, ClientError> {
        let consumer = KafkaConsumer::new(&self.config, &self.consumer_config, group_id, topics)?;
        Ok(Box::new(consumer))
    }
}
