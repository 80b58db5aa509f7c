//! Kafka Admin 模块
//!
//! Topic 创建；已存在的 Topic 通过元数据查询分区数

use std::sync::Arc;
use std::time::Duration;

use bridge_errors::ClientError;
use bridge_ports::{TopicCreation, TopicSpec};
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::error::RDKafkaErrorCode;
use tracing::{debug, error, info};

use crate::config::KafkaConfig;
use crate::error::{classify, classify_code};

/// Kafka Admin 客户端
pub struct KafkaAdmin {
    admin: AdminClient<DefaultClientContext>,
    metadata: Arc<BaseConsumer>,
    timeout: Duration,
}

impl KafkaAdmin {
    /// 创建 Admin 客户端
    pub fn new(config: &KafkaConfig) -> Result<Self, ClientError> {
        let client_config = config.client_config();
        let admin: AdminClient<DefaultClientContext> =
            client_config.create().map_err(|e| classify(&e))?;
        let metadata: BaseConsumer = client_config.create().map_err(|e| classify(&e))?;

        Ok(Self {
            admin,
            metadata: Arc::new(metadata),
            timeout: Duration::from_secs(30),
        })
    }

    /// 从 broker 地址创建
    pub fn from_brokers(brokers: &str) -> Result<Self, ClientError> {
        Self::new(&KafkaConfig::new(brokers))
    }

    /// 设置超时时间
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 创建 Topic
    pub async fn create_topic(&self, spec: &TopicSpec) -> Result<TopicCreation, ClientError> {
        let mut new_topic = NewTopic::new(
            &spec.name,
            spec.partitions,
            TopicReplication::Fixed(spec.replication_factor),
        );
        for (key, value) in &spec.config {
            new_topic = new_topic.set(key, value);
        }

        let opts = AdminOptions::new().operation_timeout(Some(self.timeout));

        let results = self
            .admin
            .create_topics(&[new_topic], &opts)
            .await
            .map_err(|e| classify(&e))?;

        match results.into_iter().next() {
            Some(Ok(name)) => {
                info!(topic = %name, partitions = spec.partitions, "Topic created successfully");
                Ok(TopicCreation::Created)
            }
            Some(Err((name, RDKafkaErrorCode::TopicAlreadyExists))) => {
                let partitions = self.partition_count(&name).await;
                debug!(topic = %name, ?partitions, "Topic already exists");
                Ok(TopicCreation::AlreadyExists { partitions })
            }
            Some(Err((name, code))) => {
                error!(topic = %name, error = ?code, "Failed to create topic");
                Err(classify_code(
                    code,
                    format!("failed to create topic {}: {}", name, code),
                ))
            }
            None => Err(ClientError::fatal(format!(
                "no result returned for topic {}",
                spec.name
            ))),
        }
    }

    /// 查询现有分区数；查询失败时返回 None
    pub async fn partition_count(&self, topic: &str) -> Option<i32> {
        let client = self.metadata.clone();
        let topic_name = topic.to_string();
        let timeout = self.timeout;

        let result = tokio::task::spawn_blocking(move || {
            client
                .fetch_metadata(Some(&topic_name), timeout)
                .map(|metadata| {
                    metadata
                        .topics()
                        .iter()
                        .find(|t| t.name() == topic_name)
                        .map(|t| t.partitions().len() as i32)
                })
        })
        .await;

        match result {
            Ok(Ok(partitions)) => partitions,
            Ok(Err(e)) => {
                debug!(topic = %topic, error = %e, "Failed to fetch topic metadata");
                None
            }
            Err(e) => {
                debug!(topic = %topic, error = %e, "Metadata task panicked");
                None
            }
        }
    }
}
