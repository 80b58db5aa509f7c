//! Topic 预置
//!
//! 在任何流量之前确保 topic 存在。已存在的 topic 一律保留现状，
//! 不修改也不删除。

use std::collections::HashMap;
use std::sync::Arc;

use bridge_common::{RetryConfig, with_conditional_retry};
use bridge_errors::{BridgeError, BridgeResult, ClientError};
use bridge_ports::{BrokerClient, TopicCreation, TopicSpec};
use tracing::{debug, info, warn};

/// Topic 预置器
pub struct TopicProvisioner {
    client: Arc<dyn BrokerClient>,
    retry: RetryConfig,
}

impl TopicProvisioner {
    pub fn new(client: Arc<dyn BrokerClient>) -> Self {
        Self {
            client,
            retry: RetryConfig::default(),
        }
    }

    /// Broker 不可达时的重试策略
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// 确保 topic 存在
    ///
    /// 已存在但分区数不同只记录警告。broker 不可达（重试耗尽）、
    /// 授权失败或描述非法时返回 `Provision` 错误。
    pub async fn ensure_topic(&self, spec: &TopicSpec) -> BridgeResult<()> {
        spec.validate()
            .map_err(|reason| BridgeError::provision(&spec.name, reason))?;

        let creation = with_conditional_retry(
            &self.retry,
            "create_topic",
            || self.client.create_topic(spec),
            ClientError::is_transient,
        )
        .await
        .map_err(|e| BridgeError::provision(&spec.name, e.to_string()))?;

        match creation {
            TopicCreation::Created => {
                info!(
                    topic = %spec.name,
                    partitions = spec.partitions,
                    replication_factor = spec.replication_factor,
                    "Topic created"
                );
            }
            TopicCreation::AlreadyExists {
                partitions: Some(existing),
            } if existing != spec.partitions => {
                warn!(
                    topic = %spec.name,
                    requested = spec.partitions,
                    existing,
                    "Topic exists with a different partition count, keeping existing topology"
                );
            }
            TopicCreation::AlreadyExists { .. } => {
                debug!(topic = %spec.name, "Topic already exists");
            }
        }

        Ok(())
    }

    /// 按顺序预置多个 topic，同名只提交第一次
    pub async fn ensure_topics(&self, specs: &[TopicSpec]) -> BridgeResult<()> {
        let mut seen: HashMap<&str, &TopicSpec> = HashMap::new();

        for spec in specs {
            if let Some(first) = seen.get(spec.name.as_str()) {
                if *first != spec {
                    warn!(
                        topic = %spec.name,
                        "Duplicate topic spec with a different shape ignored"
                    );
                }
                continue;
            }
            seen.insert(spec.name.as_str(), spec);
            self.ensure_topic(spec).await?;
        }

        Ok(())
    }
}
