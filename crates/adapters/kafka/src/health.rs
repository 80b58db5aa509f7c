//! Kafka 健康检查模块
//!
//! 启动前确认 broker 可达，并检查桥接使用的 topic 是否存在

use std::sync::Arc;
use std::time::{Duration, Instant};

use bridge_errors::ClientError;
use rdkafka::consumer::{BaseConsumer, Consumer};
use tracing::{debug, error};

use crate::config::KafkaConfig;
use crate::error::classify;

/// 健康检查结果
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    pub healthy: bool,
    /// 元数据请求耗时（毫秒）
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
    pub broker_count: usize,
    /// 请求的 topic 中缺失的部分
    pub missing_topics: Vec<String>,
}

/// Kafka 健康检查器
#[derive(Clone)]
pub struct KafkaHealthChecker {
    consumer: Arc<BaseConsumer>,
    timeout: Duration,
}

impl KafkaHealthChecker {
    pub fn new(config: &KafkaConfig) -> Result<Self, ClientError> {
        let consumer: BaseConsumer = config.client_config().create().map_err(|e| classify(&e))?;

        Ok(Self {
            consumer: Arc::new(consumer),
            timeout: Duration::from_secs(10),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 同步执行检查，会阻塞当前线程直到元数据返回或超时
    pub fn check(&self, topics: &[String]) -> HealthCheckResult {
        let start = Instant::now();

        match self.consumer.fetch_metadata(None, self.timeout) {
            Ok(metadata) => {
                let latency = start.elapsed().as_millis() as u64;
                let broker_count = metadata.brokers().len();
                let missing_topics: Vec<String> = topics
                    .iter()
                    .filter(|name| {
                        !metadata
                            .topics()
                            .iter()
                            .any(|t| t.name() == name.as_str() && t.error().is_none())
                    })
                    .cloned()
                    .collect();

                debug!(
                    latency_ms = latency,
                    brokers = broker_count,
                    missing = missing_topics.len(),
                    "Kafka health check finished"
                );

                HealthCheckResult {
                    healthy: broker_count > 0 && missing_topics.is_empty(),
                    latency_ms: Some(latency),
                    error: None,
                    broker_count,
                    missing_topics,
                }
            }
            Err(e) => {
                error!(error = %e, "Kafka health check failed");
                HealthCheckResult {
                    healthy: false,
                    latency_ms: None,
                    error: Some(e.to_string()),
                    broker_count: 0,
                    missing_topics: topics.to_vec(),
                }
            }
        }
    }

    /// 在阻塞线程池中执行检查
    pub async fn check_async(&self, topics: Vec<String>) -> HealthCheckResult {
        let checker = self.clone();
        match tokio::task::spawn_blocking(move || checker.check(&topics)).await {
            Ok(result) => result,
            Err(e) => HealthCheckResult {
                healthy: false,
                latency_ms: None,
                error: Some(format!("health check task failed: {}", e)),
                broker_count: 0,
                missing_topics: Vec::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // 需要 Kafka 实例
    async fn test_health_checker() {
        let checker = KafkaHealthChecker::new(&KafkaConfig::new("localhost:9092")).unwrap();
        let result = checker
            .check_async(vec!["bridge-health-missing".to_string()])
            .await;

        assert!(result.broker_count > 0);
        assert!(!result.healthy);
        assert_eq!(result.missing_topics, vec!["bridge-health-missing"]);
    }
}
