//! Broker 客户端 trait 定义

use std::time::Duration;

use async_trait::async_trait;
use bridge_errors::ClientError;

use crate::record::{Ack, ConsumedRecord, OutboundRecord, TopicCreation, TopicPartitionOffset, TopicSpec};

/// Broker 客户端
///
/// 由调用方显式构造后以 `Arc<dyn BrokerClient>` 注入各个适配器。
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// 创建 Topic；已存在时返回 `TopicCreation::AlreadyExists`
    async fn create_topic(&self, spec: &TopicSpec) -> Result<TopicCreation, ClientError>;

    /// 生产一条记录，返回 broker 确认
    async fn produce(&self, record: OutboundRecord) -> Result<Ack, ClientError>;

    /// 以给定消费者组订阅 topics
    async fn subscribe(
        &self,
        group_id: &str,
        topics: &[String],
    ) -> Result<Box<dyn BrokerConsumer>, ClientError>;
}

/// 消费者句柄
#[async_trait]
pub trait BrokerConsumer: Send {
    /// 拉取一批记录，超时后返回空批次
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<ConsumedRecord>, ClientError>;

    /// 提交位点（`offset` 为下一条待消费记录的位置）
    async fn commit(&mut self, offsets: &[TopicPartitionOffset]) -> Result<(), ClientError>;

    /// 离开消费者组并释放资源
    async fn close(self: Box<Self>) -> Result<(), ClientError>;
}
