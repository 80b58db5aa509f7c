//! Broker 记录与 Topic 描述

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// 记录头：有序的 (key, value) 列表
pub type RecordHeaders = Vec<(String, Vec<u8>)>;

/// 清理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupPolicy {
    Delete,
    Compact,
    CompactDelete,
}

impl CleanupPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupPolicy::Delete => "delete",
            CleanupPolicy::Compact => "compact",
            CleanupPolicy::CompactDelete => "compact,delete",
        }
    }
}

/// Topic 描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSpec {
    /// Topic 名称
    pub name: String,
    /// 分区数量
    pub partitions: i32,
    /// 副本因子
    pub replication_factor: i32,
    /// Topic 级别配置
    pub config: BTreeMap<String, String>,
}

impl TopicSpec {
    pub fn new(name: impl Into<String>, partitions: i32, replication_factor: i32) -> Self {
        Self {
            name: name.into(),
            partitions,
            replication_factor,
            config: BTreeMap::new(),
        }
    }

    /// 设置保留时间（毫秒）
    pub fn with_retention_ms(self, ms: i64) -> Self {
        self.with_config("retention.ms", ms.to_string())
    }

    pub fn with_cleanup_policy(self, policy: CleanupPolicy) -> Self {
        self.with_config("cleanup.policy", policy.as_str())
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// 校验分区数与副本因子
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("topic name must not be empty".to_string());
        }
        if self.partitions < 1 {
            return Err(format!("partitions must be >= 1, got {}", self.partitions));
        }
        if self.replication_factor < 1 {
            return Err(format!(
                "replication factor must be >= 1, got {}",
                self.replication_factor
            ));
        }
        Ok(())
    }
}

/// Topic 创建结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicCreation {
    Created,
    /// 已存在；`partitions` 为现有分区数（未知时为 None）
    AlreadyExists { partitions: Option<i32> },
}

/// 待生产的记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRecord {
    pub topic: String,
    pub key: Option<String>,
    pub headers: RecordHeaders,
    /// None 表示无负载（tombstone）
    pub payload: Option<Vec<u8>>,
}

/// 生产确认
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub partition: i32,
    pub offset: i64,
}

/// 拉取到的记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub headers: RecordHeaders,
    pub payload: Option<Vec<u8>>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl ConsumedRecord {
    /// 处理完成后应提交的位点
    pub fn next_position(&self) -> TopicPartitionOffset {
        TopicPartitionOffset {
            topic: self.topic.clone(),
            partition: self.partition,
            offset: self.offset + 1,
        }
    }
}

/// 分区位点
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartitionOffset {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}
