//! Kafka Consumer
//!
//! 每个 `KafkaConsumer` 对应一个消费者组成员；自动提交关闭，位点由调用方显式提交。
//! 提交为同步提交，返回时 broker 已确认位点。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bridge_errors::ClientError;
use bridge_ports::{BrokerConsumer, ConsumedRecord, RecordHeaders, TopicPartitionOffset};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use rdkafka::{Offset, TopicPartitionList};
use tracing::{debug, info, warn};

use crate::config::{ConsumerConfig, KafkaConfig, to_client_config};
use crate::error::classify;

/// Kafka 消费者组成员
pub struct KafkaConsumer {
    consumer: Arc<StreamConsumer>,
    group_id: String,
    max_poll_records: usize,
    /// 批量拉取中途遇到的错误，留到下一次 poll 返回
    deferred: Option<ClientError>,
}

impl KafkaConsumer {
    /// 创建消费者并订阅 topics
    pub fn new(
        config: &KafkaConfig,
        consumer_config: &ConsumerConfig,
        group_id: &str,
        topics: &[String],
    ) -> Result<Self, ClientError> {
        let mut entries = config.to_client_config_entries();
        entries.extend(consumer_config.to_client_config_entries(group_id));

        let consumer: StreamConsumer = to_client_config(entries)
            .create()
            .map_err(|e| classify(&e))?;

        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer.subscribe(&topic_refs).map_err(|e| classify(&e))?;

        info!(group_id = %group_id, topics = ?topics, "Kafka consumer subscribed");

        Ok(Self {
            consumer: Arc::new(consumer),
            group_id: group_id.to_string(),
            max_poll_records: consumer_config.max_poll_records.max(1),
            deferred: None,
        })
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }
}

#[async_trait]
impl BrokerConsumer for KafkaConsumer {
    /// 等待第一条记录（最多 `timeout`），随后取走已就绪的记录直到批次上限
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<ConsumedRecord>, ClientError> {
        if let Some(err) = self.deferred.take() {
            return Err(err);
        }

        let first = match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => return Ok(Vec::new()),
            Ok(Err(e)) => return Err(classify(&e)),
            Ok(Ok(message)) => to_consumed_record(&message),
        };

        let mut records = vec![first];
        while records.len() < self.max_poll_records {
            match self.consumer.recv().now_or_never() {
                Some(Ok(message)) => records.push(to_consumed_record(&message)),
                Some(Err(e)) => {
                    self.deferred = Some(classify(&e));
                    break;
                }
                None => break,
            }
        }

        Ok(records)
    }

    async fn commit(&mut self, offsets: &[TopicPartitionOffset]) -> Result<(), ClientError> {
        if offsets.is_empty() {
            return Ok(());
        }

        let mut list = TopicPartitionList::new();
        for position in offsets {
            list.add_partition_offset(
                &position.topic,
                position.partition,
                Offset::Offset(position.offset),
            )
            .map_err(|e| classify(&e))?;
        }

        let consumer = self.consumer.clone();
        tokio::task::spawn_blocking(move || consumer.commit(&list, CommitMode::Sync))
            .await
            .map_err(|e| ClientError::fatal(format!("commit task failed: {}", e)))?
            .map_err(|e| classify(&e))?;

        debug!(group_id = %self.group_id, positions = offsets.len(), "Offsets committed");
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), ClientError> {
        self.consumer.unsubscribe();
        info!(group_id = %self.group_id, "Kafka consumer closed");
        Ok(())
    }
}

fn to_consumed_record(message: &BorrowedMessage<'_>) -> ConsumedRecord {
    let key = message.key().map(|k| match std::str::from_utf8(k) {
        Ok(key) => key.to_string(),
        Err(_) => {
            warn!(
                topic = message.topic(),
                offset = message.offset(),
                "Record key is not valid UTF-8, decoding lossily"
            );
            String::from_utf8_lossy(k).into_owned()
        }
    });

    ConsumedRecord {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key,
        headers: message.headers().map(to_record_headers).unwrap_or_default(),
        payload: message.payload().map(<[u8]>::to_vec),
        timestamp: message
            .timestamp()
            .to_millis()
            .and_then(DateTime::<Utc>::from_timestamp_millis),
    }
}

/// 空值记录头映射为空字节
fn to_record_headers<H: Headers>(headers: &H) -> RecordHeaders {
    headers
        .iter()
        .map(|header| {
            (
                header.key.to_string(),
                header.value.map(<[u8]>::to_vec).unwrap_or_default(),
            )
        })
        .collect()
}
