//! Kafka Producer
//!
//! 将 `OutboundRecord` 写入 Kafka，记录头原样附带

use std::time::Duration;

use bridge_errors::ClientError;
use bridge_ports::{Ack, OutboundRecord};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use tracing::{debug, warn};

use crate::config::{KafkaConfig, ProducerConfig};
use crate::error::classify;

/// Kafka Producer
pub struct KafkaProducer {
    producer: FutureProducer,
}

impl KafkaProducer {
    pub fn new(config: &KafkaConfig, producer_config: &ProducerConfig) -> Result<Self, ClientError> {
        let mut entries = config.to_client_config_entries();
        entries.extend(producer_config.to_client_config_entries());

        let producer: FutureProducer = crate::config::to_client_config(entries)
            .create()
            .map_err(|e| classify(&e))?;

        Ok(Self { producer })
    }

    /// 入队并等待 broker 确认
    ///
    /// 入队在第一次 poll 时同步完成，按调用顺序 poll 即按调用顺序写入分区。
    pub async fn send(&self, record: OutboundRecord) -> Result<Ack, ClientError> {
        let headers = to_kafka_headers(&record.headers);

        let future_record: FutureRecord<'_, str, [u8]> = FutureRecord {
            topic: &record.topic,
            partition: None,
            key: record.key.as_deref(),
            payload: record.payload.as_deref(),
            timestamp: None,
            headers,
        };

        let delivery = self
            .producer
            .send_result(future_record)
            .map_err(|(e, _)| classify(&e))?;

        match delivery.await {
            Ok(Ok((partition, offset))) => {
                debug!(
                    topic = %record.topic,
                    key = ?record.key,
                    partition,
                    offset,
                    "Record delivered"
                );
                Ok(Ack { partition, offset })
            }
            Ok(Err((e, _))) => Err(classify(&e)),
            Err(_) => Err(ClientError::unreachable("delivery future was canceled")),
        }
    }

    /// 刷新所有待发送的记录
    pub fn flush(&self, timeout: Duration) {
        if let Err(e) = self.producer.flush(Timeout::After(timeout)) {
            warn!(error = %e, "Failed to flush producer");
        }
    }
}

fn to_kafka_headers(headers: &[(String, Vec<u8>)]) -> Option<OwnedHeaders> {
    if headers.is_empty() {
        return None;
    }

    let owned = headers
        .iter()
        .fold(OwnedHeaders::new_with_capacity(headers.len()), |acc, (key, value)| {
            acc.insert(Header {
                key: key.as_str(),
                value: Some(value.as_slice()),
            })
        });
    Some(owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdkafka::message::Headers;

    #[test]
    fn test_headers_keep_order() {
        let headers = vec![
            ("z".to_string(), b"1".to_vec()),
            ("a".to_string(), vec![0u8, 255]),
        ];

        let owned = to_kafka_headers(&headers).unwrap();
        let converted: Vec<(String, Vec<u8>)> = owned
            .iter()
            .map(|h| (h.key.to_string(), h.value.unwrap_or_default().to_vec()))
            .collect();
        assert_eq!(converted, headers);
    }

    #[test]
    fn test_empty_headers() {
        assert!(to_kafka_headers(&[]).is_none());
    }

    #[tokio::test]
    #[ignore] // 需要 Kafka 实例
    async fn test_send() {
        let producer =
            KafkaProducer::new(&KafkaConfig::new("localhost:9092"), &ProducerConfig::default())
                .unwrap();
        let ack = producer
            .send(OutboundRecord {
                topic: "bridge-producer-test".to_string(),
                key: Some("1".to_string()),
                headers: vec![("trace".to_string(), b"abc".to_vec())],
                payload: None,
            })
            .await
            .unwrap();
        assert!(ack.offset >= 0);
    }
}
