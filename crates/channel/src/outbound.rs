//! 出站适配器
//!
//! 把进程内消息转换成 broker 记录并批量发布：
//! - 按键策略计算分区键，策略无结果时使用消息自带的键
//! - 有界发送缓冲区，满时 `send` 等待至超时
//! - 记录在 linger 时间或批大小触发时一起交给客户端，严格保持提交顺序
//! - 发布失败只通过错误回调上报

use std::sync::Arc;
use std::time::Duration;

use bridge_errors::{BridgeError, BridgeResult};
use bridge_ports::{BrokerClient, OutboundRecord};
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::BridgePayload;
use crate::codec::{PayloadCodec, encode_payload};
use crate::handler::ErrorHandler;
use crate::key::KeyStrategy;
use crate::message::{Message, TOPIC_HEADER};
use crate::metrics;

/// 生产者选项
#[derive(Debug, Clone)]
pub struct ProducerOptions {
    /// 批次最长等待时间
    pub linger: Duration,
    /// 单批最大记录数
    pub batch_size: usize,
    /// 发送缓冲区容量
    pub buffer_capacity: usize,
    /// 缓冲区满时 `send` 的最长等待时间
    pub send_timeout: Duration,
}

impl Default for ProducerOptions {
    fn default() -> Self {
        Self {
            linger: Duration::from_millis(1),
            batch_size: 500,
            buffer_capacity: 1024,
            send_timeout: Duration::from_secs(5),
        }
    }
}

/// 出站适配器
pub struct OutboundAdapter<T> {
    codec: Arc<dyn PayloadCodec<T>>,
    key_strategy: Option<KeyStrategy<T>>,
    send_timeout: Duration,
    tx: mpsc::Sender<OutboundRecord>,
    shutdown: CancellationToken,
    batcher: Mutex<Option<JoinHandle<()>>>,
}

impl<T: BridgePayload> OutboundAdapter<T> {
    /// 创建适配器并启动批处理任务（需要在 tokio 运行时内调用）
    pub fn new(
        client: Arc<dyn BrokerClient>,
        codec: Arc<dyn PayloadCodec<T>>,
        key_strategy: Option<KeyStrategy<T>>,
        options: ProducerOptions,
        on_error: ErrorHandler,
    ) -> Self {
        let (tx, rx) = mpsc::channel(options.buffer_capacity.max(1));
        let shutdown = CancellationToken::new();

        let batcher = Batcher {
            client,
            on_error,
            linger: options.linger,
            batch_size: options.batch_size.max(1),
        };
        let handle = tokio::spawn(batcher.run(rx, shutdown.clone()));

        Self {
            codec,
            key_strategy,
            send_timeout: options.send_timeout,
            tx,
            shutdown,
            batcher: Mutex::new(Some(handle)),
        }
    }

    /// 发布消息到指定 topic
    ///
    /// 返回 Ok 只表示记录已进入发送缓冲区，投递结果异步上报。
    pub async fn send(&self, message: Message<T>, topic: &str) -> BridgeResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(BridgeError::Closed);
        }

        let record = self.to_record(message, topic)?;

        match self.tx.send_timeout(record, self.send_timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(record)) => {
                warn!(
                    topic = %record.topic,
                    timeout_ms = self.send_timeout.as_millis() as u64,
                    "Send buffer full, record rejected"
                );
                metrics::record_bridge_error("backpressure_timeout");
                Err(BridgeError::BackpressureTimeout(self.send_timeout))
            }
            Err(SendTimeoutError::Closed(_)) => Err(BridgeError::Closed),
        }
    }

    fn to_record(&self, message: Message<T>, topic: &str) -> BridgeResult<OutboundRecord> {
        let payload = encode_payload(self.codec.as_ref(), &message.payload)?;
        let derived = self
            .key_strategy
            .as_ref()
            .and_then(|strategy| strategy.derive_key(&message));

        Ok(OutboundRecord {
            topic: topic.to_string(),
            key: derived.or(message.key),
            headers: message.headers.into_record_headers(),
            payload,
        })
    }

    /// 停止接收新消息，发布所有已接受的记录后返回
    pub async fn close(&self) {
        self.shutdown.cancel();

        let handle = self.batcher.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Outbound batcher task failed");
            }
            info!("Outbound adapter closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

struct Batcher {
    client: Arc<dyn BrokerClient>,
    on_error: ErrorHandler,
    linger: Duration,
    batch_size: usize,
}

impl Batcher {
    async fn run(self, mut rx: mpsc::Receiver<OutboundRecord>, shutdown: CancellationToken) {
        let mut closing = false;
        let mut batch = Vec::with_capacity(self.batch_size);

        loop {
            let first = tokio::select! {
                biased;
                _ = shutdown.cancelled(), if !closing => {
                    // 不再接收新记录，缓冲区中的记录继续发布
                    rx.close();
                    closing = true;
                    continue;
                }
                record = rx.recv() => record,
            };

            let Some(first) = first else {
                break;
            };
            batch.push(first);

            let deadline = Instant::now() + self.linger;
            while batch.len() < self.batch_size {
                match tokio::time::timeout_at(deadline, rx.recv()).await {
                    Ok(Some(record)) => batch.push(record),
                    Ok(None) | Err(_) => break,
                }
            }

            self.publish(std::mem::take(&mut batch)).await;
        }

        debug!("Outbound batcher stopped");
    }

    /// 按提交顺序把整批交给客户端，等待全部投递结果
    async fn publish(&self, batch: Vec<OutboundRecord>) {
        metrics::record_publish_batch(batch.len());

        let sends = batch.into_iter().map(|record| {
            let topic = record.topic.clone();
            let key = record.key.clone();
            let client = Arc::clone(&self.client);
            async move { (topic, key, client.produce(record).await) }
        });

        for (topic, key, result) in join_all(sends).await {
            match result {
                Ok(ack) => {
                    debug!(
                        topic = %topic,
                        key = ?key,
                        partition = ack.partition,
                        offset = ack.offset,
                        "Record published"
                    );
                    metrics::record_published(&topic, true);
                }
                Err(source) => {
                    metrics::record_published(&topic, false);
                    let err = BridgeError::publish(topic, key, source);
                    metrics::record_bridge_error(err.kind());
                    (self.on_error)(&err);
                }
            }
        }
    }
}

/// 出站通道句柄，可廉价克隆
pub struct OutboundChannel<T> {
    adapter: Arc<OutboundAdapter<T>>,
    default_topic: Arc<str>,
}

impl<T> Clone for OutboundChannel<T> {
    fn clone(&self) -> Self {
        Self {
            adapter: Arc::clone(&self.adapter),
            default_topic: Arc::clone(&self.default_topic),
        }
    }
}

impl<T: BridgePayload> OutboundChannel<T> {
    pub(crate) fn new(adapter: Arc<OutboundAdapter<T>>, default_topic: impl Into<Arc<str>>) -> Self {
        Self {
            adapter,
            default_topic: default_topic.into(),
        }
    }

    /// 发送到 `kafka_topic` 头指定的 topic，没有该头时发送到绑定的出站 topic
    pub async fn send(&self, message: Message<T>) -> BridgeResult<()> {
        let topic = match message.headers.get_str(TOPIC_HEADER) {
            Some(topic) => topic.to_string(),
            None => self.default_topic.to_string(),
        };
        self.adapter.send(message, &topic).await
    }

    pub async fn send_to(&self, message: Message<T>, topic: &str) -> BridgeResult<()> {
        self.adapter.send(message, topic).await
    }

    pub fn default_topic(&self) -> &str {
        &self.default_topic
    }
}
