//! 入站适配器
//!
//! 每个适配器由一个 tokio 任务驱动消费循环：
//!
//! ```text
//! Stopped → Starting → Polling → Stopping → Stopped
//!              ↘          ↘
//!               Failed ←───┘
//! ```
//!
//! 每批记录全部投递给当前订阅者后才提交 offset（至少一次）。
//! 单条记录失败（无法解码、订阅者重试耗尽）只上报 `Consume` 错误并跳过；
//! 瞬时拉取错误在 Polling 状态内退避重试；不可恢复错误进入 Failed。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bridge_common::RetryConfig;
use bridge_errors::{BridgeError, BridgeResult, ClientError};
use bridge_ports::{BrokerClient, BrokerConsumer, ConsumedRecord, TopicPartitionOffset};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::channel::InboundChannel;
use crate::codec::{PayloadCodec, decode_payload};
use crate::handler::{ErrorHandler, logging_error_handler};
use crate::message::{Headers, Message, RecordMetadata};
use crate::metrics;

/// 适配器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterState {
    Stopped,
    /// 正在加入消费组
    Starting,
    Polling,
    /// 正在完成当前批次并提交
    Stopping,
    /// 不可恢复错误，需要重新 `start`
    Failed,
}

impl AdapterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterState::Stopped => "stopped",
            AdapterState::Starting => "starting",
            AdapterState::Polling => "polling",
            AdapterState::Stopping => "stopping",
            AdapterState::Failed => "failed",
        }
    }
}

/// 消费者选项
#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    /// 单次拉取的最长等待时间
    pub poll_timeout: Duration,
    /// 加入消费组与瞬时拉取错误的退避策略
    pub fetch_backoff: RetryConfig,
    /// 订阅者失败时的重试策略
    pub delivery_retry: RetryConfig,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(100),
            fetch_backoff: RetryConfig::new(
                u32::MAX,
                Duration::from_millis(100),
                Duration::from_secs(10),
            ),
            delivery_retry: RetryConfig::default(),
        }
    }
}

struct RunningLoop {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// 入站适配器
pub struct InboundAdapter<T> {
    group_id: String,
    topics: Vec<String>,
    client: Arc<dyn BrokerClient>,
    channel: InboundChannel<T>,
    codec: Arc<dyn PayloadCodec<T>>,
    options: ConsumerOptions,
    on_error: ErrorHandler,
    state: Arc<watch::Sender<AdapterState>>,
    running: Mutex<Option<RunningLoop>>,
}

impl<T: Send + Sync + 'static> InboundAdapter<T> {
    pub fn new(
        group_id: impl Into<String>,
        topics: Vec<String>,
        client: Arc<dyn BrokerClient>,
        channel: InboundChannel<T>,
        codec: Arc<dyn PayloadCodec<T>>,
    ) -> Self {
        let (state, _) = watch::channel(AdapterState::Stopped);
        Self {
            group_id: group_id.into(),
            topics,
            client,
            channel,
            codec,
            options: ConsumerOptions::default(),
            on_error: logging_error_handler(),
            state: Arc::new(state),
            running: Mutex::new(None),
        }
    }

    pub fn with_options(mut self, options: ConsumerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_error_handler(mut self, on_error: ErrorHandler) -> Self {
        self.on_error = on_error;
        self
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    pub fn state(&self) -> AdapterState {
        *self.state.borrow()
    }

    /// 订阅状态变化
    pub fn state_changes(&self) -> watch::Receiver<AdapterState> {
        self.state.subscribe()
    }

    /// 等待进入指定状态
    pub async fn wait_for_state(&self, target: AdapterState) {
        let mut rx = self.state.subscribe();
        // 发送端由适配器持有，不会关闭
        let _ = rx.wait_for(|state| *state == target).await;
    }

    /// 启动消费循环，只能从 Stopped 或 Failed 启动
    pub fn start(&self) -> BridgeResult<()> {
        let mut running = self.running.lock();

        let current = self.state();
        if !matches!(current, AdapterState::Stopped | AdapterState::Failed) {
            return Err(BridgeError::invalid_state(format!(
                "cannot start consumer {} while {}",
                self.group_id,
                current.as_str()
            )));
        }

        self.state.send_replace(AdapterState::Starting);
        info!(group_id = %self.group_id, topics = ?self.topics, "Starting inbound adapter");

        let cancel = CancellationToken::new();
        let poll_loop = PollLoop {
            group_id: self.group_id.clone(),
            topics: self.topics.clone(),
            client: Arc::clone(&self.client),
            channel: self.channel.clone(),
            codec: Arc::clone(&self.codec),
            options: self.options.clone(),
            on_error: Arc::clone(&self.on_error),
            state: Arc::clone(&self.state),
        };
        let task = tokio::spawn(poll_loop.run(cancel.clone()));

        *running = Some(RunningLoop { cancel, task });
        Ok(())
    }

    /// 停止消费循环：完成当前批次、提交 offset、关闭消费者
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        let Some(running) = running else {
            return;
        };

        transition(
            &self.state,
            &[AdapterState::Starting, AdapterState::Polling],
            AdapterState::Stopping,
        );
        running.cancel.cancel();

        if let Err(e) = running.task.await {
            error!(group_id = %self.group_id, error = %e, "Inbound adapter task failed");
            self.state.send_replace(AdapterState::Failed);
        }
    }
}

/// 仅当当前状态在 `from` 中时切换
fn transition(state: &watch::Sender<AdapterState>, from: &[AdapterState], to: AdapterState) -> bool {
    state.send_if_modified(|current| {
        if from.contains(current) {
            *current = to;
            true
        } else {
            false
        }
    })
}

struct PollLoop<T> {
    group_id: String,
    topics: Vec<String>,
    client: Arc<dyn BrokerClient>,
    channel: InboundChannel<T>,
    codec: Arc<dyn PayloadCodec<T>>,
    options: ConsumerOptions,
    on_error: ErrorHandler,
    state: Arc<watch::Sender<AdapterState>>,
}

impl<T: Send + Sync + 'static> PollLoop<T> {
    async fn run(self, cancel: CancellationToken) {
        match self.consume(&cancel).await {
            Ok(()) => {
                self.state.send_replace(AdapterState::Stopped);
                info!(group_id = %self.group_id, "Inbound adapter stopped");
            }
            Err(source) => {
                let err = BridgeError::fatal_consumer(&self.group_id, source);
                metrics::record_bridge_error(err.kind());
                (self.on_error)(&err);
                self.state.send_replace(AdapterState::Failed);
            }
        }
    }

    async fn consume(&self, cancel: &CancellationToken) -> Result<(), ClientError> {
        let Some(mut consumer) = self.join(cancel).await? else {
            return Ok(());
        };

        if transition(&self.state, &[AdapterState::Starting], AdapterState::Polling) {
            info!(group_id = %self.group_id, topics = ?self.topics, "Consumer joined group, polling");
        }

        let mut pending = BTreeMap::new();
        let outcome = self.poll_until_cancelled(consumer.as_mut(), &mut pending, cancel).await;

        match outcome {
            Ok(()) => {
                transition(
                    &self.state,
                    &[AdapterState::Starting, AdapterState::Polling],
                    AdapterState::Stopping,
                );
                let committed = self.commit(consumer.as_mut(), &mut pending).await;
                if let Err(e) = consumer.close().await {
                    warn!(group_id = %self.group_id, error = %e, "Failed to close consumer");
                }
                committed
            }
            Err(e) => {
                if let Err(close_err) = consumer.close().await {
                    debug!(group_id = %self.group_id, error = %close_err, "Failed to close consumer");
                }
                Err(e)
            }
        }
    }

    /// 加入消费组，瞬时错误退避重试；取消时返回 None
    async fn join(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<Box<dyn BrokerConsumer>>, ClientError> {
        let mut backoff = self.options.fetch_backoff.backoff();

        loop {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(None),
                joined = self.client.subscribe(&self.group_id, &self.topics) => joined,
            };

            match joined {
                Ok(consumer) => return Ok(Some(consumer)),
                Err(e) if e.is_transient() => {
                    let delay = backoff.next_delay();
                    warn!(
                        group_id = %self.group_id,
                        error = %e,
                        attempt = backoff.failures(),
                        delay_ms = delay.as_millis() as u64,
                        "Failed to join consumer group, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Ok(None),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn poll_until_cancelled(
        &self,
        consumer: &mut dyn BrokerConsumer,
        pending: &mut BTreeMap<(String, i32), i64>,
        cancel: &CancellationToken,
    ) -> Result<(), ClientError> {
        let mut backoff = self.options.fetch_backoff.backoff();

        loop {
            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                polled = consumer.poll(self.options.poll_timeout) => polled,
            };

            match polled {
                Ok(records) => {
                    backoff.reset();
                    if records.is_empty() {
                        continue;
                    }
                    for record in records {
                        let position = record.next_position();
                        self.dispatch(record).await;
                        pending
                            .entry((position.topic, position.partition))
                            .and_modify(|offset| *offset = (*offset).max(position.offset))
                            .or_insert(position.offset);
                    }
                    self.commit(consumer, pending).await?;
                }
                Err(e) if e.is_transient() => {
                    let delay = backoff.next_delay();
                    warn!(
                        group_id = %self.group_id,
                        error = %e,
                        attempt = backoff.failures(),
                        delay_ms = delay.as_millis() as u64,
                        "Transient poll failure, backing off"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    error!(group_id = %self.group_id, error = %e, "Fatal poll failure");
                    return Err(e);
                }
            }
        }
    }

    /// 解码并投递单条记录；失败的记录上报后跳过
    async fn dispatch(&self, record: ConsumedRecord) {
        let ConsumedRecord {
            topic,
            partition,
            offset,
            key,
            headers,
            payload,
            timestamp,
        } = record;

        metrics::record_consumed(&self.group_id, &topic);

        let payload = match decode_payload(self.codec.as_ref(), payload.as_deref()) {
            Ok(payload) => payload,
            Err(reason) => {
                self.skip(&topic, partition, offset, reason, "decode");
                return;
            }
        };

        let mut message = Message::from_payload(payload)
            .with_headers(Headers::from(headers))
            .with_metadata(RecordMetadata {
                topic: topic.clone(),
                partition,
                offset,
                timestamp,
            });
        message.key = key;

        match self
            .channel
            .deliver(&message, &self.options.delivery_retry)
            .await
        {
            Ok(0) => {
                debug!(
                    group_id = %self.group_id,
                    topic = %topic,
                    partition,
                    offset,
                    "No subscribers, record dropped"
                );
            }
            Ok(delivered) => {
                metrics::record_deliveries(&self.group_id, delivered);
                debug!(
                    group_id = %self.group_id,
                    topic = %topic,
                    partition,
                    offset,
                    subscribers = delivered,
                    "Record delivered"
                );
            }
            Err(failure) => {
                metrics::record_deliveries(&self.group_id, failure.delivered);
                self.skip(&topic, partition, offset, failure.reason(), "subscriber");
            }
        }
    }

    fn skip(&self, topic: &str, partition: i32, offset: i64, reason: String, cause: &'static str) {
        metrics::record_skipped(&self.group_id, topic, cause);
        let err = BridgeError::consume(topic, partition, offset, reason);
        metrics::record_bridge_error(err.kind());
        (self.on_error)(&err);
    }

    /// 提交已处理的位置；瞬时失败保留待下次提交
    async fn commit(
        &self,
        consumer: &mut dyn BrokerConsumer,
        pending: &mut BTreeMap<(String, i32), i64>,
    ) -> Result<(), ClientError> {
        if pending.is_empty() {
            return Ok(());
        }

        let offsets: Vec<TopicPartitionOffset> = pending
            .iter()
            .map(|((topic, partition), offset)| TopicPartitionOffset {
                topic: topic.clone(),
                partition: *partition,
                offset: *offset,
            })
            .collect();

        match consumer.commit(&offsets).await {
            Ok(()) => {
                debug!(group_id = %self.group_id, offsets = ?offsets, "Offsets committed");
                pending.clear();
                Ok(())
            }
            Err(e) if e.is_transient() => {
                warn!(
                    group_id = %self.group_id,
                    error = %e,
                    "Offset commit failed, will retry with the next batch"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bridge_errors::ClientError;
    use bridge_ports::{OutboundRecord, TopicSpec};
    use serde::{Deserialize, Serialize};
    use tokio::time::timeout;

    use crate::codec::JsonCodec;
    use crate::memory::MemoryBroker;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Foo {
        id: i32,
        name: String,
    }

    fn record(topic: &str, payload: &[u8]) -> OutboundRecord {
        OutboundRecord {
            topic: topic.to_string(),
            key: Some("1".to_string()),
            headers: Vec::new(),
            payload: Some(payload.to_vec()),
        }
    }

    fn fast_options() -> ConsumerOptions {
        ConsumerOptions {
            poll_timeout: Duration::from_millis(20),
            fetch_backoff: RetryConfig::new(u32::MAX, Duration::from_millis(5), Duration::from_millis(20)),
            delivery_retry: RetryConfig::no_retry(),
        }
    }

    fn adapter(broker: &MemoryBroker, channel: &InboundChannel<Foo>) -> InboundAdapter<Foo> {
        InboundAdapter::new(
            "group",
            vec!["orders".to_string()],
            Arc::new(broker.clone()),
            channel.clone(),
            Arc::new(JsonCodec),
        )
        .with_options(fast_options())
    }

    async fn wait(adapter: &InboundAdapter<Foo>, state: AdapterState) {
        timeout(Duration::from_secs(5), adapter.wait_for_state(state))
            .await
            .expect("state not reached");
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let broker = MemoryBroker::new().with_topic(TopicSpec::new("orders", 1, 1));
        let channel = InboundChannel::new("inbound");
        let adapter = adapter(&broker, &channel);

        assert_eq!(adapter.state(), AdapterState::Stopped);
        adapter.start().unwrap();
        wait(&adapter, AdapterState::Polling).await;

        // Polling 状态下重复启动是非法的
        assert!(matches!(adapter.start(), Err(BridgeError::InvalidState(_))));

        adapter.stop().await;
        assert_eq!(adapter.state(), AdapterState::Stopped);

        adapter.start().unwrap();
        wait(&adapter, AdapterState::Polling).await;
        adapter.stop().await;
        assert_eq!(adapter.state(), AdapterState::Stopped);
    }

    #[tokio::test]
    async fn test_commit_after_delivery() {
        let broker = MemoryBroker::new().with_topic(TopicSpec::new("orders", 1, 1));
        let channel = InboundChannel::new("inbound");
        let received = Arc::new(AtomicUsize::new(0));
        {
            let received = received.clone();
            channel.subscribe_fn(move |_| {
                received.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        for i in 0..3 {
            broker.append(record("orders", format!(r#"{{"id":{},"name":"foo"}}"#, i).as_bytes()));
        }

        let adapter = adapter(&broker, &channel);
        adapter.start().unwrap();
        timeout(Duration::from_secs(5), async {
            while broker.committed_offset("group", "orders", 0) != Some(3) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        adapter.stop().await;

        assert_eq!(received.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_transient_poll_errors_stay_in_polling() {
        let broker = MemoryBroker::new().with_topic(TopicSpec::new("orders", 1, 1));
        let channel = InboundChannel::new("inbound");
        let adapter = adapter(&broker, &channel);
        let mut changes = adapter.state_changes();

        adapter.start().unwrap();
        wait(&adapter, AdapterState::Polling).await;
        changes.borrow_and_update();

        broker.inject_poll_error(ClientError::unreachable("broker restarting"));
        broker.inject_poll_error(ClientError::unreachable("broker restarting"));
        broker.append(record("orders", br#"{"id":1,"name":"foo"}"#));

        timeout(Duration::from_secs(5), async {
            while broker.committed_offset("group", "orders", 0) != Some(1) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert!(!changes.has_changed().unwrap());
        assert_eq!(adapter.state(), AdapterState::Polling);
        adapter.stop().await;
    }

    #[tokio::test]
    async fn test_fatal_poll_error_fails_adapter() {
        let broker = MemoryBroker::new().with_topic(TopicSpec::new("orders", 1, 1));
        let channel = InboundChannel::new("inbound");
        let errors = Arc::new(Mutex::new(Vec::new()));
        let on_error: ErrorHandler = {
            let errors = errors.clone();
            Arc::new(move |err: &BridgeError| errors.lock().push(err.clone()))
        };
        let adapter = adapter(&broker, &channel).with_error_handler(on_error);

        adapter.start().unwrap();
        wait(&adapter, AdapterState::Polling).await;
        broker.inject_poll_error(ClientError::unauthorized("GROUP_AUTHORIZATION_FAILED"));
        wait(&adapter, AdapterState::Failed).await;

        {
            let errors = errors.lock();
            assert_eq!(errors.len(), 1);
            assert!(matches!(&errors[0], BridgeError::FatalConsumer { group_id, .. } if group_id == "group"));
        }

        // Failed 之后可以重新启动
        adapter.start().unwrap();
        wait(&adapter, AdapterState::Polling).await;
        adapter.stop().await;
        assert_eq!(broker.active_members("group"), 0);
    }

    #[tokio::test]
    async fn test_unauthorized_join_fails_adapter() {
        let broker = MemoryBroker::new().with_topic(TopicSpec::new("orders", 1, 1));
        broker.set_unauthorized(true);
        let channel = InboundChannel::new("inbound");
        let adapter = adapter(&broker, &channel);

        adapter.start().unwrap();
        wait(&adapter, AdapterState::Failed).await;
    }

    #[tokio::test]
    async fn test_stop_while_broker_unreachable() {
        let broker = MemoryBroker::new().with_topic(TopicSpec::new("orders", 1, 1));
        broker.set_unreachable(true);
        let channel = InboundChannel::new("inbound");
        let adapter = adapter(&broker, &channel);

        adapter.start().unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(adapter.state(), AdapterState::Starting);

        adapter.stop().await;
        assert_eq!(adapter.state(), AdapterState::Stopped);
    }

    #[tokio::test]
    async fn test_metadata_is_not_part_of_headers() {
        let broker = MemoryBroker::new().with_topic(TopicSpec::new("orders", 1, 1));
        let channel = InboundChannel::new("inbound");
        let seen = Arc::new(Mutex::new(None));
        {
            let seen = seen.clone();
            channel.subscribe_fn(move |m: &Message<Foo>| {
                *seen.lock() = Some(m.clone());
                Ok(())
            });
        }
        let mut raw = record("orders", br#"{"id":7,"name":"foo7"}"#);
        raw.headers = vec![("trace-id".to_string(), b"abc".to_vec())];
        broker.append(raw);

        let adapter = adapter(&broker, &channel);
        adapter.start().unwrap();
        timeout(Duration::from_secs(5), async {
            while seen.lock().is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        adapter.stop().await;

        let message = seen.lock().take().unwrap();
        assert_eq!(message.headers.len(), 1);
        assert_eq!(message.headers.get_str("trace-id"), Some("abc"));
        assert_eq!(message.key.as_deref(), Some("1"));
        let metadata = message.metadata.unwrap();
        assert_eq!((metadata.topic.as_str(), metadata.partition, metadata.offset), ("orders", 0, 0));
    }
}
