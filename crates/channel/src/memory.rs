//! 进程内 broker
//!
//! 实现与 Kafka 客户端相同的契约，用于测试与本地运行：
//! 分区日志、按键哈希分区、按消费组记录已提交 offset、
//! 再均衡计数以及故障注入。
//!
//! 与真实 broker 的差异：同一消费组的每个成员都读取全部分区，
//! 第二个成员加入时只记一次再均衡而不做分区重新分配。

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bridge_errors::ClientError;
use bridge_ports::{
    Ack, BrokerClient, BrokerConsumer, ConsumedRecord, OutboundRecord, RecordHeaders,
    TopicCreation, TopicPartitionOffset, TopicSpec,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

const DEFAULT_MAX_POLL_RECORDS: usize = 500;

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Option<String>,
    headers: RecordHeaders,
    payload: Option<Vec<u8>>,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct GroupState {
    committed: HashMap<(String, i32), i64>,
    members: usize,
    rebalances: u64,
}

#[derive(Debug)]
struct BrokerState {
    topics: HashMap<String, Vec<Vec<StoredRecord>>>,
    groups: HashMap<String, GroupState>,
    round_robin: usize,
    unreachable: bool,
    unauthorized: bool,
    poll_faults: VecDeque<ClientError>,
    max_poll_records: usize,
}

impl Default for BrokerState {
    fn default() -> Self {
        Self {
            topics: HashMap::new(),
            groups: HashMap::new(),
            round_robin: 0,
            unreachable: false,
            unauthorized: false,
            poll_faults: VecDeque::new(),
            max_poll_records: DEFAULT_MAX_POLL_RECORDS,
        }
    }
}

impl BrokerState {
    fn check_access(&self) -> Result<(), ClientError> {
        if self.unreachable {
            return Err(ClientError::unreachable("broker unreachable"));
        }
        if self.unauthorized {
            return Err(ClientError::unauthorized("not authorized"));
        }
        Ok(())
    }

    fn append(&mut self, record: OutboundRecord) -> Ack {
        // 与 broker 默认的 auto.create.topics 一致，未知 topic 以单分区创建
        let partitions = self
            .topics
            .entry(record.topic.clone())
            .or_insert_with(|| vec![Vec::new()]);

        let partition = match &record.key {
            Some(key) => partition_for_key(key, partitions.len()),
            None => {
                let partition = self.round_robin % partitions.len();
                self.round_robin = self.round_robin.wrapping_add(1);
                partition
            }
        };

        let log = &mut partitions[partition];
        log.push(StoredRecord {
            key: record.key,
            headers: record.headers,
            payload: record.payload,
            timestamp: Utc::now(),
        });

        Ack {
            partition: partition as i32,
            offset: log.len() as i64 - 1,
        }
    }
}

/// FNV-1a
fn partition_for_key(key: &str, partitions: usize) -> usize {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in key.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash as usize % partitions.max(1)
}

struct Shared {
    state: Mutex<BrokerState>,
    appended: Notify,
}

/// 进程内 broker，克隆共享同一份状态
#[derive(Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::default()),
                appended: Notify::new(),
            }),
        }
    }

    /// 预先创建 topic
    pub fn with_topic(self, spec: TopicSpec) -> Self {
        self.shared
            .state
            .lock()
            .topics
            .entry(spec.name)
            .or_insert_with(|| vec![Vec::new(); spec.partitions.max(1) as usize]);
        self
    }

    /// 单次 poll 返回的最大记录数
    pub fn with_max_poll_records(self, max: usize) -> Self {
        self.shared.state.lock().max_poll_records = max.max(1);
        self
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.shared.state.lock().unreachable = unreachable;
        self.shared.appended.notify_waiters();
    }

    pub fn set_unauthorized(&self, unauthorized: bool) {
        self.shared.state.lock().unauthorized = unauthorized;
    }

    /// 下一次 poll（任意消费者）返回该错误
    pub fn inject_poll_error(&self, error: ClientError) {
        self.shared.state.lock().poll_faults.push_back(error);
        self.shared.appended.notify_waiters();
    }

    /// 直接写入原始记录，不经过故障注入
    pub fn append(&self, record: OutboundRecord) -> Ack {
        let ack = self.shared.state.lock().append(record);
        self.shared.appended.notify_waiters();
        ack
    }

    pub fn topic_partitions(&self, topic: &str) -> Option<i32> {
        self.shared
            .state
            .lock()
            .topics
            .get(topic)
            .map(|partitions| partitions.len() as i32)
    }

    /// 按分区、offset 顺序返回 topic 中的全部记录
    pub fn records(&self, topic: &str) -> Vec<ConsumedRecord> {
        let state = self.shared.state.lock();
        let Some(partitions) = state.topics.get(topic) else {
            return Vec::new();
        };

        partitions
            .iter()
            .enumerate()
            .flat_map(|(partition, log)| {
                log.iter()
                    .enumerate()
                    .map(move |(offset, stored)| to_consumed(topic, partition as i32, offset as i64, stored))
            })
            .collect()
    }

    pub fn committed_offset(&self, group_id: &str, topic: &str, partition: i32) -> Option<i64> {
        self.shared
            .state
            .lock()
            .groups
            .get(group_id)
            .and_then(|group| group.committed.get(&(topic.to_string(), partition)).copied())
    }

    /// 消费组经历的再均衡次数
    pub fn rebalance_count(&self, group_id: &str) -> u64 {
        self.shared
            .state
            .lock()
            .groups
            .get(group_id)
            .map_or(0, |group| group.rebalances)
    }

    pub fn active_members(&self, group_id: &str) -> usize {
        self.shared
            .state
            .lock()
            .groups
            .get(group_id)
            .map_or(0, |group| group.members)
    }
}

fn to_consumed(topic: &str, partition: i32, offset: i64, stored: &StoredRecord) -> ConsumedRecord {
    ConsumedRecord {
        topic: topic.to_string(),
        partition,
        offset,
        key: stored.key.clone(),
        headers: stored.headers.clone(),
        payload: stored.payload.clone(),
        timestamp: Some(stored.timestamp),
    }
}

#[async_trait]
impl BrokerClient for MemoryBroker {
    async fn create_topic(&self, spec: &TopicSpec) -> Result<TopicCreation, ClientError> {
        let mut state = self.shared.state.lock();
        state.check_access()?;

        if let Some(existing) = state.topics.get(&spec.name) {
            return Ok(TopicCreation::AlreadyExists {
                partitions: Some(existing.len() as i32),
            });
        }

        state
            .topics
            .insert(spec.name.clone(), vec![Vec::new(); spec.partitions.max(1) as usize]);
        debug!(topic = %spec.name, partitions = spec.partitions, "Memory topic created");
        Ok(TopicCreation::Created)
    }

    async fn produce(&self, record: OutboundRecord) -> Result<Ack, ClientError> {
        let ack = {
            let mut state = self.shared.state.lock();
            state.check_access()?;
            state.append(record)
        };
        self.shared.appended.notify_waiters();
        Ok(ack)
    }

    async fn subscribe(
        &self,
        group_id: &str,
        topics: &[String],
    ) -> Result<Box<dyn BrokerConsumer>, ClientError> {
        let mut state = self.shared.state.lock();
        state.check_access()?;

        let group = state.groups.entry(group_id.to_string()).or_default();
        group.members += 1;
        if group.members > 1 {
            group.rebalances += 1;
        }
        let committed = group.committed.clone();

        debug!(group_id, topics = ?topics, "Memory consumer joined group");

        Ok(Box::new(MemoryConsumer {
            broker: self.clone(),
            group_id: group_id.to_string(),
            topics: topics.to_vec(),
            committed,
            positions: HashMap::new(),
            left: false,
        }))
    }
}

/// 进程内消费者
pub struct MemoryConsumer {
    broker: MemoryBroker,
    group_id: String,
    topics: Vec<String>,
    /// 加入消费组时的已提交位置
    committed: HashMap<(String, i32), i64>,
    positions: HashMap<(String, i32), i64>,
    left: bool,
}

impl MemoryConsumer {
    fn fetch(&mut self, state: &BrokerState) -> Vec<ConsumedRecord> {
        let mut records = Vec::new();

        for topic in &self.topics {
            let Some(partitions) = state.topics.get(topic) else {
                continue;
            };
            for (partition, log) in partitions.iter().enumerate() {
                let slot = (topic.clone(), partition as i32);
                // offset reset: earliest
                let position = *self
                    .positions
                    .entry(slot.clone())
                    .or_insert_with(|| self.committed.get(&slot).copied().unwrap_or(0));

                let mut next = position;
                while (next as usize) < log.len() && records.len() < state.max_poll_records {
                    records.push(to_consumed(topic, partition as i32, next, &log[next as usize]));
                    next += 1;
                }
                self.positions.insert(slot, next);
            }
        }

        records
    }

    fn leave(&mut self) {
        if self.left {
            return;
        }
        self.left = true;
        if let Some(group) = self.broker.shared.state.lock().groups.get_mut(&self.group_id) {
            group.members = group.members.saturating_sub(1);
        }
    }
}

#[async_trait]
impl BrokerConsumer for MemoryConsumer {
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<ConsumedRecord>, ClientError> {
        let deadline = Instant::now() + timeout;
        let shared = Arc::clone(&self.broker.shared);

        loop {
            let notified = shared.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = shared.state.lock();
                if let Some(fault) = state.poll_faults.pop_front() {
                    return Err(fault);
                }
                if state.unreachable {
                    return Err(ClientError::unreachable("broker unreachable"));
                }
                let records = self.fetch(&state);
                if !records.is_empty() {
                    return Ok(records);
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn commit(&mut self, offsets: &[TopicPartitionOffset]) -> Result<(), ClientError> {
        let mut state = self.broker.shared.state.lock();
        state.check_access()?;

        let group = state.groups.entry(self.group_id.clone()).or_default();
        for tpo in offsets {
            group
                .committed
                .insert((tpo.topic.clone(), tpo.partition), tpo.offset);
        }
        Ok(())
    }

    async fn close(mut self: Box<Self>) -> Result<(), ClientError> {
        self.leave();
        debug!(group_id = %self.group_id, "Memory consumer left group");
        Ok(())
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        self.leave();
    }
}
