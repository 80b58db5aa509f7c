//! 动态监听器注册
//!
//! 运行期为桥接追加独立消费组的入站适配器。新消费组 id 为
//! `base_group_id + suffix`，不会触发基础消费组的再均衡；
//! 所有监听器的输出汇入同一个入站通道。

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bridge_errors::{BridgeError, BridgeResult};
use bridge_ports::BrokerClient;
use parking_lot::Mutex;
use tracing::info;

use crate::channel::InboundChannel;
use crate::codec::PayloadCodec;
use crate::handler::ErrorHandler;
use crate::inbound::{AdapterState, ConsumerOptions, InboundAdapter};
use crate::metrics;

struct RegistrarInner<T> {
    base_group_id: String,
    client: Arc<dyn BrokerClient>,
    channel: InboundChannel<T>,
    codec: Arc<dyn PayloadCodec<T>>,
    options: ConsumerOptions,
    on_error: ErrorHandler,
    listeners: Mutex<BTreeMap<String, Arc<InboundAdapter<T>>>>,
    /// 只在持有 `listeners` 锁时读写
    closed: AtomicBool,
}

impl<T> RegistrarInner<T> {
    /// 仅当登记的仍是同一个适配器时移除
    fn remove(&self, suffix: &str, adapter: &Arc<InboundAdapter<T>>) -> bool {
        let mut listeners = self.listeners.lock();
        let registered = listeners
            .get(suffix)
            .is_some_and(|current| Arc::ptr_eq(current, adapter));
        if registered {
            listeners.remove(suffix);
            metrics::set_registered_listeners(listeners.len());
        }
        registered
    }
}

/// 已注册监听器的快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerInfo {
    pub suffix: String,
    pub group_id: String,
    pub topics: Vec<String>,
    pub state: AdapterState,
}

/// 动态监听器注册器，可廉价克隆
pub struct ListenerRegistrar<T> {
    inner: Arc<RegistrarInner<T>>,
}

impl<T> Clone for ListenerRegistrar<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> ListenerRegistrar<T> {
    pub(crate) fn new(
        base_group_id: impl Into<String>,
        client: Arc<dyn BrokerClient>,
        channel: InboundChannel<T>,
        codec: Arc<dyn PayloadCodec<T>>,
        options: ConsumerOptions,
        on_error: ErrorHandler,
    ) -> Self {
        Self {
            inner: Arc::new(RegistrarInner {
                base_group_id: base_group_id.into(),
                client,
                channel,
                codec,
                options,
                on_error,
                listeners: Mutex::new(BTreeMap::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn base_group_id(&self) -> &str {
        &self.inner.base_group_id
    }

    /// 以 `base_group_id + suffix` 为消费组追加监听器并立即启动
    ///
    /// 空后缀保留给基础消费者；同一后缀在注销前不能重复注册。
    pub fn add_listener<I, S>(&self, topics: I, suffix: &str) -> BridgeResult<RegistrationHandle<T>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if suffix.is_empty() {
            return Err(BridgeError::DuplicateRegistration(suffix.to_string()));
        }

        let topics: Vec<String> = topics
            .into_iter()
            .map(Into::into)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if topics.is_empty() {
            return Err(BridgeError::config(format!(
                "listener '{}' needs at least one topic",
                suffix
            )));
        }

        let mut listeners = self.inner.listeners.lock();
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(BridgeError::Closed);
        }
        if listeners.contains_key(suffix) {
            return Err(BridgeError::DuplicateRegistration(suffix.to_string()));
        }

        let group_id = format!("{}{}", self.inner.base_group_id, suffix);
        let adapter = Arc::new(
            InboundAdapter::new(
                group_id.clone(),
                topics.clone(),
                Arc::clone(&self.inner.client),
                self.inner.channel.clone(),
                Arc::clone(&self.inner.codec),
            )
            .with_options(self.inner.options.clone())
            .with_error_handler(Arc::clone(&self.inner.on_error)),
        );
        adapter.start()?;

        listeners.insert(suffix.to_string(), Arc::clone(&adapter));
        metrics::set_registered_listeners(listeners.len());

        info!(group_id = %group_id, topics = ?topics, "Listener registered");

        Ok(RegistrationHandle {
            suffix: suffix.to_string(),
            adapter,
            registrar: Arc::downgrade(&self.inner),
        })
    }

    pub fn contains(&self, suffix: &str) -> bool {
        self.inner.listeners.lock().contains_key(suffix)
    }

    pub fn listeners(&self) -> Vec<ListenerInfo> {
        self.inner
            .listeners
            .lock()
            .iter()
            .map(|(suffix, adapter)| ListenerInfo {
                suffix: suffix.clone(),
                group_id: adapter.group_id().to_string(),
                topics: adapter.topics().to_vec(),
                state: adapter.state(),
            })
            .collect()
    }

    /// 所有已注册监听器订阅的 topic
    pub fn topics(&self) -> BTreeSet<String> {
        self.inner
            .listeners
            .lock()
            .values()
            .flat_map(|adapter| adapter.topics().iter().cloned())
            .collect()
    }

    /// 停止并移除所有监听器；之后 `add_listener` 返回 `Closed`
    pub async fn deregister_all(&self) {
        let adapters: Vec<_> = {
            let mut listeners = self.inner.listeners.lock();
            self.inner.closed.store(true, Ordering::Release);
            let drained = std::mem::take(&mut *listeners);
            metrics::set_registered_listeners(0);
            drained.into_values().collect()
        };

        for adapter in adapters {
            adapter.stop().await;
            info!(group_id = %adapter.group_id(), "Listener deregistered");
        }
    }
}

/// 监听器注册句柄
///
/// 丢弃句柄不会注销监听器。
pub struct RegistrationHandle<T> {
    suffix: String,
    adapter: Arc<InboundAdapter<T>>,
    registrar: Weak<RegistrarInner<T>>,
}

impl<T: Send + Sync + 'static> RegistrationHandle<T> {
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn group_id(&self) -> &str {
        self.adapter.group_id()
    }

    pub fn topics(&self) -> &[String] {
        self.adapter.topics()
    }

    pub fn state(&self) -> AdapterState {
        self.adapter.state()
    }

    pub async fn wait_for_state(&self, target: AdapterState) {
        self.adapter.wait_for_state(target).await
    }

    /// 停止监听器并移除其 topic；基础消费者不受影响
    pub async fn deregister(self) {
        self.adapter.stop().await;

        if let Some(inner) = self.registrar.upgrade() {
            if inner.remove(&self.suffix, &self.adapter) {
                info!(group_id = %self.adapter.group_id(), "Listener deregistered");
            }
        }
    }
}
