//! 入站通道
//!
//! 广播式通道：每条消息投递给当前所有订阅者。订阅列表写时复制，
//! 投递前对每条消息取一次快照。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bridge_common::{RetryConfig, with_retry};
use parking_lot::RwLock;
use tracing::debug;

use crate::handler::{FnHandler, HandlerError, MessageHandler};
use crate::message::Message;

/// 订阅 ID
pub type SubscriptionId = u64;

struct Subscriber<T> {
    id: SubscriptionId,
    handler: Arc<dyn MessageHandler<T>>,
}

impl<T> Clone for Subscriber<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            handler: Arc::clone(&self.handler),
        }
    }
}

struct ChannelInner<T> {
    name: String,
    subscribers: RwLock<Arc<Vec<Subscriber<T>>>>,
    next_id: AtomicU64,
}

impl<T> ChannelInner<T> {
    fn remove(&self, id: SubscriptionId) -> bool {
        let mut guard = self.subscribers.write();
        if !guard.iter().any(|s| s.id == id) {
            return false;
        }
        let remaining: Vec<_> = guard.iter().filter(|s| s.id != id).cloned().collect();
        *guard = Arc::new(remaining);
        true
    }
}

/// 部分订阅者投递失败
#[derive(Debug)]
pub struct DeliveryFailure {
    /// 成功投递的订阅者数量
    pub delivered: usize,
    /// 失败的订阅者及原因
    pub failed: Vec<(SubscriptionId, String)>,
}

impl DeliveryFailure {
    pub fn reason(&self) -> String {
        self.failed
            .iter()
            .map(|(id, reason)| format!("subscriber {}: {}", id, reason))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// 入站通道句柄，可廉价克隆
pub struct InboundChannel<T> {
    inner: Arc<ChannelInner<T>>,
}

impl<T> Clone for InboundChannel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> InboundChannel<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                name: name.into(),
                subscribers: RwLock::new(Arc::new(Vec::new())),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// 注册订阅者；之后到达的消息才会投递给它
    pub fn subscribe<H>(&self, handler: H) -> Subscription<T>
    where
        H: MessageHandler<T> + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut guard = self.inner.subscribers.write();
            let mut next = Vec::with_capacity(guard.len() + 1);
            next.extend(guard.iter().cloned());
            next.push(Subscriber {
                id,
                handler: Arc::new(handler),
            });
            *guard = Arc::new(next);
        }

        debug!(channel = %self.inner.name, subscription = id, "Subscriber added");

        Subscription {
            id,
            channel: Arc::downgrade(&self.inner),
        }
    }

    /// 以同步闭包订阅
    pub fn subscribe_fn<F>(&self, f: F) -> Subscription<T>
    where
        F: Fn(&Message<T>) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.subscribe(FnHandler(f))
    }

    /// 取消订阅；返回后不会再收到新的消息
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.inner.remove(id);
        if removed {
            debug!(channel = %self.inner.name, subscription = id, "Subscriber removed");
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// 投递给快照中的每个订阅者，失败的订阅者按 `retry` 重试
    ///
    /// 返回成功投递的订阅者数量
    pub async fn deliver(
        &self,
        message: &Message<T>,
        retry: &RetryConfig,
    ) -> Result<usize, DeliveryFailure> {
        let snapshot = Arc::clone(&*self.inner.subscribers.read());

        let mut delivered = 0;
        let mut failed = Vec::new();

        for subscriber in snapshot.iter() {
            let result = with_retry(retry, "deliver_to_subscriber", || {
                subscriber.handler.handle(message)
            })
            .await;

            match result {
                Ok(()) => delivered += 1,
                Err(e) => failed.push((subscriber.id, e.to_string())),
            }
        }

        if failed.is_empty() {
            Ok(delivered)
        } else {
            Err(DeliveryFailure { delivered, failed })
        }
    }
}

/// 订阅句柄
///
/// 丢弃句柄不会取消订阅，需要显式调用 `unsubscribe`。
pub struct Subscription<T> {
    id: SubscriptionId,
    channel: Weak<ChannelInner<T>>,
}

impl<T> Subscription<T> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn unsubscribe(self) -> bool {
        match self.channel.upgrade() {
            Some(inner) => inner.remove(self.id),
            None => false,
        }
    }
}
