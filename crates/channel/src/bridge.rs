//! Bridge 门面
//!
//! 组合一个出站通道与一个入站通道，隐藏适配器的装配细节。

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use bridge_common::RetryConfig;
use bridge_errors::{BridgeError, BridgeResult};
use bridge_ports::{BrokerClient, TopicSpec};
use tracing::info;

use crate::BridgePayload;
use crate::channel::InboundChannel;
use crate::codec::{JsonCodec, PayloadCodec};
use crate::handler::{ErrorHandler, logging_error_handler};
use crate::inbound::{AdapterState, ConsumerOptions, InboundAdapter};
use crate::key::KeyStrategy;
use crate::outbound::{OutboundAdapter, OutboundChannel, ProducerOptions};
use crate::provisioner::TopicProvisioner;
use crate::registrar::ListenerRegistrar;

/// 通道与 broker 的绑定
pub struct ChannelBinding<T> {
    pub outbound_topic: String,
    pub key_strategy: Option<KeyStrategy<T>>,
    pub consumer_group_id: String,
    pub inbound_topics: BTreeSet<String>,
}

impl<T> Clone for ChannelBinding<T> {
    fn clone(&self) -> Self {
        Self {
            outbound_topic: self.outbound_topic.clone(),
            key_strategy: self.key_strategy.clone(),
            consumer_group_id: self.consumer_group_id.clone(),
            inbound_topics: self.inbound_topics.clone(),
        }
    }
}

impl<T> fmt::Debug for ChannelBinding<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelBinding")
            .field("outbound_topic", &self.outbound_topic)
            .field("key_strategy", &self.key_strategy)
            .field("consumer_group_id", &self.consumer_group_id)
            .field("inbound_topics", &self.inbound_topics)
            .finish()
    }
}

impl<T> ChannelBinding<T> {
    pub fn new(outbound_topic: impl Into<String>, consumer_group_id: impl Into<String>) -> Self {
        Self {
            outbound_topic: outbound_topic.into(),
            key_strategy: None,
            consumer_group_id: consumer_group_id.into(),
            inbound_topics: BTreeSet::new(),
        }
    }

    pub fn with_key_strategy(mut self, strategy: KeyStrategy<T>) -> Self {
        self.key_strategy = Some(strategy);
        self
    }

    pub fn with_inbound_topic(mut self, topic: impl Into<String>) -> Self {
        self.inbound_topics.insert(topic.into());
        self
    }

    fn validate(&self) -> BridgeResult<()> {
        if self.outbound_topic.trim().is_empty() {
            return Err(BridgeError::config("outbound topic must not be empty"));
        }
        if self.consumer_group_id.trim().is_empty() {
            return Err(BridgeError::config("consumer group id must not be empty"));
        }
        if self.inbound_topics.is_empty() {
            return Err(BridgeError::config("at least one inbound topic is required"));
        }
        Ok(())
    }
}

/// Bridge 构建器
pub struct BridgeBuilder<T> {
    client: Arc<dyn BrokerClient>,
    binding: ChannelBinding<T>,
    topics: Vec<TopicSpec>,
    producer: ProducerOptions,
    consumer: ConsumerOptions,
    codec: Arc<dyn PayloadCodec<T>>,
    on_error: ErrorHandler,
    auto_startup: bool,
    provision_retry: RetryConfig,
}

impl<T: BridgePayload> BridgeBuilder<T> {
    /// 启动前需要预置的 topic
    pub fn topic(mut self, spec: TopicSpec) -> Self {
        self.topics.push(spec);
        self
    }

    pub fn topics(mut self, specs: impl IntoIterator<Item = TopicSpec>) -> Self {
        self.topics.extend(specs);
        self
    }

    pub fn producer_options(mut self, options: ProducerOptions) -> Self {
        self.producer = options;
        self
    }

    pub fn consumer_options(mut self, options: ConsumerOptions) -> Self {
        self.consumer = options;
        self
    }

    pub fn codec(mut self, codec: Arc<dyn PayloadCodec<T>>) -> Self {
        self.codec = codec;
        self
    }

    pub fn error_handler(mut self, on_error: ErrorHandler) -> Self {
        self.on_error = on_error;
        self
    }

    /// 为 false 时基础消费者需要调用 `Bridge::start` 启动
    pub fn auto_startup(mut self, auto_startup: bool) -> Self {
        self.auto_startup = auto_startup;
        self
    }

    pub fn provision_retry(mut self, retry: RetryConfig) -> Self {
        self.provision_retry = retry;
        self
    }

    /// 预置 topic 并装配适配器；预置失败时返回 `Provision` 错误
    pub async fn build(self) -> BridgeResult<Bridge<T>> {
        self.binding.validate()?;

        TopicProvisioner::new(Arc::clone(&self.client))
            .with_retry(self.provision_retry)
            .ensure_topics(&self.topics)
            .await?;

        let group_id = self.binding.consumer_group_id.clone();
        let inbound = InboundChannel::new(format!("{}-inbound", group_id));

        let outbound_adapter = Arc::new(OutboundAdapter::new(
            Arc::clone(&self.client),
            Arc::clone(&self.codec),
            self.binding.key_strategy.clone(),
            self.producer,
            Arc::clone(&self.on_error),
        ));
        let outbound = OutboundChannel::new(outbound_adapter.clone(), self.binding.outbound_topic.as_str());

        let consumer = Arc::new(
            InboundAdapter::new(
                group_id.clone(),
                self.binding.inbound_topics.iter().cloned().collect(),
                Arc::clone(&self.client),
                inbound.clone(),
                Arc::clone(&self.codec),
            )
            .with_options(self.consumer.clone())
            .with_error_handler(Arc::clone(&self.on_error)),
        );

        let registrar = ListenerRegistrar::new(
            group_id.clone(),
            Arc::clone(&self.client),
            inbound.clone(),
            Arc::clone(&self.codec),
            self.consumer,
            self.on_error,
        );

        let bridge = Bridge {
            binding: self.binding,
            outbound,
            outbound_adapter,
            inbound,
            consumer,
            registrar,
        };

        if self.auto_startup {
            bridge.start()?;
        }

        info!(
            group_id = %group_id,
            outbound_topic = %bridge.binding.outbound_topic,
            inbound_topics = ?bridge.binding.inbound_topics,
            "Bridge ready"
        );

        Ok(bridge)
    }
}

/// 通道与 broker 之间的桥接
pub struct Bridge<T> {
    binding: ChannelBinding<T>,
    outbound: OutboundChannel<T>,
    outbound_adapter: Arc<OutboundAdapter<T>>,
    inbound: InboundChannel<T>,
    consumer: Arc<InboundAdapter<T>>,
    registrar: ListenerRegistrar<T>,
}

impl<T: BridgePayload> Bridge<T> {
    pub fn builder(client: Arc<dyn BrokerClient>, binding: ChannelBinding<T>) -> BridgeBuilder<T> {
        BridgeBuilder {
            client,
            binding,
            topics: Vec::new(),
            producer: ProducerOptions::default(),
            consumer: ConsumerOptions::default(),
            codec: Arc::new(JsonCodec),
            on_error: logging_error_handler(),
            auto_startup: true,
            provision_retry: RetryConfig::default(),
        }
    }

    pub fn outbound(&self) -> OutboundChannel<T> {
        self.outbound.clone()
    }

    pub fn inbound(&self) -> InboundChannel<T> {
        self.inbound.clone()
    }

    pub fn registrar(&self) -> ListenerRegistrar<T> {
        self.registrar.clone()
    }

    pub fn binding(&self) -> &ChannelBinding<T> {
        &self.binding
    }

    /// 基础消费者
    pub fn consumer(&self) -> &InboundAdapter<T> {
        &self.consumer
    }

    pub fn consumer_state(&self) -> AdapterState {
        self.consumer.state()
    }

    /// 绑定的入站 topic 加上所有动态监听器的 topic
    pub fn inbound_topics(&self) -> BTreeSet<String> {
        let mut topics = self.binding.inbound_topics.clone();
        topics.extend(self.registrar.topics());
        topics
    }

    /// 启动基础消费者
    pub fn start(&self) -> BridgeResult<()> {
        self.consumer.start()
    }

    /// 停止所有消费者并发布完出站缓冲区中的记录
    pub async fn shutdown(&self) {
        info!(group_id = %self.binding.consumer_group_id, "Shutting down bridge");

        self.registrar.deregister_all().await;
        self.consumer.stop().await;
        self.outbound_adapter.close().await;

        info!(group_id = %self.binding.consumer_group_id, "Bridge shut down");
    }
}
