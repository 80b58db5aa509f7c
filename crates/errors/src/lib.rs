//! bridge-errors - 统一错误处理
//!
//! 桥接层的错误分类：
//! - 启动期致命错误（Topic 预置）
//! - 仅通过异步回调上报的错误（发布失败、单条记录消费失败）
//! - 调用方可见的错误（背压超时、重复注册）

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Broker 客户端错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientErrorKind {
    /// Broker 不可达（网络抖动、超时），可重试
    Unreachable,
    /// 认证或授权失败
    Unauthorized,
    /// 记录超过 broker 允许的大小
    RecordTooLarge,
    /// Topic 不存在
    UnknownTopic,
    /// 其他不可恢复错误
    Fatal,
}

impl ClientErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientErrorKind::Unreachable => "unreachable",
            ClientErrorKind::Unauthorized => "unauthorized",
            ClientErrorKind::RecordTooLarge => "record_too_large",
            ClientErrorKind::UnknownTopic => "unknown_topic",
            ClientErrorKind::Fatal => "fatal",
        }
    }
}

impl fmt::Display for ClientErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broker 客户端返回的错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ClientError {
    pub kind: ClientErrorKind,
    pub message: String,
}

impl ClientError {
    pub fn new(kind: ClientErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
        }
    }

    pub fn unreachable(msg: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::Unreachable, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::Unauthorized, msg)
    }

    pub fn record_too_large(msg: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::RecordTooLarge, msg)
    }

    pub fn unknown_topic(msg: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::UnknownTopic, msg)
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::Fatal, msg)
    }

    /// 是否为瞬时错误（可在原状态下退避重试）
    pub fn is_transient(&self) -> bool {
        self.kind == ClientErrorKind::Unreachable
    }
}

/// 桥接层错误类型
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    /// Topic 预置失败，启动期致命
    #[error("Failed to provision topic {topic}: {reason}")]
    Provision { topic: String, reason: String },

    /// 记录发布失败，只通过错误回调上报
    #[error("Failed to publish record to {topic}: {source}")]
    Publish {
        topic: String,
        key: Option<String>,
        #[source]
        source: ClientError,
    },

    /// 发送缓冲区已满且等待超时，调用方可重试
    #[error("Send buffer full, gave up after {0:?}")]
    BackpressureTimeout(Duration),

    /// 单条记录消费失败，记录被跳过，适配器继续运行
    #[error("Failed to consume record {topic}/{partition}@{offset}: {reason}")]
    Consume {
        topic: String,
        partition: i32,
        offset: i64,
        reason: String,
    },

    /// 消费者不可恢复，适配器进入 FAILED，需要外部重启
    #[error("Consumer for group {group_id} failed: {source}")]
    FatalConsumer {
        group_id: String,
        #[source]
        source: ClientError,
    },

    /// 同一个 group 后缀重复注册监听器
    #[error("Listener already registered for group suffix '{0}'")]
    DuplicateRegistration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Outbound channel closed")]
    Closed,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Client(#[from] ClientError),
}

impl BridgeError {
    pub fn provision(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Provision {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    pub fn publish(topic: impl Into<String>, key: Option<String>, source: ClientError) -> Self {
        Self::Publish {
            topic: topic.into(),
            key,
            source,
        }
    }

    pub fn consume(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        reason: impl Into<String>,
    ) -> Self {
        Self::Consume {
            topic: topic.into(),
            partition,
            offset,
            reason: reason.into(),
        }
    }

    pub fn fatal_consumer(group_id: impl Into<String>, source: ClientError) -> Self {
        Self::FatalConsumer {
            group_id: group_id.into(),
            source,
        }
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// 是否需要上抛给宿主进程（启动失败或适配器失效）
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Provision { .. } | Self::FatalConsumer { .. })
    }

    /// 用于 metrics 标签的错误类别
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Provision { .. } => "provision",
            Self::Publish { .. } => "publish",
            Self::BackpressureTimeout(_) => "backpressure_timeout",
            Self::Consume { .. } => "consume",
            Self::FatalConsumer { .. } => "fatal_consumer",
            Self::DuplicateRegistration(_) => "duplicate_registration",
            Self::Serialization(_) => "serialization",
            Self::Config(_) => "config",
            Self::Closed => "closed",
            Self::InvalidState(_) => "invalid_state",
            Self::Client(_) => "client",
        }
    }
}

/// Result 类型别名
pub type BridgeResult<T> = Result<T, BridgeError>;
