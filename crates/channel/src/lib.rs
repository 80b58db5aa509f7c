//! bridge-channel - 进程内通道与 broker 之间的桥接
//!
//! 组件（由底向上）：
//! - `TopicProvisioner`：在流量开始前确保 topic 存在
//! - `OutboundAdapter`：出站消息 → broker 记录（键策略、topic 路由、批量发布）
//! - `InboundAdapter`：消费循环，broker 记录 → 入站通道的订阅者
//! - `Bridge`：出站通道与入站通道的门面
//! - `ListenerRegistrar`：运行期追加独立消费组的监听器
//!
//! `MemoryBroker` 以进程内方式实现同一套 broker 客户端契约。

mod bridge;
mod channel;
mod codec;
mod handler;
mod inbound;
mod key;
mod memory;
mod message;
mod metrics;
mod outbound;
mod provisioner;
mod registrar;

pub use bridge::*;
pub use channel::*;
pub use codec::{JsonCodec, PayloadCodec};
pub use handler::*;
pub use inbound::*;
pub use key::*;
pub use memory::*;
pub use message::*;
pub use outbound::*;
pub use provisioner::*;
pub use registrar::*;

pub use bridge_errors::{BridgeError, BridgeResult, ClientError, ClientErrorKind};
pub use bridge_ports::{BrokerClient, BrokerConsumer, TopicSpec};

use serde::Serialize;
use serde::de::DeserializeOwned;

/// 可经过桥接传输的负载类型
pub trait BridgePayload: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> BridgePayload for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}
