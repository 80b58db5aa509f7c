//! 演示负载与流量

use bridge_channel::{Bridge, BridgeResult, Message, OutboundChannel, Subscription};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Foo {
    pub id: i32,
    pub name: String,
    pub tag: String,
}

impl Foo {
    /// 第 `n` 条演示记录：`Foo { id: 100, name: "fooN", tag: "1" }`
    pub fn numbered(n: usize) -> Self {
        Self {
            id: 100,
            name: format!("foo{}", n),
            tag: "1".to_string(),
        }
    }
}

/// 订阅入站通道，逐条记录日志
pub fn log_received(bridge: &Bridge<Foo>) -> Subscription<Foo> {
    bridge.inbound().subscribe_fn(|message: &Message<Foo>| {
        let (topic, partition, offset) = message
            .metadata
            .as_ref()
            .map(|m| (m.topic.as_str(), m.partition, m.offset))
            .unwrap_or_default();

        match message.payload.as_value() {
            Some(foo) => info!(topic, partition, offset, key = ?message.key, ?foo, "Received"),
            None => info!(topic, partition, offset, key = ?message.key, "Received null payload"),
        }
        Ok(())
    })
}

/// 依次发送 `count` 条演示记录，最后发送一条空负载
pub async fn send_demo_sequence(outbound: &OutboundChannel<Foo>, count: usize) -> BridgeResult<()> {
    for n in 0..count {
        outbound.send(Message::new(Foo::numbered(n))).await?;
    }
    outbound.send(Message::null()).await?;

    info!(topic = %outbound.default_topic(), count, "Demo sequence sent");
    Ok(())
}
