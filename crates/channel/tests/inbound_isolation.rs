//! 单条坏记录与失败订阅者不会阻塞其余记录

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bridge_channel::{
    AdapterState, BridgeError, ConsumerOptions, ErrorHandler, HandlerError, InboundAdapter,
    InboundChannel, JsonCodec, MemoryBroker, Message, MessageHandler, TopicSpec,
};
use bridge_common::RetryConfig;
use bridge_ports::OutboundRecord;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, Semaphore};
use tokio::time::timeout;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Foo {
    id: i32,
    name: String,
}

fn raw(payload: Option<&[u8]>) -> OutboundRecord {
    OutboundRecord {
        topic: "orders".to_string(),
        key: Some("1".to_string()),
        headers: Vec::new(),
        payload: payload.map(<[u8]>::to_vec),
    }
}

fn json(i: usize) -> Vec<u8> {
    serde_json::to_vec(&Foo {
        id: i as i32,
        name: format!("foo{}", i),
    })
    .unwrap()
}

fn options() -> ConsumerOptions {
    ConsumerOptions {
        poll_timeout: Duration::from_millis(20),
        fetch_backoff: RetryConfig::new(u32::MAX, Duration::from_millis(5), Duration::from_millis(20)),
        delivery_retry: RetryConfig::new(3, Duration::from_millis(1), Duration::from_millis(2)),
    }
}

fn error_sink() -> (ErrorHandler, Arc<Mutex<Vec<BridgeError>>>) {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    let handler: ErrorHandler = Arc::new(move |err: &BridgeError| sink.lock().push(err.clone()));
    (handler, errors)
}

async fn wait_for_commit(broker: &MemoryBroker, offset: i64) {
    timeout(Duration::from_secs(5), async {
        while broker.committed_offset("group", "orders", 0) != Some(offset) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("offset not committed in time");
}

#[tokio::test]
async fn test_malformed_record_is_skipped() {
    let broker = MemoryBroker::new().with_topic(TopicSpec::new("orders", 1, 1));
    for i in 0..4 {
        broker.append(raw(Some(&json(i))));
    }
    broker.append(raw(Some(b"{not json")));
    for i in 5..10 {
        broker.append(raw(Some(&json(i))));
    }

    let channel = InboundChannel::new("inbound");
    let received = Arc::new(Mutex::new(Vec::new()));
    {
        let received = received.clone();
        channel.subscribe_fn(move |m: &Message<Foo>| {
            received.lock().push(m.payload.as_value().map(|f| f.id));
            Ok(())
        });
    }

    let (on_error, errors) = error_sink();
    let adapter = InboundAdapter::new(
        "group",
        vec!["orders".to_string()],
        Arc::new(broker.clone()),
        channel,
        Arc::new(JsonCodec),
    )
    .with_options(options())
    .with_error_handler(on_error);

    adapter.start().unwrap();
    wait_for_commit(&broker, 10).await;
    adapter.stop().await;

    let ids: Vec<_> = received.lock().iter().flatten().copied().collect();
    assert_eq!(ids, vec![0, 1, 2, 3, 5, 6, 7, 8, 9]);

    let errors = errors.lock();
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        &errors[0],
        BridgeError::Consume { topic, partition: 0, offset: 4, .. } if topic == "orders"
    ));
    assert_eq!(adapter.state(), AdapterState::Stopped);
}

#[tokio::test]
async fn test_absent_payload_is_null_not_error() {
    let broker = MemoryBroker::new().with_topic(TopicSpec::new("orders", 1, 1));
    broker.append(raw(None));

    let channel = InboundChannel::<Foo>::new("inbound");
    let nulls = Arc::new(AtomicUsize::new(0));
    {
        let nulls = nulls.clone();
        channel.subscribe_fn(move |m| {
            if m.is_null() {
                nulls.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        });
    }

    let (on_error, errors) = error_sink();
    let adapter = InboundAdapter::new(
        "group",
        vec!["orders".to_string()],
        Arc::new(broker.clone()),
        channel,
        Arc::new(JsonCodec),
    )
    .with_options(options())
    .with_error_handler(on_error);

    adapter.start().unwrap();
    wait_for_commit(&broker, 1).await;
    adapter.stop().await;

    assert_eq!(nulls.load(Ordering::SeqCst), 1);
    assert!(errors.lock().is_empty());
}

#[tokio::test]
async fn test_failing_subscriber_does_not_block_others() {
    let broker = MemoryBroker::new().with_topic(TopicSpec::new("orders", 1, 1));
    for i in 0..5 {
        broker.append(raw(Some(&json(i))));
    }

    let channel = InboundChannel::new("inbound");
    let healthy = Arc::new(AtomicUsize::new(0));
    let attempts = Arc::new(AtomicUsize::new(0));
    {
        let healthy = healthy.clone();
        channel.subscribe_fn(move |_: &Message<Foo>| {
            healthy.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }
    {
        let attempts = attempts.clone();
        channel.subscribe_fn(move |m: &Message<Foo>| {
            attempts.fetch_add(1, Ordering::SeqCst);
            match m.payload.as_value() {
                Some(foo) if foo.id == 2 => Err("rejected foo2".into()),
                _ => Ok(()),
            }
        });
    }

    let (on_error, errors) = error_sink();
    let adapter = InboundAdapter::new(
        "group",
        vec!["orders".to_string()],
        Arc::new(broker.clone()),
        channel,
        Arc::new(JsonCodec),
    )
    .with_options(options())
    .with_error_handler(on_error);

    adapter.start().unwrap();
    wait_for_commit(&broker, 5).await;
    adapter.stop().await;

    assert_eq!(healthy.load(Ordering::SeqCst), 5);
    // 4 条成功各 1 次，foo2 重试 3 次
    assert_eq!(attempts.load(Ordering::SeqCst), 7);

    let errors = errors.lock();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].to_string().contains("rejected foo2"));
}

/// 第一条消息进入后阻塞，直到测试放行
struct GatedHandler {
    entered: Arc<Notify>,
    gate: Arc<Semaphore>,
    seen: Arc<Mutex<Vec<i32>>>,
}

#[async_trait]
impl MessageHandler<Foo> for GatedHandler {
    async fn handle(&self, message: &Message<Foo>) -> Result<(), HandlerError> {
        self.entered.notify_one();
        let _permit = self.gate.acquire().await?;
        if let Some(foo) = message.payload.as_value() {
            self.seen.lock().push(foo.id);
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_stop_finishes_in_flight_batch() {
    let broker = MemoryBroker::new()
        .with_topic(TopicSpec::new("orders", 1, 1))
        .with_max_poll_records(10);
    for i in 0..3 {
        broker.append(raw(Some(&json(i))));
    }

    let entered = Arc::new(Notify::new());
    let gate = Arc::new(Semaphore::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let channel = InboundChannel::new("inbound");
    channel.subscribe(GatedHandler {
        entered: entered.clone(),
        gate: gate.clone(),
        seen: seen.clone(),
    });

    let adapter = Arc::new(
        InboundAdapter::new(
            "group",
            vec!["orders".to_string()],
            Arc::new(broker.clone()),
            channel,
            Arc::new(JsonCodec),
        )
        .with_options(options()),
    );

    adapter.start().unwrap();
    timeout(Duration::from_secs(5), entered.notified())
        .await
        .expect("batch not dispatched in time");

    let stopping = {
        let adapter = adapter.clone();
        tokio::spawn(async move { adapter.stop().await })
    };
    timeout(Duration::from_secs(5), adapter.wait_for_state(AdapterState::Stopping))
        .await
        .expect("adapter did not enter Stopping");
    assert_eq!(broker.committed_offset("group", "orders", 0), None);

    gate.add_permits(3);
    timeout(Duration::from_secs(5), stopping)
        .await
        .expect("stop did not finish")
        .unwrap();

    assert_eq!(*seen.lock(), vec![0, 1, 2]);
    assert_eq!(broker.committed_offset("group", "orders", 0), Some(3));
    assert_eq!(adapter.state(), AdapterState::Stopped);
}
