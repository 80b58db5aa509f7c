//! Metrics 记录

use metrics::{counter, gauge, histogram};

pub(crate) fn record_published(topic: &str, success: bool) {
    let labels = [
        ("topic", topic.to_string()),
        ("success", success.to_string()),
    ];
    counter!("bridge_records_published_total", &labels).increment(1);
}

pub(crate) fn record_publish_batch(size: usize) {
    histogram!("bridge_publish_batch_size").record(size as f64);
}

pub(crate) fn record_consumed(group_id: &str, topic: &str) {
    let labels = [
        ("group_id", group_id.to_string()),
        ("topic", topic.to_string()),
    ];
    counter!("bridge_records_consumed_total", &labels).increment(1);
}

pub(crate) fn record_skipped(group_id: &str, topic: &str, reason: &'static str) {
    let labels = [
        ("group_id", group_id.to_string()),
        ("topic", topic.to_string()),
        ("reason", reason.to_string()),
    ];
    counter!("bridge_records_skipped_total", &labels).increment(1);
}

pub(crate) fn record_deliveries(group_id: &str, subscribers: usize) {
    counter!("bridge_subscriber_deliveries_total", "group_id" => group_id.to_string())
        .increment(subscribers as u64);
}

pub(crate) fn record_bridge_error(kind: &'static str) {
    counter!("bridge_errors_total", "kind" => kind).increment(1);
}

pub(crate) fn set_registered_listeners(count: usize) {
    gauge!("bridge_registered_listeners").set(count as f64);
}
