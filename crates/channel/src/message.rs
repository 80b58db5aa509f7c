//! 进程内消息模型
//!
//! `Message<T>` 在出站通道与入站通道之间流转；负载要么是业务对象，
//! 要么是表示“无负载”的 `Payload::Null` 哨兵（不同于空负载）。

use chrono::{DateTime, Utc};

use bridge_ports::RecordHeaders;

/// 出站消息的目标 topic 覆盖头；缺省时使用绑定的出站 topic
pub const TOPIC_HEADER: &str = "kafka_topic";

/// 消息负载
#[derive(Debug, Clone, PartialEq)]
pub enum Payload<T> {
    Value(T),
    /// 无负载哨兵，对应线上的 tombstone 记录
    Null,
}

impl<T> Payload<T> {
    pub fn is_null(&self) -> bool {
        matches!(self, Payload::Null)
    }

    pub fn as_value(&self) -> Option<&T> {
        match self {
            Payload::Value(value) => Some(value),
            Payload::Null => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Payload::Value(value) => Some(value),
            Payload::Null => None,
        }
    }
}

impl<T> From<T> for Payload<T> {
    fn from(value: T) -> Self {
        Payload::Value(value)
    }
}

/// 消息头
///
/// 字符串键到字节值的有序列表。`insert` 覆盖同名键并保留原位置；
/// 来自 broker 的记录头可能包含重复键，转换时原样保留。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, Vec<u8>)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.insert(key, value);
        self
    }

    /// 插入或覆盖，返回旧值
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Option<Vec<u8>> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }

    /// 同名键的全部取值，按出现顺序
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a [u8]> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }

    /// 以 UTF-8 字符串读取；非法 UTF-8 返回 None
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| std::str::from_utf8(v).ok())
    }

    pub fn remove(&mut self, key: &str) -> Option<Vec<u8>> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_record_headers(self) -> RecordHeaders {
        self.entries
    }
}

impl From<RecordHeaders> for Headers {
    fn from(record_headers: RecordHeaders) -> Self {
        Self {
            entries: record_headers,
        }
    }
}

/// 入站消息的来源信息（不属于消息头）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMetadata {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub timestamp: Option<DateTime<Utc>>,
}

/// 进程内消息
#[derive(Debug, Clone, PartialEq)]
pub struct Message<T> {
    pub payload: Payload<T>,
    pub headers: Headers,
    /// 显式消息键；键策略无结果时作为分区键
    pub key: Option<String>,
    /// 仅入站消息携带
    pub metadata: Option<RecordMetadata>,
}

impl<T> Message<T> {
    pub fn new(payload: T) -> Self {
        Self::from_payload(Payload::Value(payload))
    }

    /// 无负载消息
    pub fn null() -> Self {
        Self::from_payload(Payload::Null)
    }

    pub fn from_payload(payload: Payload<T>) -> Self {
        Self {
            payload,
            headers: Headers::new(),
            key: None,
            metadata: None,
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.insert(key, value);
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// 设置目标 topic 头
    pub fn with_topic(self, topic: impl Into<String>) -> Self {
        let topic: String = topic.into();
        self.with_header(TOPIC_HEADER, topic)
    }

    pub(crate) fn with_metadata(mut self, metadata: RecordMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn is_null(&self) -> bool {
        self.payload.is_null()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_keep_insertion_order() {
        let headers = Headers::new()
            .with("z-trace", "abc")
            .with("a-tenant", "t1")
            .with("m-source", "svc");

        let keys: Vec<&str> = headers.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["z-trace", "a-tenant", "m-source"]);
    }

    #[test]
    fn test_headers_overwrite_in_place() {
        let mut headers = Headers::new().with("a", "1").with("b", "2");
        let previous = headers.insert("a", "3");

        assert_eq!(previous, Some(b"1".to_vec()));
        assert_eq!(headers.get_str("a"), Some("3"));
        assert_eq!(headers.iter().next().map(|(k, _)| k), Some("a"));
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn test_headers_from_record_headers() {
        let record = vec![
            ("tenant".to_string(), b"t1".to_vec()),
            ("binary".to_string(), vec![0xff, 0xfe]),
        ];
        let headers = Headers::from(record.clone());

        assert_eq!(headers.get_str("tenant"), Some("t1"));
        assert_eq!(headers.get_str("binary"), None);
        assert_eq!(headers.get("binary"), Some(&[0xff, 0xfe][..]));
        assert_eq!(headers.into_record_headers(), record);
    }

    #[test]
    fn test_repeated_record_header_keys_are_kept() {
        let record = vec![
            ("a".to_string(), b"1".to_vec()),
            ("b".to_string(), b"x".to_vec()),
            ("a".to_string(), b"2".to_vec()),
        ];
        let headers = Headers::from(record.clone());

        assert_eq!(headers.len(), 3);
        assert_eq!(headers.get_str("a"), Some("1"));
        let all: Vec<&[u8]> = headers.get_all("a").collect();
        assert_eq!(all, vec![&b"1"[..], &b"2"[..]]);
        assert_eq!(headers.into_record_headers(), record);
    }

    #[test]
    fn test_null_message() {
        let message: Message<String> = Message::null().with_key("1").with_topic("orders");

        assert!(message.is_null());
        assert_eq!(message.key.as_deref(), Some("1"));
        assert_eq!(message.headers.get_str(TOPIC_HEADER), Some("orders"));
    }

    #[test]
    fn test_payload_accessors() {
        let payload = Payload::from("foo0".to_string());
        assert_eq!(payload.as_value().map(String::as_str), Some("foo0"));
        assert!(!payload.is_null());
        assert_eq!(Payload::<String>::Null.into_value(), None);
    }
}
