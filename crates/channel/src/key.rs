//! 分区键策略

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::message::{Message, Payload};

type KeyFn<T> = Arc<dyn Fn(&Message<T>) -> Option<String> + Send + Sync>;

/// 分区键策略
///
/// 策略没有产生键时，出站适配器回退到消息自身的 `key`。
pub enum KeyStrategy<T> {
    /// 固定键，所有消息落在同一分区
    Constant(String),
    /// 读取指定消息头
    Header(String),
    /// 读取负载字段（JSON Pointer，例如 `/tag`）
    PayloadField(String),
    /// 自定义函数
    Custom(KeyFn<T>),
}

impl<T> KeyStrategy<T> {
    pub fn constant(key: impl Into<String>) -> Self {
        Self::Constant(key.into())
    }

    pub fn header(name: impl Into<String>) -> Self {
        Self::Header(name.into())
    }

    /// `field` 可以是 JSON Pointer，也可以是单个字段名
    pub fn payload_field(field: impl Into<String>) -> Self {
        let field = field.into();
        if field.starts_with('/') {
            Self::PayloadField(field)
        } else {
            Self::PayloadField(format!("/{}", field))
        }
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Message<T>) -> Option<String> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }
}

impl<T: Serialize> KeyStrategy<T> {
    pub fn derive_key(&self, message: &Message<T>) -> Option<String> {
        match self {
            KeyStrategy::Constant(key) => Some(key.clone()),
            KeyStrategy::Header(name) => message.headers.get_str(name).map(str::to_owned),
            KeyStrategy::PayloadField(pointer) => match &message.payload {
                Payload::Value(value) => serde_json::to_value(value)
                    .ok()
                    .and_then(|json| json.pointer(pointer).and_then(key_from_json)),
                Payload::Null => None,
            },
            KeyStrategy::Custom(f) => f(message),
        }
    }
}

fn key_from_json(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

impl<T> Clone for KeyStrategy<T> {
    fn clone(&self) -> Self {
        match self {
            KeyStrategy::Constant(key) => KeyStrategy::Constant(key.clone()),
            KeyStrategy::Header(name) => KeyStrategy::Header(name.clone()),
            KeyStrategy::PayloadField(pointer) => KeyStrategy::PayloadField(pointer.clone()),
            KeyStrategy::Custom(f) => KeyStrategy::Custom(Arc::clone(f)),
        }
    }
}

impl<T> fmt::Debug for KeyStrategy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyStrategy::Constant(key) => f.debug_tuple("Constant").field(key).finish(),
            KeyStrategy::Header(name) => f.debug_tuple("Header").field(name).finish(),
            KeyStrategy::PayloadField(pointer) => {
                f.debug_tuple("PayloadField").field(pointer).finish()
            }
            KeyStrategy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Debug, Clone, Serialize)]
    struct Foo {
        id: i32,
        name: String,
        tag: String,
    }

    fn foo(name: &str) -> Foo {
        Foo {
            id: 100,
            name: name.to_string(),
            tag: "1".to_string(),
        }
    }

    #[test]
    fn test_constant_key_ignores_payload() {
        let strategy = KeyStrategy::constant("1");

        let first = strategy.derive_key(&Message::new(foo("foo0")));
        let second = strategy.derive_key(&Message::new(foo("foo9")));
        let null = strategy.derive_key(&Message::<Foo>::null());

        assert_eq!(first.as_deref(), Some("1"));
        assert_eq!(first, second);
        assert_eq!(first, null);
    }

    #[test]
    fn test_header_key() {
        let strategy = KeyStrategy::header("tenant");
        let message = Message::new(foo("foo0")).with_header("tenant", "acme");

        assert_eq!(strategy.derive_key(&message).as_deref(), Some("acme"));
        assert_eq!(strategy.derive_key(&Message::new(foo("foo1"))), None);
    }

    #[test]
    fn test_payload_field_key() {
        let by_name = KeyStrategy::payload_field("name");
        let by_id = KeyStrategy::payload_field("/id");

        assert_eq!(by_name.derive_key(&Message::new(foo("foo3"))).as_deref(), Some("foo3"));
        assert_eq!(by_id.derive_key(&Message::new(foo("foo3"))).as_deref(), Some("100"));
        assert_eq!(by_name.derive_key(&Message::<Foo>::null()), None);
        assert_eq!(
            KeyStrategy::<Foo>::payload_field("missing").derive_key(&Message::new(foo("x"))),
            None
        );
    }

    #[test]
    fn test_custom_key() {
        let strategy = KeyStrategy::custom(|m: &Message<Foo>| {
            m.payload.as_value().map(|f| format!("{}-{}", f.id, f.tag))
        });

        assert_eq!(strategy.derive_key(&Message::new(foo("a"))).as_deref(), Some("100-1"));
        assert_eq!(format!("{:?}", strategy), "Custom(..)");
    }
}
