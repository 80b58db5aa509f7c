//! bridge-config - 配置加载库
//!
//! 加载顺序（后者覆盖前者）：
//! 1. `{config_dir}/default.toml`
//! 2. `{config_dir}/{APP_ENV}.toml`
//! 3. `BRIDGE_` 前缀的环境变量，嵌套字段用 `__` 分隔，例如 `BRIDGE_KAFKA__BROKERS`

use std::collections::BTreeMap;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use secrecy::Secret;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] figment::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// SASL 配置
#[derive(Debug, Clone, Deserialize)]
pub struct SaslSettings {
    #[serde(default = "default_sasl_mechanism")]
    pub mechanism: String,
    pub username: String,
    pub password: Secret<String>,
}

fn default_sasl_mechanism() -> String {
    "PLAIN".to_string()
}

/// SSL 配置，设置后启用 SSL
#[derive(Debug, Clone, Deserialize)]
pub struct SslSettings {
    pub ca_location: Option<String>,
    pub certificate_location: Option<String>,
    pub key_location: Option<String>,
    pub key_password: Option<Secret<String>>,
    /// 是否校验服务器主机名
    #[serde(default = "default_verify_hostname")]
    pub verify_hostname: bool,
}

fn default_verify_hostname() -> bool {
    true
}

/// Kafka 连接配置
#[derive(Debug, Clone, Deserialize)]
pub struct KafkaSettings {
    pub brokers: String,
    pub client_id: Option<String>,
    #[serde(default = "default_security_protocol")]
    pub security_protocol: String,
    pub sasl: Option<SaslSettings>,
    pub ssl: Option<SslSettings>,
    /// Admin 与元数据请求超时
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// 原样透传给 librdkafka 的配置
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl KafkaSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_security_protocol() -> String {
    "plaintext".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30000
}

/// 出站配置
#[derive(Debug, Clone, Deserialize)]
pub struct ProducerSettings {
    #[serde(default = "default_linger_ms")]
    pub linger_ms: u64,
    /// 单批最多记录数
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// 待发送队列容量，满时 `send` 等待
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    #[serde(default = "default_acks")]
    pub acks: i32,
    #[serde(default = "default_compression")]
    pub compression: String,
    #[serde(default = "default_true")]
    pub idempotence: bool,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            linger_ms: default_linger_ms(),
            batch_size: default_batch_size(),
            buffer_capacity: default_buffer_capacity(),
            send_timeout_ms: default_send_timeout_ms(),
            acks: default_acks(),
            compression: default_compression(),
            idempotence: true,
        }
    }
}

impl ProducerSettings {
    pub fn linger(&self) -> Duration {
        Duration::from_millis(self.linger_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

fn default_linger_ms() -> u64 {
    1
}

fn default_batch_size() -> usize {
    500
}

fn default_buffer_capacity() -> usize {
    1024
}

fn default_send_timeout_ms() -> u64 {
    5000
}

fn default_acks() -> i32 {
    -1
}

fn default_compression() -> String {
    "none".to_string()
}

fn default_true() -> bool {
    true
}

/// 入站配置
#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerSettings {
    pub group_id: String,
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default = "default_max_poll_records")]
    pub max_poll_records: usize,
    /// 单个订阅者的最大投递次数（含首次）
    #[serde(default = "default_delivery_attempts")]
    pub delivery_attempts: u32,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// earliest / latest
    #[serde(default = "default_auto_offset_reset")]
    pub auto_offset_reset: String,
}

impl ConsumerSettings {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

fn default_session_timeout_ms() -> u64 {
    15000
}

fn default_poll_timeout_ms() -> u64 {
    100
}

fn default_max_poll_records() -> usize {
    500
}

fn default_delivery_attempts() -> u32 {
    3
}

fn default_backoff_initial_ms() -> u64 {
    100
}

fn default_backoff_max_ms() -> u64 {
    10000
}

fn default_auto_offset_reset() -> String {
    "earliest".to_string()
}

/// 键策略
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KeySettings {
    /// 所有记录使用同一个键
    Constant { value: String },
    /// 取消息头的值
    Header { name: String },
    /// 序列化负载中的 JSON Pointer，例如 `/tag`
    PayloadField { pointer: String },
}

/// 通道绑定
#[derive(Debug, Clone, Deserialize)]
pub struct BindingSettings {
    pub outbound_topic: String,
    pub inbound_topics: Vec<String>,
    pub key: Option<KeySettings>,
}

/// Topic 描述
#[derive(Debug, Clone, Deserialize)]
pub struct TopicSettings {
    pub name: String,
    #[serde(default = "default_one")]
    pub partitions: i32,
    #[serde(default = "default_one")]
    pub replication_factor: i32,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

fn default_one() -> i32 {
    1
}

fn default_topics() -> Vec<TopicSettings> {
    ["topic", "new_topic"]
        .into_iter()
        .map(|name| TopicSettings {
            name: name.to_string(),
            partitions: 1,
            replication_factor: 1,
            config: BTreeMap::new(),
        })
        .collect()
}

/// 启动时追加的监听器
#[derive(Debug, Clone, Deserialize)]
pub struct ListenerSettings {
    pub suffix: String,
    pub topics: Vec<String>,
}

/// 演示流量
#[derive(Debug, Clone, Deserialize)]
pub struct DemoSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_demo_messages")]
    pub messages: usize,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            messages: default_demo_messages(),
        }
    }
}

fn default_demo_messages() -> usize {
    10
}

/// 遥测配置
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetrySettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub json: bool,
    /// Prometheus 导出地址，例如 `0.0.0.0:9090`
    pub metrics_addr: Option<String>,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json: false,
            metrics_addr: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// 应用配置
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeSettings {
    pub app_name: String,
    pub app_env: String,
    pub kafka: KafkaSettings,
    #[serde(default)]
    pub producer: ProducerSettings,
    pub consumer: ConsumerSettings,
    pub binding: BindingSettings,
    #[serde(default = "default_topics")]
    pub topics: Vec<TopicSettings>,
    #[serde(default)]
    pub listeners: Vec<ListenerSettings>,
    #[serde(default)]
    pub demo: DemoSettings,
    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

impl BridgeSettings {
    /// 从配置文件和环境变量加载配置
    pub fn load(config_dir: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let figment = Figment::new()
            .merge(Toml::file(format!("{}/default.toml", config_dir)))
            .merge(Toml::file(format!("{}/{}.toml", config_dir, env)))
            .merge(Env::prefixed("BRIDGE_").split("__"));

        Self::from_figment(figment)
    }

    /// 从已组装的 figment 提取并校验
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let settings: Self = figment.extract()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.kafka.brokers.trim().is_empty() {
            return Err(ConfigError::Invalid("kafka.brokers must not be empty".into()));
        }
        if self.binding.outbound_topic.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "binding.outbound_topic must not be empty".into(),
            ));
        }
        if self.binding.inbound_topics.is_empty() {
            return Err(ConfigError::Invalid(
                "binding.inbound_topics must name at least one topic".into(),
            ));
        }
        if self.consumer.group_id.trim().is_empty() {
            return Err(ConfigError::Invalid("consumer.group_id must not be empty".into()));
        }
        for listener in &self.listeners {
            if listener.suffix.is_empty() {
                return Err(ConfigError::Invalid(
                    "listener suffix must not be empty".into(),
                ));
            }
        }
        Ok(())
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }

    /// 是否为开发环境
    pub fn is_development(&self) -> bool {
        self.app_env == "development"
    }
}

#[cfg(test)]
mod tests;
