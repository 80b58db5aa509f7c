//! Kafka 客户端配置
//!
//! 所有配置最终展开为 rdkafka `ClientConfig` 的键值对。

use std::collections::BTreeMap;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use secrecy::{ExposeSecret, Secret};

/// Kafka 安全协议
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SecurityProtocol {
    /// 明文（默认）
    #[default]
    Plaintext,
    Ssl,
    SaslPlaintext,
    SaslSsl,
}

impl SecurityProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityProtocol::Plaintext => "plaintext",
            SecurityProtocol::Ssl => "ssl",
            SecurityProtocol::SaslPlaintext => "sasl_plaintext",
            SecurityProtocol::SaslSsl => "sasl_ssl",
        }
    }

    /// 不区分大小写解析，例如 `SASL_SSL`
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "plaintext" => Some(SecurityProtocol::Plaintext),
            "ssl" => Some(SecurityProtocol::Ssl),
            "sasl_plaintext" => Some(SecurityProtocol::SaslPlaintext),
            "sasl_ssl" => Some(SecurityProtocol::SaslSsl),
            _ => None,
        }
    }
}

/// SASL 认证机制
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaslMechanism {
    Plain,
    ScramSha256,
    ScramSha512,
}

impl SaslMechanism {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaslMechanism::Plain => "PLAIN",
            SaslMechanism::ScramSha256 => "SCRAM-SHA-256",
            SaslMechanism::ScramSha512 => "SCRAM-SHA-512",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "PLAIN" => Some(SaslMechanism::Plain),
            "SCRAM-SHA-256" => Some(SaslMechanism::ScramSha256),
            "SCRAM-SHA-512" => Some(SaslMechanism::ScramSha512),
            _ => None,
        }
    }
}

/// SASL 配置，密码以 `Secret` 保存，Debug 输出不会泄露
#[derive(Debug, Clone)]
pub struct SaslConfig {
    pub mechanism: SaslMechanism,
    pub username: String,
    pub password: Secret<String>,
}

impl SaslConfig {
    pub fn new(mechanism: SaslMechanism, username: impl Into<String>, password: Secret<String>) -> Self {
        Self {
            mechanism,
            username: username.into(),
            password,
        }
    }

    pub fn plain(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new(SaslMechanism::Plain, username, Secret::new(password.into()))
    }

    pub fn scram_sha512(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new(SaslMechanism::ScramSha512, username, Secret::new(password.into()))
    }
}

/// SSL 配置
#[derive(Debug, Clone, Default)]
pub struct SslConfig {
    /// CA 证书路径
    pub ca_location: Option<String>,
    /// 客户端证书路径
    pub certificate_location: Option<String>,
    /// 客户端私钥路径
    pub key_location: Option<String>,
    pub key_password: Option<Secret<String>>,
    /// 是否校验服务器主机名
    pub enable_verification: bool,
}

impl SslConfig {
    pub fn new() -> Self {
        Self {
            enable_verification: true,
            ..Default::default()
        }
    }

    pub fn with_ca(mut self, ca_location: impl Into<String>) -> Self {
        self.ca_location = Some(ca_location.into());
        self
    }

    pub fn with_client_cert(
        mut self,
        cert_location: impl Into<String>,
        key_location: impl Into<String>,
    ) -> Self {
        self.certificate_location = Some(cert_location.into());
        self.key_location = Some(key_location.into());
        self
    }

    pub fn with_key_password(mut self, password: Secret<String>) -> Self {
        self.key_password = Some(password);
        self
    }

    pub fn without_verification(mut self) -> Self {
        self.enable_verification = false;
        self
    }
}

/// 压缩类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CompressionType {
    #[default]
    None,
    Gzip,
    Snappy,
    Lz4,
    Zstd,
}

impl CompressionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionType::None => "none",
            CompressionType::Gzip => "gzip",
            CompressionType::Snappy => "snappy",
            CompressionType::Lz4 => "lz4",
            CompressionType::Zstd => "zstd",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "none" => Some(CompressionType::None),
            "gzip" => Some(CompressionType::Gzip),
            "snappy" => Some(CompressionType::Snappy),
            "lz4" => Some(CompressionType::Lz4),
            "zstd" => Some(CompressionType::Zstd),
            _ => None,
        }
    }
}

/// 连接配置（admin、producer、consumer 共用）
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Broker 地址列表，逗号分隔
    pub brokers: String,
    pub client_id: Option<String>,
    pub security_protocol: SecurityProtocol,
    pub sasl: Option<SaslConfig>,
    pub ssl: Option<SslConfig>,
    /// 原样透传的 librdkafka 配置
    pub extra: BTreeMap<String, String>,
}

impl KafkaConfig {
    pub fn new(brokers: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            client_id: None,
            security_protocol: SecurityProtocol::default(),
            sasl: None,
            ssl: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_security_protocol(mut self, protocol: SecurityProtocol) -> Self {
        self.security_protocol = protocol;
        self
    }

    pub fn with_sasl(mut self, sasl: SaslConfig) -> Self {
        self.sasl = Some(sasl);
        match self.security_protocol {
            SecurityProtocol::Plaintext => self.security_protocol = SecurityProtocol::SaslPlaintext,
            SecurityProtocol::Ssl => self.security_protocol = SecurityProtocol::SaslSsl,
            _ => {}
        }
        self
    }

    pub fn with_ssl(mut self, ssl: SslConfig) -> Self {
        self.ssl = Some(ssl);
        match self.security_protocol {
            SecurityProtocol::Plaintext => self.security_protocol = SecurityProtocol::Ssl,
            SecurityProtocol::SaslPlaintext => self.security_protocol = SecurityProtocol::SaslSsl,
            _ => {}
        }
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// 展开为 librdkafka 配置项，`extra` 最后写入可覆盖前面的值
    pub fn to_client_config_entries(&self) -> Vec<(String, String)> {
        let mut entries = vec![
            ("bootstrap.servers".to_string(), self.brokers.clone()),
            (
                "security.protocol".to_string(),
                self.security_protocol.as_str().to_string(),
            ),
        ];

        if let Some(client_id) = &self.client_id {
            entries.push(("client.id".to_string(), client_id.clone()));
        }

        if let Some(sasl) = &self.sasl {
            entries.push((
                "sasl.mechanism".to_string(),
                sasl.mechanism.as_str().to_string(),
            ));
            entries.push(("sasl.username".to_string(), sasl.username.clone()));
            entries.push((
                "sasl.password".to_string(),
                sasl.password.expose_secret().clone(),
            ));
        }

        if let Some(ssl) = &self.ssl {
            if let Some(ca) = &ssl.ca_location {
                entries.push(("ssl.ca.location".to_string(), ca.clone()));
            }
            if let Some(cert) = &ssl.certificate_location {
                entries.push(("ssl.certificate.location".to_string(), cert.clone()));
            }
            if let Some(key) = &ssl.key_location {
                entries.push(("ssl.key.location".to_string(), key.clone()));
            }
            if let Some(password) = &ssl.key_password {
                entries.push((
                    "ssl.key.password".to_string(),
                    password.expose_secret().clone(),
                ));
            }
            if !ssl.enable_verification {
                entries.push((
                    "ssl.endpoint.identification.algorithm".to_string(),
                    "none".to_string(),
                ));
            }
        }

        for (key, value) in &self.extra {
            entries.push((key.clone(), value.clone()));
        }

        entries
    }

    pub(crate) fn client_config(&self) -> ClientConfig {
        to_client_config(self.to_client_config_entries())
    }
}

pub(crate) fn to_client_config(entries: Vec<(String, String)>) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    for (key, value) in entries {
        client_config.set(key, value);
    }
    client_config
}

/// Producer 配置
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub compression: CompressionType,
    /// 批量大小（字节）
    pub batch_size: usize,
    /// 批量等待时间
    pub linger_ms: u64,
    /// 确认模式：0=不等待，1=leader 确认，-1=所有副本确认
    pub acks: i32,
    /// 单条记录的投递超时
    pub message_timeout: Duration,
    /// 幂等生产，保证客户端重试不会乱序
    pub enable_idempotence: bool,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            compression: CompressionType::default(),
            batch_size: 16384,
            linger_ms: 1,
            acks: -1,
            message_timeout: Duration::from_secs(30),
            enable_idempotence: true,
        }
    }
}

impl ProducerConfig {
    pub fn with_compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_linger_ms(mut self, ms: u64) -> Self {
        self.linger_ms = ms;
        self
    }

    pub fn with_acks(mut self, acks: i32) -> Self {
        self.acks = acks;
        self
    }

    pub fn without_idempotence(mut self) -> Self {
        self.enable_idempotence = false;
        self
    }

    pub fn to_client_config_entries(&self) -> Vec<(String, String)> {
        let mut entries = vec![
            (
                "compression.type".to_string(),
                self.compression.as_str().to_string(),
            ),
            ("batch.size".to_string(), self.batch_size.to_string()),
            ("linger.ms".to_string(), self.linger_ms.to_string()),
            ("message.timeout.ms".to_string(), self.message_timeout.as_millis().to_string()),
        ];

        if self.enable_idempotence {
            // 幂等生产要求 acks=all
            entries.push(("enable.idempotence".to_string(), "true".to_string()));
            entries.push(("acks".to_string(), "all".to_string()));
        } else {
            entries.push(("acks".to_string(), self.acks.to_string()));
        }

        entries
    }
}

/// 自动偏移重置策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AutoOffsetReset {
    #[default]
    Earliest,
    Latest,
}

impl AutoOffsetReset {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutoOffsetReset::Earliest => "earliest",
            AutoOffsetReset::Latest => "latest",
        }
    }
}

/// Consumer 配置；group id 与 topic 在订阅时给出
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub auto_offset_reset: AutoOffsetReset,
    pub session_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// 最大拉取字节数
    pub max_fetch_bytes: usize,
    /// 单次 poll 最多返回的记录数
    pub max_poll_records: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            auto_offset_reset: AutoOffsetReset::default(),
            session_timeout: Duration::from_secs(15),
            heartbeat_interval: Duration::from_secs(3),
            max_fetch_bytes: 52428800, // 50MB
            max_poll_records: 500,
        }
    }
}

impl ConsumerConfig {
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn with_auto_offset_reset(mut self, reset: AutoOffsetReset) -> Self {
        self.auto_offset_reset = reset;
        self
    }

    pub fn with_max_poll_records(mut self, max: usize) -> Self {
        self.max_poll_records = max.max(1);
        self
    }

    /// offset 只在投递成功后手动提交，自动提交始终关闭
    pub fn to_client_config_entries(&self, group_id: &str) -> Vec<(String, String)> {
        vec![
            ("group.id".to_string(), group_id.to_string()),
            ("enable.auto.commit".to_string(), "false".to_string()),
            (
                "auto.offset.reset".to_string(),
                self.auto_offset_reset.as_str().to_string(),
            ),
            (
                "session.timeout.ms".to_string(),
                self.session_timeout.as_millis().to_string(),
            ),
            (
                "heartbeat.interval.ms".to_string(),
                self.heartbeat_interval.as_millis().to_string(),
            ),
            (
                "fetch.message.max.bytes".to_string(),
                self.max_fetch_bytes.to_string(),
            ),
        ]
    }
}
