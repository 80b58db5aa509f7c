use figment::Figment;
use figment::providers::{Format, Toml};
use secrecy::{ExposeSecret, Secret};

use crate::{BridgeSettings, ConfigError, KeySettings, SaslSettings};

const BASE: &str = r#"
app_name = "bridge"
app_env = "development"

[kafka]
brokers = "localhost:9092"

[consumer]
group_id = "group"

[binding]
outbound_topic = "topic"
inbound_topics = ["topic"]
key = { type = "constant", value = "1" }
"#;

fn load(overlay: &str) -> Result<BridgeSettings, ConfigError> {
    BridgeSettings::from_figment(
        Figment::new()
            .merge(Toml::string(BASE))
            .merge(Toml::string(overlay)),
    )
}

#[test]
fn test_defaults() {
    let settings = load("").unwrap();

    assert!(settings.is_development());
    assert_eq!(settings.kafka.security_protocol, "plaintext");
    assert!(settings.kafka.ssl.is_none());
    assert_eq!(settings.kafka.request_timeout_ms, 30000);
    assert_eq!(settings.producer.linger_ms, 1);
    assert!(settings.producer.idempotence);
    assert_eq!(settings.consumer.session_timeout_ms, 15000);
    assert_eq!(settings.consumer.auto_offset_reset, "earliest");
    assert_eq!(settings.telemetry.log_level, "info");
    assert!(!settings.demo.enabled);
    assert_eq!(settings.demo.messages, 10);

    let topics: Vec<_> = settings.topics.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(topics, vec!["topic", "new_topic"]);
    assert!(settings.topics.iter().all(|t| t.partitions == 1 && t.replication_factor == 1));
    assert_eq!(
        settings.binding.key,
        Some(KeySettings::Constant { value: "1".into() })
    );
}

#[test]
fn test_ssl_section() {
    let settings = load(
        r#"
[kafka]
request_timeout_ms = 5000

[kafka.ssl]
ca_location = "/etc/kafka/ca.pem"
certificate_location = "/etc/kafka/client.pem"
key_location = "/etc/kafka/client.key"
key_password = "changeit"
"#,
    )
    .unwrap();

    assert_eq!(settings.kafka.request_timeout_ms, 5000);
    let ssl = settings.kafka.ssl.unwrap();
    assert_eq!(ssl.ca_location.as_deref(), Some("/etc/kafka/ca.pem"));
    assert!(ssl.verify_hostname);
    let password = ssl.key_password.unwrap();
    assert_eq!(password.expose_secret(), "changeit");
    assert!(!format!("{:?}", password).contains("changeit"));
}

#[test]
fn test_partial_demo_section_keeps_message_count() {
    let settings = load(
        r#"
[demo]
enabled = true
"#,
    )
    .unwrap();

    assert!(settings.demo.enabled);
    assert_eq!(settings.demo.messages, 10);
}

#[test]
fn test_overlay_overrides_base() {
    let settings = load(
        r#"
app_env = "production"

[producer]
linger_ms = 20

[binding]
key = { type = "payload_field", pointer = "/tag" }

[[listeners]]
suffix = "x"
topics = ["new_topic"]
"#,
    )
    .unwrap();

    assert!(settings.is_production());
    assert_eq!(settings.producer.linger_ms, 20);
    assert_eq!(settings.producer.batch_size, 500);
    assert_eq!(settings.binding.outbound_topic, "topic");
    assert_eq!(
        settings.binding.key,
        Some(KeySettings::PayloadField { pointer: "/tag".into() })
    );
    assert_eq!(settings.listeners.len(), 1);
    assert_eq!(settings.listeners[0].suffix, "x");
}

#[test]
fn test_invalid_settings_rejected() {
    let result = load(
        r#"
[binding]
inbound_topics = []
"#,
    );
    assert!(matches!(result, Err(ConfigError::Invalid(_))));

    let result = load(
        r#"
[[listeners]]
suffix = ""
topics = ["new_topic"]
"#,
    );
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}

#[test]
fn test_missing_section_fails_to_load() {
    let result = BridgeSettings::from_figment(Figment::new().merge(Toml::string("app_name = \"x\"")));
    assert!(matches!(result, Err(ConfigError::Load(_))));
}

#[test]
fn test_secret_redaction() {
    let secret = Secret::new("my_secret_password".to_string());
    let debug_output = format!("{:?}", secret);
    assert!(debug_output.contains("Secret([REDACTED"));
    assert!(!debug_output.contains("my_secret_password"));
}

#[test]
fn test_sasl_password_redacted() {
    let settings = load(
        r#"
[kafka.sasl]
username = "bridge"
password = "s3cr3t-pass"
"#,
    )
    .unwrap();

    let sasl: &SaslSettings = settings.kafka.sasl.as_ref().unwrap();
    assert_eq!(sasl.mechanism, "PLAIN");
    assert_eq!(sasl.password.expose_secret(), "s3cr3t-pass");

    let debug_output = format!("{:?}", settings);
    assert!(!debug_output.contains("s3cr3t-pass"));
    assert!(debug_output.contains("Secret([REDACTED"));
}
