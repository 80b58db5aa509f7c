//! adapter-kafka - Kafka 适配器
//!
//! 以 rdkafka 实现桥接层的 broker 客户端契约：
//! - Topic 创建（已存在时查询分区数）
//! - 记录生产（key、记录头、tombstone）
//! - 消费者组订阅、批量拉取、手动提交
//! - 健康检查
//! - 连接配置（SASL、SSL、压缩）

mod admin;
mod client;
mod config;
mod consumer;
mod error;
mod health;
mod producer;

pub use admin::*;
pub use client::*;
pub use config::*;
pub use consumer::*;
pub use error::classify;
pub use health::*;
pub use producer::*;
