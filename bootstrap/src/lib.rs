//! bridge-bootstrap - 桥接服务启动骨架
//!
//! 配置 → 遥测 → Kafka 客户端 → Bridge 的装配逻辑，供 `bridge` 二进制使用

mod demo;
mod runtime;
mod wiring;

pub use demo::*;
pub use runtime::*;
pub use wiring::*;
