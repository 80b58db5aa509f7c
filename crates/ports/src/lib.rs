//! ports - Broker 客户端抽象层
//!
//! 桥接核心只通过这里定义的 trait 访问外部 broker：
//! Topic 创建、记录生产、消费者组订阅 / 拉取 / 提交

mod broker;
mod record;

pub use broker::*;
pub use record::*;
