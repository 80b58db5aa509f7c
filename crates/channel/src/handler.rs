//! 订阅者与错误回调

use std::sync::Arc;

use async_trait::async_trait;
use bridge_errors::BridgeError;
use tracing::{error, warn};

use crate::message::Message;

/// 订阅者返回的错误
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// 入站消息订阅者
#[async_trait]
pub trait MessageHandler<T>: Send + Sync {
    async fn handle(&self, message: &Message<T>) -> Result<(), HandlerError>;
}

/// 把同步闭包包装成订阅者
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<T, F> MessageHandler<T> for FnHandler<F>
where
    T: Send + Sync,
    F: Fn(&Message<T>) -> Result<(), HandlerError> + Send + Sync,
{
    async fn handle(&self, message: &Message<T>) -> Result<(), HandlerError> {
        (self.0)(message)
    }
}

/// 异步错误回调：发布失败、单条记录消费失败、消费者失效
pub type ErrorHandler = Arc<dyn Fn(&BridgeError) + Send + Sync>;

/// 默认错误回调，只记录日志
pub fn logging_error_handler() -> ErrorHandler {
    Arc::new(|err: &BridgeError| {
        if err.is_fatal() {
            error!(kind = err.kind(), error = %err, "Bridge error");
        } else {
            warn!(kind = err.kind(), error = %err, "Bridge error");
        }
    })
}
