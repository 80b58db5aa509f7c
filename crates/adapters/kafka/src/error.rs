//! rdkafka 错误 → `ClientError` 分类

use bridge_errors::ClientError;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};

/// 按错误码归类；无错误码的客户端错误视为不可恢复
pub fn classify(err: &KafkaError) -> ClientError {
    let message = err.to_string();
    match err {
        KafkaError::Canceled => return ClientError::unreachable(message),
        KafkaError::ClientCreation(_) | KafkaError::ClientConfig(..) => {
            return ClientError::fatal(message);
        }
        // AdminOp 不经过 rdkafka_error_code()
        KafkaError::AdminOp(code) => return classify_code(*code, message),
        // 订阅的 topic 可能稍后才被创建，消费侧按瞬时错误退避
        KafkaError::MessageConsumption(
            RDKafkaErrorCode::UnknownTopicOrPartition | RDKafkaErrorCode::UnknownTopic,
        ) => return ClientError::unreachable(message),
        _ => {}
    }

    match err.rdkafka_error_code() {
        Some(code) => classify_code(code, message),
        None => ClientError::fatal(message),
    }
}

pub fn classify_code(code: RDKafkaErrorCode, message: impl Into<String>) -> ClientError {
    match code {
        RDKafkaErrorCode::AllBrokersDown
        | RDKafkaErrorCode::BrokerTransportFailure
        | RDKafkaErrorCode::Resolve
        | RDKafkaErrorCode::OperationTimedOut
        | RDKafkaErrorCode::RequestTimedOut
        | RDKafkaErrorCode::MessageTimedOut
        | RDKafkaErrorCode::NetworkException
        | RDKafkaErrorCode::QueueFull
        | RDKafkaErrorCode::BrokerNotAvailable
        | RDKafkaErrorCode::LeaderNotAvailable
        | RDKafkaErrorCode::NotLeaderForPartition
        | RDKafkaErrorCode::CoordinatorNotAvailable
        | RDKafkaErrorCode::NotCoordinator
        | RDKafkaErrorCode::RebalanceInProgress => ClientError::unreachable(message),

        RDKafkaErrorCode::Authentication
        | RDKafkaErrorCode::SaslAuthenticationFailed
        | RDKafkaErrorCode::TopicAuthorizationFailed
        | RDKafkaErrorCode::GroupAuthorizationFailed
        | RDKafkaErrorCode::ClusterAuthorizationFailed => ClientError::unauthorized(message),

        RDKafkaErrorCode::MessageSizeTooLarge | RDKafkaErrorCode::InvalidMessageSize => {
            ClientError::record_too_large(message)
        }

        RDKafkaErrorCode::UnknownTopicOrPartition | RDKafkaErrorCode::UnknownTopic => {
            ClientError::unknown_topic(message)
        }

        _ => ClientError::fatal(message),
    }
}
