//! rdkafka 错误分类

use bridge_common::is_retryable_error;
use bridge_errors::BridgeError;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};

/// 把 rdkafka 错误映射为带分类的 `BridgeError`
pub fn classify(error: &KafkaError) -> BridgeError {
    let message = error.to_string();

    if let Some(code) = error.rdkafka_error_code() {
        return classify_code(code, message);
    }

    match error {
        KafkaError::ClientConfig(..) | KafkaError::ClientCreation(_) | KafkaError::Subscription(_) => {
            BridgeError::configuration(message)
        }
        KafkaError::Canceled => BridgeError::connection_reset(message),
        _ if is_retryable_error(&message) => BridgeError::connection_reset(message),
        _ => BridgeError::rejected(message),
    }
}

/// 按错误码分类；未列出的错误码按永久错误处理
pub fn classify_code(code: RDKafkaErrorCode, message: impl Into<String>) -> BridgeError {
    use RDKafkaErrorCode::*;

    match code {
        MessageTimedOut | OperationTimedOut | RequestTimedOut => BridgeError::timeout(message),

        LeaderNotAvailable | NotLeaderForPartition => BridgeError::leader_not_available(message),

        BrokerNotAvailable
        | AllBrokersDown
        | CoordinatorNotAvailable
        | CoordinatorLoadInProgress
        | NotCoordinator
        | NotEnoughReplicas
        | NotEnoughReplicasAfterAppend
        | RebalanceInProgress
        | QueueFull
        | UnknownTopicOrPartition => BridgeError::broker_unavailable(message),

        BrokerTransportFailure | NetworkException | Resolve => {
            BridgeError::connection_reset(message)
        }

        MessageSizeTooLarge | InvalidMessageSize | MessageBatchTooLarge => {
            BridgeError::message_too_large(message)
        }

        TopicAuthorizationFailed
        | GroupAuthorizationFailed
        | ClusterAuthorizationFailed
        | SaslAuthenticationFailed
        | Authentication => BridgeError::authorization(message),

        KeySerialization | ValueSerialization | InvalidMessage => {
            BridgeError::serialization(message)
        }

        _ => BridgeError::rejected(message),
    }
}
