//! bridge-errors - 统一错误处理
//!
//! 按照重试语义对 broker 错误分类：瞬时、永久、配置

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// 网络或 leader 切换类错误，可在上限内重试
    Transient,
    /// 序列化、授权、消息过大等错误，立即失败
    Permanent,
    /// 配置错误，在任何 I/O 之前失败
    Configuration,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::Permanent => "permanent",
            ErrorClass::Configuration => "configuration",
        }
    }
}

/// Bridge 错误类型
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection reset: {0}")]
    ConnectionReset(String),

    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("Leader not available: {0}")]
    LeaderNotAvailable(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Message too large: {0}")]
    MessageTooLarge(String),

    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("Rejected by broker: {0}")]
    Rejected(String),
}

impl BridgeError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn connection_reset(msg: impl Into<String>) -> Self {
        Self::ConnectionReset(msg.into())
    }

    pub fn broker_unavailable(msg: impl Into<String>) -> Self {
        Self::BrokerUnavailable(msg.into())
    }

    pub fn leader_not_available(msg: impl Into<String>) -> Self {
        Self::LeaderNotAvailable(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    pub fn message_too_large(msg: impl Into<String>) -> Self {
        Self::MessageTooLarge(msg.into())
    }

    pub fn authorization(msg: impl Into<String>) -> Self {
        Self::Authorization(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    /// 错误分类
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Configuration(_) => ErrorClass::Configuration,
            Self::ConnectionReset(_)
            | Self::BrokerUnavailable(_)
            | Self::LeaderNotAvailable(_)
            | Self::Timeout(_) => ErrorClass::Transient,
            Self::Serialization(_)
            | Self::MessageTooLarge(_)
            | Self::Authorization(_)
            | Self::Rejected(_) => ErrorClass::Permanent,
        }
    }

    /// 是否可重试（仅瞬时错误）
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// 是否为授权失败（消费者遇到时终止）
    pub fn is_authorization(&self) -> bool {
        matches!(self, Self::Authorization(_))
    }
}

/// Result 类型别名
pub type BridgeResult<T> = Result<T, BridgeError>;
