//! 消息类型定义

use std::collections::BTreeMap;

use bridge_errors::{BridgeError, BridgeResult};
use serde::{Serialize, de::DeserializeOwned};

/// 消息头值：文本或原始字节
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Text(String),
    Bytes(Vec<u8>),
}

impl HeaderValue {
    /// 从线上字节还原，合法 UTF-8 还原为文本
    pub fn from_wire(bytes: &[u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(text) => Self::Text(text.to_string()),
            Err(_) => Self::Bytes(bytes.to_vec()),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Bytes(bytes) => bytes,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Bytes(_) => None,
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for HeaderValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<&[u8]> for HeaderValue {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(value.to_vec())
    }
}

/// 消息头
pub type Headers = BTreeMap<String, HeaderValue>;

/// 消息：不透明载荷 + 消息头 + 可选分区键
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub payload: Vec<u8>,
    pub headers: Headers,
    pub key: Option<Vec<u8>>,
}

impl Message {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            headers: Headers::new(),
            key: None,
        }
    }

    /// 将可序列化对象编码为 JSON 载荷
    pub fn json<T: Serialize>(value: &T) -> BridgeResult<Self> {
        let payload = serde_json::to_vec(value)
            .map_err(|e| BridgeError::serialization(format!("Failed to serialize payload: {}", e)))?;
        Ok(Self::new(payload))
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn header(&self, key: &str) -> Option<&HeaderValue> {
        self.headers.get(key)
    }

    /// 解析 JSON 载荷
    pub fn parse_json<T: DeserializeOwned>(&self) -> BridgeResult<T> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| BridgeError::serialization(format!("Failed to parse payload: {}", e)))
    }

    /// 发送前校验能否编码为线上记录
    pub fn validate(&self) -> BridgeResult<()> {
        if self.headers.keys().any(|key| key.is_empty()) {
            return Err(BridgeError::serialization("header keys must not be empty"));
        }
        Ok(())
    }
}

/// 一次成功投递的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub partition: i32,
    pub offset: i64,
}

/// 从 broker 拉取到的消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// 毫秒时间戳
    pub timestamp: Option<i64>,
    pub message: Message,
}
