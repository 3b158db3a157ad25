//! Kafka 客户端配置
//!
//! 把校验后的 `BrokerConfig` 映射为 rdkafka `ClientConfig` 配置项

use std::collections::BTreeMap;
use std::time::Duration;

use bridge_config::{BrokerConfig, SecurityConfig};
use bridge_errors::BridgeResult;
use rdkafka::config::{ClientConfig, FromClientConfig};
use secrecy::ExposeSecret;

use crate::error::classify;

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

/// Kafka 基础配置
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// `bootstrap.servers`
    pub brokers: String,
    pub client_id: Option<String>,
    pub request_timeout: Duration,
    pub security: SecurityConfig,
    /// 额外配置，覆盖同名配置项
    pub extra: BTreeMap<String, String>,
}

impl KafkaConfig {
    pub fn from_broker(config: &BrokerConfig) -> Self {
        Self {
            brokers: config.bootstrap_servers(),
            client_id: config.client_id().map(ToString::to_string),
            request_timeout: config.request_timeout(),
            security: config.security().clone(),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// 转换为 rdkafka ClientConfig 的配置项
    pub fn to_client_config_entries(&self) -> Vec<(String, String)> {
        let mut entries = vec![
            ("bootstrap.servers".to_string(), self.brokers.clone()),
            (
                "security.protocol".to_string(),
                self.security.protocol.as_str().to_string(),
            ),
            (
                "socket.timeout.ms".to_string(),
                self.request_timeout.as_millis().to_string(),
            ),
        ];

        if let Some(client_id) = &self.client_id {
            entries.push(("client.id".to_string(), client_id.clone()));
        }

        if let Some(sasl) = &self.security.sasl {
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

        if let Some(ssl) = &self.security.ssl {
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
                    "enable.ssl.certificate.verification".to_string(),
                    "false".to_string(),
                ));
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
}

/// Producer 配置
///
/// 客户端内部不重试，每次 `send` 对应一次投递尝试，重试由发布者负责
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub base: KafkaConfig,
    /// 投递超时（`message.timeout.ms`）
    pub message_timeout: Duration,
}

impl ProducerConfig {
    pub fn from_broker(config: &BrokerConfig) -> Self {
        Self {
            base: KafkaConfig::from_broker(config),
            message_timeout: config.request_timeout(),
        }
    }

    pub fn to_client_config_entries(&self) -> Vec<(String, String)> {
        let mut entries = self.base.to_client_config_entries();

        entries.push(("acks".to_string(), "all".to_string()));
        entries.push(("retries".to_string(), "0".to_string()));
        entries.push((
            "message.timeout.ms".to_string(),
            self.message_timeout.as_millis().to_string(),
        ));

        entries
    }

    pub fn create<T: FromClientConfig>(&self) -> BridgeResult<T> {
        create_client(self.to_client_config_entries())
    }
}

/// Consumer 配置
///
/// 关闭自动提交，偏移量只在调用方确认后提交
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub base: KafkaConfig,
    pub group_id: String,
    pub auto_offset_reset: AutoOffsetReset,
    pub session_timeout: Duration,
}

impl ConsumerConfig {
    pub fn from_broker(config: &BrokerConfig, group_id: impl Into<String>) -> Self {
        Self {
            base: KafkaConfig::from_broker(config),
            group_id: group_id.into(),
            auto_offset_reset: AutoOffsetReset::default(),
            session_timeout: config.session_timeout(),
        }
    }

    pub fn with_auto_offset_reset(mut self, reset: AutoOffsetReset) -> Self {
        self.auto_offset_reset = reset;
        self
    }

    pub fn to_client_config_entries(&self) -> Vec<(String, String)> {
        let mut entries = self.base.to_client_config_entries();

        entries.push(("group.id".to_string(), self.group_id.clone()));
        entries.push(("enable.auto.commit".to_string(), "false".to_string()));
        entries.push((
            "auto.offset.reset".to_string(),
            self.auto_offset_reset.as_str().to_string(),
        ));
        entries.push((
            "session.timeout.ms".to_string(),
            self.session_timeout.as_millis().to_string(),
        ));

        entries
    }

    pub fn create<T: FromClientConfig>(&self) -> BridgeResult<T> {
        create_client(self.to_client_config_entries())
    }
}

pub(crate) fn create_client<T: FromClientConfig>(entries: Vec<(String, String)>) -> BridgeResult<T> {
    let mut client_config = ClientConfig::new();
    for (key, value) in entries {
        client_config.set(key, value);
    }
    client_config.create().map_err(|e| classify(&e))
}
