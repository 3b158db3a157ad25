//! Broker 连接配置
//!
//! `BrokerSettings` 是外部加载的原始值，`BrokerConfig` 是校验后的不可变配置

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use bridge_common::RetryConfig;
use bridge_errors::{BridgeError, BridgeResult};
use serde::Deserialize;

use crate::security::{SaslSettings, SecurityConfig, SecurityProtocol, SslSettings};

/// 发布的载荷形态，由调用方据此构造消息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishMode {
    /// 完整归档响应
    Archive,
    /// 精简响应摘要
    Response,
}

impl PublishMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishMode::Archive => "archive",
            PublishMode::Response => "response",
        }
    }
}

/// Broker 地址
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

impl FromStr for BrokerAddress {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let entry = s.trim();
        let (host, port) = entry.rsplit_once(':').ok_or_else(|| {
            BridgeError::configuration(format!("broker address '{entry}' must be host:port"))
        })?;

        let bracketed = host.starts_with('[') && host.ends_with(']') && host.len() > 2;
        if host.is_empty() || (!bracketed && host.contains([':', '[', ']'])) {
            return Err(BridgeError::configuration(format!(
                "broker address '{entry}' has an invalid host"
            )));
        }

        let port = port
            .parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| {
                BridgeError::configuration(format!("broker address '{entry}' has an invalid port"))
            })?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// 解析逗号分隔的 broker 列表，保持顺序
pub fn parse_servers(servers: &str) -> BridgeResult<Vec<BrokerAddress>> {
    if servers.trim().is_empty() {
        return Err(BridgeError::configuration("broker list must not be empty"));
    }

    servers.split(',').map(BrokerAddress::from_str).collect()
}

/// 原始 broker 配置（由外部加载器提供）
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerSettings {
    /// 逗号分隔的 broker 地址
    pub servers: String,
    /// 消费者组
    #[serde(default)]
    pub group: String,
    /// Topic
    pub topic: String,
    /// 发布失败后的最大重试次数
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// 是否发布归档形态
    #[serde(default)]
    pub publish_archive: bool,
    /// 客户端 ID
    #[serde(default)]
    pub client_id: Option<String>,
    /// 退避初始延迟（毫秒）
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    /// 退避最大延迟（毫秒）
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// 单次请求超时（毫秒）
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// 消费者会话超时（毫秒）
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
    #[serde(default)]
    pub security_protocol: Option<SecurityProtocol>,
    #[serde(default)]
    pub sasl: Option<SaslSettings>,
    #[serde(default)]
    pub ssl: Option<SslSettings>,
}

fn default_retries() -> u32 {
    3
}

fn default_backoff_initial_ms() -> u64 {
    100
}

fn default_backoff_max_ms() -> u64 {
    5000
}

fn default_request_timeout_ms() -> u64 {
    30000
}

fn default_session_timeout_ms() -> u64 {
    45000
}

impl BrokerSettings {
    pub fn new(
        servers: impl Into<String>,
        group: impl Into<String>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            servers: servers.into(),
            group: group.into(),
            topic: topic.into(),
            retries: default_retries(),
            publish_archive: false,
            client_id: None,
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            session_timeout_ms: default_session_timeout_ms(),
            security_protocol: None,
            sasl: None,
            ssl: None,
        }
    }

    /// 校验并转换为不可变配置
    pub fn into_config(self) -> BridgeResult<BrokerConfig> {
        let topic = self.topic.trim().to_string();
        if topic.is_empty() {
            return Err(BridgeError::configuration("topic must not be empty"));
        }

        let servers = parse_servers(&self.servers)?;

        if self.backoff_initial_ms == 0 {
            return Err(BridgeError::configuration(
                "backoff_initial_ms must be greater than zero",
            ));
        }
        if self.backoff_initial_ms > self.backoff_max_ms {
            return Err(BridgeError::configuration(
                "backoff_initial_ms must not exceed backoff_max_ms",
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(BridgeError::configuration(
                "request_timeout_ms must be greater than zero",
            ));
        }
        if let Some(sasl) = &self.sasl {
            if sasl.username.trim().is_empty() {
                return Err(BridgeError::configuration("sasl username must not be empty"));
            }
        }

        let client_id = self
            .client_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        Ok(BrokerConfig {
            servers,
            group: self.group.trim().to_string(),
            topic,
            retries: self.retries,
            publish_archive: self.publish_archive,
            client_id,
            backoff_initial: Duration::from_millis(self.backoff_initial_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            session_timeout: Duration::from_millis(self.session_timeout_ms),
            security: SecurityConfig::resolve(self.security_protocol, self.sasl, self.ssl),
        })
    }
}

/// 校验后的 broker 配置，构造后不可变
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    servers: Vec<BrokerAddress>,
    group: String,
    topic: String,
    retries: u32,
    publish_archive: bool,
    client_id: Option<String>,
    backoff_initial: Duration,
    backoff_max: Duration,
    request_timeout: Duration,
    session_timeout: Duration,
    security: SecurityConfig,
}

impl BrokerConfig {
    pub fn builder(
        servers: impl Into<String>,
        group: impl Into<String>,
        topic: impl Into<String>,
    ) -> BrokerConfigBuilder {
        BrokerConfigBuilder {
            settings: BrokerSettings::new(servers, group, topic),
        }
    }

    pub fn servers(&self) -> &[BrokerAddress] {
        &self.servers
    }

    /// `bootstrap.servers` 格式
    pub fn bootstrap_servers(&self) -> String {
        self.servers
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn publish_archive(&self) -> bool {
        self.publish_archive
    }

    pub fn publish_mode(&self) -> PublishMode {
        if self.publish_archive {
            PublishMode::Archive
        } else {
            PublishMode::Response
        }
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn session_timeout(&self) -> Duration {
        self.session_timeout
    }

    pub fn security(&self) -> &SecurityConfig {
        &self.security
    }

    /// 发布与重连共用的退避策略
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::from_retries(self.retries, self.backoff_initial, self.backoff_max)
    }
}

/// BrokerConfig 构造器
#[derive(Debug, Clone)]
pub struct BrokerConfigBuilder {
    settings: BrokerSettings,
}

impl BrokerConfigBuilder {
    pub fn retries(mut self, retries: u32) -> Self {
        self.settings.retries = retries;
        self
    }

    pub fn publish_archive(mut self, publish_archive: bool) -> Self {
        self.settings.publish_archive = publish_archive;
        self
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.settings.client_id = Some(client_id.into());
        self
    }

    pub fn backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.settings.backoff_initial_ms = initial.as_millis() as u64;
        self.settings.backoff_max_ms = max.as_millis() as u64;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.settings.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.settings.session_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn security_protocol(mut self, protocol: SecurityProtocol) -> Self {
        self.settings.security_protocol = Some(protocol);
        self
    }

    pub fn sasl(mut self, sasl: SaslSettings) -> Self {
        self.settings.sasl = Some(sasl);
        self
    }

    pub fn ssl(mut self, ssl: SslSettings) -> Self {
        self.settings.ssl = Some(ssl);
        self
    }

    pub fn build(self) -> BridgeResult<BrokerConfig> {
        self.settings.into_config()
    }
}
