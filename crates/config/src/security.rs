//! 安全配置：协议、SASL、SSL

use secrecy::Secret;
use serde::Deserialize;

/// Kafka 安全协议
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityProtocol {
    /// 明文（默认）
    #[default]
    Plaintext,
    /// SSL
    Ssl,
    /// SASL 明文
    SaslPlaintext,
    /// SASL SSL
    SaslSsl,
}

impl SecurityProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityProtocol::Plaintext => "plaintext",
            SecurityProtocol::Ssl => "ssl",
            SecurityProtocol::SaslPlaintext => "sasl_plaintext",
            SecurityProtocol::SaslSsl => "sasl_ssl",
        }
    }
}

/// SASL 认证机制
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum SaslMechanism {
    #[serde(rename = "PLAIN", alias = "plain")]
    Plain,
    #[serde(rename = "SCRAM-SHA-256", alias = "scram-sha-256")]
    ScramSha256,
    #[serde(rename = "SCRAM-SHA-512", alias = "scram-sha-512")]
    ScramSha512,
}

impl SaslMechanism {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaslMechanism::Plain => "PLAIN",
            SaslMechanism::ScramSha256 => "SCRAM-SHA-256",
            SaslMechanism::ScramSha512 => "SCRAM-SHA-512",
        }
    }
}

/// SASL 配置
#[derive(Debug, Clone, Deserialize)]
pub struct SaslSettings {
    /// 认证机制
    pub mechanism: SaslMechanism,
    /// 用户名
    pub username: String,
    /// 密码
    pub password: Secret<String>,
}

impl SaslSettings {
    pub fn plain(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            mechanism: SaslMechanism::Plain,
            username: username.into(),
            password: Secret::new(password.into()),
        }
    }

    pub fn scram_sha512(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            mechanism: SaslMechanism::ScramSha512,
            username: username.into(),
            password: Secret::new(password.into()),
        }
    }
}

/// SSL 配置
#[derive(Debug, Clone, Deserialize)]
pub struct SslSettings {
    /// CA 证书路径
    #[serde(default)]
    pub ca_location: Option<String>,
    /// 客户端证书路径
    #[serde(default)]
    pub certificate_location: Option<String>,
    /// 客户端私钥路径
    #[serde(default)]
    pub key_location: Option<String>,
    /// 私钥密码
    #[serde(default)]
    pub key_password: Option<Secret<String>>,
    /// 是否验证服务器证书
    #[serde(default = "default_enable_verification")]
    pub enable_verification: bool,
}

fn default_enable_verification() -> bool {
    true
}

impl Default for SslSettings {
    fn default() -> Self {
        Self {
            ca_location: None,
            certificate_location: None,
            key_location: None,
            key_password: None,
            enable_verification: true,
        }
    }
}

impl SslSettings {
    pub fn with_ca(mut self, ca_location: impl Into<String>) -> Self {
        self.ca_location = Some(ca_location.into());
        self
    }

    pub fn with_client_cert(
        mut self,
        cert_location: impl Into<String>,
        key_location: impl Into<String>,
    ) -> Self {
        self.certificate_location = Some(cert_location.into());
        self.key_location = Some(key_location.into());
        self
    }

    pub fn without_verification(mut self) -> Self {
        self.enable_verification = false;
        self
    }
}

/// 已解析的安全配置
#[derive(Debug, Clone, Default)]
pub struct SecurityConfig {
    pub protocol: SecurityProtocol,
    pub sasl: Option<SaslSettings>,
    pub ssl: Option<SslSettings>,
}

impl SecurityConfig {
    /// 未显式指定协议时，根据 SASL/SSL 是否存在推断
    pub(crate) fn resolve(
        protocol: Option<SecurityProtocol>,
        sasl: Option<SaslSettings>,
        ssl: Option<SslSettings>,
    ) -> Self {
        let protocol = protocol.unwrap_or(match (sasl.is_some(), ssl.is_some()) {
            (true, true) => SecurityProtocol::SaslSsl,
            (true, false) => SecurityProtocol::SaslPlaintext,
            (false, true) => SecurityProtocol::Ssl,
            (false, false) => SecurityProtocol::Plaintext,
        });
        Self {
            protocol,
            sasl,
            ssl,
        }
    }
}
