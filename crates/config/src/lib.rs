//! bridge-config - 配置加载库

mod broker;
mod security;

pub use broker::*;
pub use security::*;

use bridge_errors::{BridgeError, BridgeResult};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;

/// 遥测配置
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// 输出 JSON 格式日志
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json: false,
        }
    }
}

fn default_app_name() -> String {
    "kafka-bridge".to_string()
}

fn default_app_env() -> String {
    "development".to_string()
}

/// 应用配置
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_app_env")]
    pub app_env: String,
    pub kafka: BrokerSettings,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 依次合并 `default.toml`、`{APP_ENV}.toml` 和 `BRIDGE_` 前缀的环境变量
    /// （嵌套字段用 `__` 分隔，例如 `BRIDGE_KAFKA__RETRIES`）
    pub fn load(config_dir: &str) -> BridgeResult<Self> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| default_app_env());

        let figment = Figment::new()
            .merge(Toml::file(format!("{}/default.toml", config_dir)))
            .merge(Toml::file(format!("{}/{}.toml", config_dir, env)))
            .merge(Env::prefixed("BRIDGE_").split("__"));

        Self::from_figment(figment)
    }

    pub fn from_figment(figment: Figment) -> BridgeResult<Self> {
        figment
            .extract()
            .map_err(|e| BridgeError::configuration(format!("Failed to load config: {}", e)))
    }

    /// 校验 kafka 段并生成 BrokerConfig
    pub fn broker_config(&self) -> BridgeResult<BrokerConfig> {
        self.kafka.clone().into_config()
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }

    /// 是否为开发环境
    pub fn is_development(&self) -> bool {
        self.app_env == "development"
    }
}
