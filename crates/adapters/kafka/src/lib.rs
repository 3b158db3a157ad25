//! adapter-kafka - Kafka 适配器
//!
//! 基于 rdkafka 实现生产/消费连接：
//! - 客户端配置映射（SASL、SSL、超时）
//! - 错误分类（瞬时 / 永久 / 配置）
//! - 健康检查

mod config;
mod consumer;
mod error;
mod health;
mod producer;

pub use config::*;
pub use consumer::*;
pub use error::*;
pub use health::*;
pub use producer::*;
