//! bridge-core - 发布者与消费者
//!
//! - 发布：有界重试、按错误分类决定是否重试
//! - 消费：组内订阅、断线自动重连、显式提交偏移量（至少一次）

mod consumer;
mod publisher;
mod record;

pub use consumer::*;
pub use publisher::*;
pub use record::*;

pub use bridge_config::{BrokerConfig, PublishMode};
pub use bridge_errors::{BridgeError, BridgeResult, ErrorClass};
pub use bridge_ports::{Delivery, HeaderValue, Headers, Message};
