//! Broker 连接 trait 定义
//!
//! 每个发布者/消费者独占一个连接

use std::time::Duration;

use async_trait::async_trait;
use bridge_errors::BridgeResult;

use crate::message::{Delivery, FetchedMessage, Message};

/// 生产连接：单次投递尝试，不做重试
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait ProduceConnection: Send + Sync {
    /// 投递一条消息，返回分区与偏移量
    async fn send(&self, topic: &str, message: &Message) -> BridgeResult<Delivery>;

    /// 等待在途消息完成
    async fn flush(&self, timeout: Duration) -> BridgeResult<()>;
}

/// 消费连接：组内订阅、拉取与提交
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait FetchConnection: Send {
    /// 以消费者组身份订阅 topic，分区分配交给 broker
    async fn subscribe(&mut self, topic: &str, group: &str) -> BridgeResult<()>;

    /// 拉取下一条消息，无消息时挂起
    ///
    /// 实现必须可安全取消：future 被丢弃时不能丢失或推进位置
    async fn fetch(&mut self) -> BridgeResult<FetchedMessage>;

    /// 提交下一次应读取的偏移量（已处理偏移量 + 1）
    async fn commit(&mut self, topic: &str, partition: i32, next_offset: i64) -> BridgeResult<()>;

    /// 丢弃当前会话并重新建立连接，之后需要重新订阅
    async fn reconnect(&mut self) -> BridgeResult<()>;

    /// 释放连接
    async fn close(&mut self);
}
