//! 消息发布者
//!
//! 瞬时错误按退避重试至多 `retries` 次，永久错误立即失败

use std::time::Duration;

use bridge_common::{RetryConfig, with_conditional_retry};
use bridge_config::{BrokerConfig, PublishMode};
use bridge_errors::{BridgeError, BridgeResult};
use bridge_ports::{Message, ProduceConnection};
use bridge_telemetry::record_publish;
use tracing::{debug, info, warn};

use crate::record::DeliveryResult;

/// 消息发布者，独占一个生产连接
pub struct Publisher<C> {
    connection: C,
    topic: String,
    mode: PublishMode,
    retry: RetryConfig,
    flush_timeout: Duration,
}

impl<C: ProduceConnection> Publisher<C> {
    pub fn new(config: &BrokerConfig, connection: C) -> Self {
        Self {
            connection,
            topic: config.topic().to_string(),
            mode: config.publish_mode(),
            retry: config.retry_config(),
            flush_timeout: config.request_timeout(),
        }
    }

    /// 默认 topic
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// 调用方据此选择载荷形态，发布者本身不解析载荷
    pub fn mode(&self) -> PublishMode {
        self.mode
    }

    /// 发布到默认 topic
    pub async fn send(&self, message: &Message) -> DeliveryResult {
        self.publish(&self.topic, message).await
    }

    /// 发布消息到指定 topic
    pub async fn publish(&self, topic: &str, message: &Message) -> DeliveryResult {
        let topic = topic.trim();
        if topic.is_empty() {
            return self.finish(
                topic,
                DeliveryResult::Failed {
                    error: BridgeError::configuration("topic must not be empty"),
                    attempts: 0,
                },
            );
        }

        if let Err(error) = message.validate() {
            return self.finish(topic, DeliveryResult::Failed { error, attempts: 0 });
        }

        let connection = &self.connection;
        let outcome = with_conditional_retry(
            &self.retry,
            "kafka.publish",
            || connection.send(topic, message),
            BridgeError::is_retryable,
        )
        .await;

        let result = match outcome.result {
            Ok(delivery) => DeliveryResult::Delivered {
                partition: delivery.partition,
                offset: delivery.offset,
                attempts: outcome.attempts,
            },
            Err(error) => DeliveryResult::Failed {
                error,
                attempts: outcome.attempts,
            },
        };

        self.finish(topic, result)
    }

    /// 按顺序逐条发布，遇到第一条失败即停止，
    /// 保证后续消息不会越过失败的消息；返回已尝试消息的结果
    pub async fn publish_batch(&self, topic: &str, messages: &[Message]) -> Vec<DeliveryResult> {
        let mut results = Vec::with_capacity(messages.len());

        for message in messages {
            let result = self.publish(topic, message).await;
            let delivered = result.is_delivered();
            results.push(result);
            if !delivered {
                warn!(
                    topic,
                    published = results.len() - 1,
                    remaining = messages.len() - results.len(),
                    "Batch publish stopped at first failure"
                );
                break;
            }
        }

        results
    }

    /// 刷新在途消息并释放连接
    pub async fn close(self) -> BridgeResult<()> {
        self.connection.flush(self.flush_timeout).await?;
        info!(topic = %self.topic, "Publisher closed");
        Ok(())
    }

    fn finish(&self, topic: &str, result: DeliveryResult) -> DeliveryResult {
        match &result {
            DeliveryResult::Delivered {
                partition,
                offset,
                attempts,
            } => {
                debug!(topic, partition, offset, attempts, "Message published");
            }
            DeliveryResult::Failed { error, attempts } => {
                warn!(
                    topic,
                    attempts,
                    class = error.class().as_str(),
                    error = %error,
                    "Message publish failed"
                );
            }
        }

        record_publish(topic, result.outcome_label(), result.attempts());
        result
    }
}
