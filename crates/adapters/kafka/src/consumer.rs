//! Kafka Consumer
//!
//! 组内订阅、逐条拉取、显式提交；重连时重建客户端

use std::sync::Arc;

use async_trait::async_trait;
use bridge_config::BrokerConfig;
use bridge_errors::{BridgeError, BridgeResult};
use bridge_ports::{FetchConnection, FetchedMessage, HeaderValue, Headers, Message};
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers as _, Message as _};
use rdkafka::{Offset, TopicPartitionList};
use tracing::{debug, info};

use crate::config::ConsumerConfig;
use crate::error::classify;

/// Kafka 消费连接
///
/// 客户端在订阅时按消费者组创建，`reconnect` 丢弃旧客户端
pub struct KafkaConsumer {
    broker: BrokerConfig,
    consumer: Option<Arc<StreamConsumer>>,
    group: Option<String>,
}

impl KafkaConsumer {
    pub fn new(config: &BrokerConfig) -> Self {
        Self {
            broker: config.clone(),
            consumer: None,
            group: None,
        }
    }

    fn active(&self) -> BridgeResult<&Arc<StreamConsumer>> {
        self.consumer
            .as_ref()
            .ok_or_else(|| BridgeError::connection_reset("kafka consumer is not connected"))
    }
}

pub(crate) fn to_fetched(message: &BorrowedMessage<'_>) -> FetchedMessage {
    let mut headers = Headers::new();
    if let Some(borrowed) = message.headers() {
        for header in borrowed.iter() {
            let value = header.value.map(HeaderValue::from_wire).unwrap_or_else(|| {
                HeaderValue::Bytes(Vec::new())
            });
            headers.insert(header.key.to_string(), value);
        }
    }

    FetchedMessage {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        timestamp: message.timestamp().to_millis(),
        message: Message {
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            headers,
            key: message.key().map(<[u8]>::to_vec),
        },
    }
}

#[async_trait]
impl FetchConnection for KafkaConsumer {
    async fn subscribe(&mut self, topic: &str, group: &str) -> BridgeResult<()> {
        if self.consumer.is_none() || self.group.as_deref() != Some(group) {
            let consumer: StreamConsumer = ConsumerConfig::from_broker(&self.broker, group).create()?;
            self.consumer = Some(Arc::new(consumer));
            self.group = Some(group.to_string());
        }

        self.active()?.subscribe(&[topic]).map_err(|e| classify(&e))?;

        info!(topic, group, "Kafka consumer subscribed");
        Ok(())
    }

    async fn fetch(&mut self) -> BridgeResult<FetchedMessage> {
        let message = self.active()?.recv().await.map_err(|e| classify(&e))?;
        Ok(to_fetched(&message))
    }

    async fn commit(&mut self, topic: &str, partition: i32, next_offset: i64) -> BridgeResult<()> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(topic, partition, Offset::Offset(next_offset))
            .map_err(|e| classify(&e))?;

        // 同步提交等待 broker 应答，重平衡、授权等失败才能返回给调用方
        let consumer = Arc::clone(self.active()?);
        tokio::task::spawn_blocking(move || consumer.commit(&offsets, CommitMode::Sync))
            .await
            .map_err(|e| BridgeError::rejected(format!("Commit task failed: {}", e)))?
            .map_err(|e| classify(&e))?;

        debug!(topic, partition, next_offset, "Kafka offset committed");
        Ok(())
    }

    async fn reconnect(&mut self) -> BridgeResult<()> {
        if let Some(consumer) = self.consumer.take() {
            consumer.unsubscribe();
        }
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(consumer) = self.consumer.take() {
            consumer.unsubscribe();
            info!(group = ?self.group, "Kafka consumer closed");
        }
    }
}
