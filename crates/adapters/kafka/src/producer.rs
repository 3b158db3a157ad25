//! Kafka Producer
//!
//! 单次投递尝试，重试交给发布者

use std::time::Duration;

use async_trait::async_trait;
use bridge_config::BrokerConfig;
use bridge_errors::BridgeResult;
use bridge_ports::{Delivery, Headers, Message, ProduceConnection};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use tracing::{debug, info};

use crate::config::ProducerConfig;
use crate::error::classify;

/// Kafka 生产连接
pub struct KafkaProducer {
    producer: FutureProducer,
    timeout: Duration,
}

impl KafkaProducer {
    pub fn new(config: &BrokerConfig) -> BridgeResult<Self> {
        Self::from_producer_config(&ProducerConfig::from_broker(config))
    }

    /// 从完整配置创建
    pub fn from_producer_config(config: &ProducerConfig) -> BridgeResult<Self> {
        let producer: FutureProducer = config.create()?;

        info!(brokers = %config.base.brokers, "Kafka producer created");

        Ok(Self {
            producer,
            timeout: config.message_timeout,
        })
    }

    /// 获取内部 producer（用于高级操作）
    pub fn inner(&self) -> &FutureProducer {
        &self.producer
    }
}

pub(crate) fn to_kafka_headers(headers: &Headers) -> OwnedHeaders {
    headers
        .iter()
        .fold(OwnedHeaders::new_with_capacity(headers.len()), |acc, (key, value)| {
            acc.insert(Header {
                key: key.as_str(),
                value: Some(value.as_bytes()),
            })
        })
}

#[async_trait]
impl ProduceConnection for KafkaProducer {
    async fn send(&self, topic: &str, message: &Message) -> BridgeResult<Delivery> {
        let mut record: FutureRecord<'_, Vec<u8>, Vec<u8>> = FutureRecord::to(topic)
            .payload(&message.payload)
            .headers(to_kafka_headers(&message.headers));
        if let Some(key) = &message.key {
            record = record.key(key);
        }

        let (partition, offset) = self
            .producer
            .send(record, Timeout::After(self.timeout))
            .await
            .map_err(|(e, _)| classify(&e))?;

        debug!(topic, partition, offset, "Kafka record acknowledged");

        Ok(Delivery { partition, offset })
    }

    async fn flush(&self, timeout: Duration) -> BridgeResult<()> {
        self.producer
            .flush(Timeout::After(timeout))
            .map_err(|e| classify(&e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdkafka::message::Headers as _;

    #[test]
    fn test_headers_mapping() {
        let message = Message::new("hello")
            .with_header("content-type", "application/json")
            .with_header("trace", vec![0u8, 1, 2]);

        let headers = to_kafka_headers(&message.headers);
        assert_eq!(headers.count(), 2);

        let collected: Vec<_> = headers
            .iter()
            .map(|h| (h.key.to_string(), h.value.map(<[u8]>::to_vec)))
            .collect();
        assert!(collected.contains(&(
            "content-type".to_string(),
            Some(b"application/json".to_vec())
        )));
        assert!(collected.contains(&("trace".to_string(), Some(vec![0, 1, 2]))));
    }

    #[tokio::test]
    #[ignore] // 需要 Kafka 实例
    async fn test_send_to_local_broker() {
        let config = BrokerConfig::builder("localhost:9092", "g1", "t1")
            .build()
            .unwrap();
        let producer = KafkaProducer::new(&config).unwrap();

        let delivery = producer.send("t1", &Message::new("hello")).await.unwrap();
        assert!(delivery.offset >= 0);
        producer.flush(Duration::from_secs(5)).await.unwrap();
    }
}
