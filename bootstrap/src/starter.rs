//! 连接装配
//!
//! 用 rdkafka 连接构造发布者和消费者

use bridge_adapter_kafka::{KafkaConsumer, KafkaProducer, check_kafka_health_async};
use bridge_common::ShutdownSignal;
use bridge_config::BrokerConfig;
use bridge_core::{Consumer, Publisher};
use bridge_errors::BridgeResult;
use tracing::{info, warn};

/// 基于 Kafka 的发布者
pub type KafkaPublisher = Publisher<KafkaProducer>;

/// 基于 Kafka 的消费者
pub type KafkaBridgeConsumer = Consumer<KafkaConsumer>;

/// 创建发布者，默认 topic 取自配置
pub fn connect_publisher(config: &BrokerConfig) -> BridgeResult<KafkaPublisher> {
    let producer = KafkaProducer::new(config)?;

    info!(
        brokers = %config.bootstrap_servers(),
        topic = config.topic(),
        mode = config.publish_mode().as_str(),
        "Publisher connected"
    );

    Ok(Publisher::new(config, producer))
}

/// 创建消费者并订阅配置中的 topic 与消费者组
pub async fn connect_consumer(
    config: &BrokerConfig,
    shutdown: ShutdownSignal,
) -> BridgeResult<KafkaBridgeConsumer> {
    Consumer::connect(config, KafkaConsumer::new(config), shutdown).await
}

/// 启动前探测 broker，失败只记录告警
pub async fn probe_brokers(config: &BrokerConfig) -> bool {
    match check_kafka_health_async(config.clone()).await {
        Ok(health) if health.healthy => {
            info!(
                brokers = health.broker_count,
                latency_ms = ?health.latency_ms,
                "Kafka brokers reachable"
            );
            true
        }
        Ok(health) => {
            warn!(error = ?health.error, "Kafka brokers unreachable");
            false
        }
        Err(e) => {
            warn!(error = %e, "Kafka health check failed");
            false
        }
    }
}
