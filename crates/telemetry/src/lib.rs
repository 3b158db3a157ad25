//! telemetry - 可观测性库

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// 初始化 tracing
pub fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// 初始化 JSON 格式的 tracing（生产环境）
pub fn init_tracing_json(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// 初始化 Prometheus metrics
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// 记录一次发布结果
pub fn record_publish(topic: &str, outcome: &str, attempts: u32) {
    let labels = [
        ("topic", topic.to_string()),
        ("outcome", outcome.to_string()),
    ];

    counter!("bridge_publish_total", &labels).increment(1);
    histogram!("bridge_publish_attempts", &labels).record(attempts as f64);
}

/// 记录交付给调用方的消息
pub fn record_consume(topic: &str) {
    let labels = [("topic", topic.to_string())];

    counter!("bridge_consume_total", &labels).increment(1);
}

/// 记录偏移量提交
pub fn record_commit(topic: &str, success: bool) {
    let labels = [
        ("topic", topic.to_string()),
        ("success", success.to_string()),
    ];

    counter!("bridge_commit_total", &labels).increment(1);
}

/// 记录消费者重连
pub fn record_reconnect(topic: &str) {
    let labels = [("topic", topic.to_string())];

    counter!("bridge_reconnect_total", &labels).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorders_without_exporter() {
        // 未安装 recorder 时为 no-op
        record_publish("t1", "delivered", 1);
        record_consume("t1");
        record_commit("t1", true);
        record_reconnect("t1");
    }
}
