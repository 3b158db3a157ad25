//! 内存 broker
//!
//! 分区日志 + 消费者组提交位置，支持故障注入。
//! 用于测试和本地开发，语义与 Kafka 的至少一次投递保持一致：
//! 重新订阅后从已提交位置继续，未提交的记录会被再次投递。

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bridge_errors::{BridgeError, BridgeResult};
use bridge_ports::{Delivery, FetchConnection, FetchedMessage, Message, ProduceConnection};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

const DEFAULT_MAX_MESSAGE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone)]
struct StoredRecord {
    message: Message,
    timestamp: i64,
}

struct BrokerState {
    partitions: i32,
    max_message_bytes: usize,
    topics: HashMap<String, Vec<Vec<StoredRecord>>>,
    /// (group, topic, partition) -> 下一读取位置
    committed: HashMap<(String, String, i32), i64>,
    produce_faults: VecDeque<BridgeError>,
    fetch_faults: VecDeque<BridgeError>,
    denied_groups: HashSet<String>,
    produce_attempts: u64,
    round_robin: usize,
}

impl BrokerState {
    fn topic_mut(&mut self, topic: &str) -> &mut Vec<Vec<StoredRecord>> {
        let partitions = self.partitions.max(1) as usize;
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); partitions])
    }

    fn select_partition(&mut self, message: &Message) -> usize {
        let partitions = self.partitions.max(1) as usize;
        match &message.key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % partitions as u64) as usize
            }
            None => {
                let partition = self.round_robin % partitions;
                self.round_robin = self.round_robin.wrapping_add(1);
                partition
            }
        }
    }
}

impl Default for BrokerState {
    fn default() -> Self {
        Self {
            partitions: 1,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            topics: HashMap::new(),
            committed: HashMap::new(),
            produce_faults: VecDeque::new(),
            fetch_faults: VecDeque::new(),
            denied_groups: HashSet::new(),
            produce_attempts: 0,
            round_robin: 0,
        }
    }
}

/// 内存 broker，克隆后共享同一份状态
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 新建 topic 的分区数
    pub fn with_partitions(self, partitions: i32) -> Self {
        self.state.lock().partitions = partitions.max(1);
        self
    }

    /// 单条消息载荷上限
    pub fn with_max_message_bytes(self, limit: usize) -> Self {
        self.state.lock().max_message_bytes = limit;
        self
    }

    /// 后续的投递尝试依次返回这些错误
    pub fn fail_produce(&self, errors: impl IntoIterator<Item = BridgeError>) {
        self.state.lock().produce_faults.extend(errors);
    }

    /// 后续的拉取依次返回这些错误；瞬时错误会断开消费会话
    pub fn fail_fetch(&self, errors: impl IntoIterator<Item = BridgeError>) {
        self.state.lock().fetch_faults.extend(errors);
        self.notify.notify_waiters();
    }

    /// 拒绝该消费者组的订阅与提交
    pub fn deny_group(&self, group: &str) {
        self.state.lock().denied_groups.insert(group.to_string());
        self.notify.notify_waiters();
    }

    /// 累计投递尝试次数（含失败）
    pub fn produce_attempts(&self) -> u64 {
        self.state.lock().produce_attempts
    }

    pub fn committed_offset(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        self.state
            .lock()
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
    }

    /// topic 中的全部消息，按分区顺序排列
    pub fn messages(&self, topic: &str) -> Vec<Message> {
        let state = self.state.lock();
        state
            .topics
            .get(topic)
            .map(|partitions| {
                partitions
                    .iter()
                    .flatten()
                    .map(|record| record.message.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn producer(&self) -> MemoryProducer {
        MemoryProducer {
            broker: self.clone(),
        }
    }

    pub fn consumer(&self) -> MemoryConsumer {
        MemoryConsumer {
            broker: self.clone(),
            session: None,
            connected: true,
        }
    }
}

/// 内存生产连接
#[derive(Clone)]
pub struct MemoryProducer {
    broker: MemoryBroker,
}

#[async_trait]
impl ProduceConnection for MemoryProducer {
    async fn send(&self, topic: &str, message: &Message) -> BridgeResult<Delivery> {
        let delivery = {
            let mut state = self.broker.state.lock();
            state.produce_attempts += 1;

            if let Some(error) = state.produce_faults.pop_front() {
                return Err(error);
            }
            if message.payload.len() > state.max_message_bytes {
                return Err(BridgeError::message_too_large(format!(
                    "{} bytes exceeds limit of {}",
                    message.payload.len(),
                    state.max_message_bytes
                )));
            }

            let partition = state.select_partition(message);
            let log = &mut state.topic_mut(topic)[partition];
            log.push(StoredRecord {
                message: message.clone(),
                timestamp: chrono::Utc::now().timestamp_millis(),
            });

            Delivery {
                partition: partition as i32,
                offset: (log.len() - 1) as i64,
            }
        };

        debug!(
            topic,
            partition = delivery.partition,
            offset = delivery.offset,
            "Appended to memory log"
        );
        self.broker.notify.notify_waiters();
        Ok(delivery)
    }

    async fn flush(&self, _timeout: Duration) -> BridgeResult<()> {
        Ok(())
    }
}

struct Session {
    topic: String,
    group: String,
    /// partition -> 下一读取位置
    positions: Vec<i64>,
}

/// 内存消费连接
///
/// 订阅时所有分区都分配给当前连接
pub struct MemoryConsumer {
    broker: MemoryBroker,
    session: Option<Session>,
    connected: bool,
}

impl MemoryConsumer {
    fn next_record(&mut self) -> BridgeResult<Option<FetchedMessage>> {
        let mut state = self.broker.state.lock();

        if let Some(error) = state.fetch_faults.pop_front() {
            if error.is_retryable() {
                self.connected = false;
                self.session = None;
            }
            return Err(error);
        }
        if !self.connected {
            return Err(BridgeError::connection_reset("memory session dropped"));
        }

        let Some(session) = self.session.as_mut() else {
            return Err(BridgeError::configuration("no active subscription"));
        };
        if state.denied_groups.contains(&session.group) {
            return Err(BridgeError::authorization(format!(
                "group {} is not authorized",
                session.group
            )));
        }

        let Some(partitions) = state.topics.get(&session.topic) else {
            return Ok(None);
        };

        for (partition, log) in partitions.iter().enumerate() {
            let Some(position) = session.positions.get_mut(partition) else {
                continue;
            };
            if let Some(record) = log.get(*position as usize) {
                let fetched = FetchedMessage {
                    topic: session.topic.clone(),
                    partition: partition as i32,
                    offset: *position,
                    timestamp: Some(record.timestamp),
                    message: record.message.clone(),
                };
                *position += 1;
                return Ok(Some(fetched));
            }
        }

        Ok(None)
    }
}

#[async_trait]
impl FetchConnection for MemoryConsumer {
    async fn subscribe(&mut self, topic: &str, group: &str) -> BridgeResult<()> {
        if !self.connected {
            return Err(BridgeError::connection_reset("memory session dropped"));
        }

        let mut state = self.broker.state.lock();
        if state.denied_groups.contains(group) {
            return Err(BridgeError::authorization(format!(
                "group {} is not authorized",
                group
            )));
        }

        let partitions = state.topic_mut(topic).len();
        let positions = (0..partitions)
            .map(|partition| {
                state
                    .committed
                    .get(&(group.to_string(), topic.to_string(), partition as i32))
                    .copied()
                    .unwrap_or(0)
            })
            .collect();

        self.session = Some(Session {
            topic: topic.to_string(),
            group: group.to_string(),
            positions,
        });
        Ok(())
    }

    async fn fetch(&mut self) -> BridgeResult<FetchedMessage> {
        loop {
            let notify = self.broker.notify.clone();
            let notified = notify.notified();
            tokio::pin!(notified);
            // 先登记再检查，避免错过检查与等待之间的追加
            notified.as_mut().enable();

            if let Some(fetched) = self.next_record()? {
                return Ok(fetched);
            }
            notified.await;
        }
    }

    async fn commit(&mut self, topic: &str, partition: i32, next_offset: i64) -> BridgeResult<()> {
        if !self.connected {
            return Err(BridgeError::connection_reset("memory session dropped"));
        }
        let Some(session) = self.session.as_ref() else {
            return Err(BridgeError::configuration("no active subscription"));
        };

        let mut state = self.broker.state.lock();
        if state.denied_groups.contains(&session.group) {
            return Err(BridgeError::authorization(format!(
                "group {} is not authorized",
                session.group
            )));
        }
        state.committed.insert(
            (session.group.clone(), topic.to_string(), partition),
            next_offset,
        );
        Ok(())
    }

    async fn reconnect(&mut self) -> BridgeResult<()> {
        self.session = None;
        self.connected = true;
        Ok(())
    }

    async fn close(&mut self) {
        self.session = None;
        self.connected = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready_ok, task};

    #[tokio::test]
    async fn test_append_assigns_increasing_offsets() {
        let broker = MemoryBroker::new();
        let producer = broker.producer();

        let first = producer.send("t1", &Message::new("a")).await.unwrap();
        let second = producer.send("t1", &Message::new("b")).await.unwrap();

        assert_eq!(first, Delivery { partition: 0, offset: 0 });
        assert_eq!(second, Delivery { partition: 0, offset: 1 });
        assert_eq!(broker.messages("t1").len(), 2);
        assert_eq!(broker.produce_attempts(), 2);
    }

    #[tokio::test]
    async fn test_keyed_messages_share_partition() {
        let broker = MemoryBroker::new().with_partitions(4);
        let producer = broker.producer();

        let a = producer
            .send("t1", &Message::new("a").with_key("scan-1"))
            .await
            .unwrap();
        let b = producer
            .send("t1", &Message::new("b").with_key("scan-1"))
            .await
            .unwrap();

        assert_eq!(a.partition, b.partition);
        assert_eq!(b.offset, a.offset + 1);
    }

    #[tokio::test]
    async fn test_produce_faults_are_consumed_in_order() {
        let broker = MemoryBroker::new();
        broker.fail_produce([
            BridgeError::leader_not_available("election"),
            BridgeError::rejected("bad"),
        ]);
        let producer = broker.producer();

        assert!(producer.send("t1", &Message::new("a")).await.unwrap_err().is_retryable());
        assert!(!producer.send("t1", &Message::new("a")).await.unwrap_err().is_retryable());
        assert!(producer.send("t1", &Message::new("a")).await.is_ok());
        assert_eq!(broker.produce_attempts(), 3);
    }

    #[tokio::test]
    async fn test_oversized_message_rejected() {
        let broker = MemoryBroker::new().with_max_message_bytes(4);
        let err = broker
            .producer()
            .send("t1", &Message::new("too long"))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::MessageTooLarge(_)));
        assert!(broker.messages("t1").is_empty());
    }

    #[tokio::test]
    async fn test_resubscribe_resumes_from_committed_offset() {
        let broker = MemoryBroker::new();
        let producer = broker.producer();
        for payload in ["a", "b", "c"] {
            producer.send("t1", &Message::new(payload)).await.unwrap();
        }

        let mut consumer = broker.consumer();
        consumer.subscribe("t1", "g1").await.unwrap();
        assert_eq!(consumer.fetch().await.unwrap().offset, 0);
        consumer.commit("t1", 0, 1).await.unwrap();
        assert_eq!(consumer.fetch().await.unwrap().offset, 1);

        consumer.reconnect().await.unwrap();
        consumer.subscribe("t1", "g1").await.unwrap();
        let again = consumer.fetch().await.unwrap();
        assert_eq!(again.offset, 1);
        assert_eq!(again.message.payload, b"b");
        assert_eq!(broker.committed_offset("g1", "t1", 0), Some(1));
    }

    #[tokio::test]
    async fn test_transient_fetch_fault_drops_session() {
        let broker = MemoryBroker::new();
        broker.fail_fetch([BridgeError::connection_reset("injected")]);

        let mut consumer = broker.consumer();
        consumer.subscribe("t1", "g1").await.unwrap();
        assert!(consumer.fetch().await.unwrap_err().is_retryable());
        assert!(consumer.commit("t1", 0, 1).await.is_err());
        assert!(consumer.subscribe("t1", "g1").await.is_err());

        consumer.reconnect().await.unwrap();
        assert!(consumer.subscribe("t1", "g1").await.is_ok());
    }

    #[tokio::test]
    async fn test_denied_group_is_authorization_error() {
        let broker = MemoryBroker::new();
        broker.deny_group("g1");

        let mut consumer = broker.consumer();
        let err = consumer.subscribe("t1", "g1").await.unwrap_err();
        assert!(err.is_authorization());
    }

    #[test]
    fn test_fetch_waits_for_append() {
        let broker = MemoryBroker::new();
        let mut consumer = broker.consumer();

        let mut fetch = task::spawn(async move {
            consumer.subscribe("t1", "g1").await?;
            consumer.fetch().await
        });
        assert_pending!(fetch.poll());

        let producer = broker.producer();
        let mut send = task::spawn(async move { producer.send("t1", &Message::new("x")).await });
        assert_ready_ok!(send.poll());

        assert!(fetch.is_woken());
        let fetched = assert_ready_ok!(fetch.poll());
        assert_eq!(fetched.offset, 0);
    }
}
