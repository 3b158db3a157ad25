//! 消息消费者
//!
//! 以消费者组身份订阅 topic，逐条交付记录，调用方确认后才提交偏移量。
//! 瞬时错误触发带退避的重连与重新订阅，授权失败或关闭信号结束消费序列。

use std::collections::HashMap;
use std::time::Duration;

use bridge_common::{RetryConfig, ShutdownSignal};
use bridge_config::BrokerConfig;
use bridge_errors::{BridgeError, BridgeResult};
use bridge_ports::{FetchConnection, FetchedMessage};
use bridge_telemetry::{record_commit, record_consume, record_reconnect};
use futures::Stream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::record::{CommitRequest, ConsumedRecord};

/// `poll` 的结果
#[derive(Debug)]
pub enum Polled {
    Record(ConsumedRecord),
    /// 超时内没有新消息
    Idle,
    /// 消费序列已结束
    Closed,
}

#[derive(Debug, Clone)]
struct Subscription {
    topic: String,
    group: String,
}

enum Step {
    Record(ConsumedRecord),
    Idle,
    Failed(BridgeError),
    Closed,
}

enum Wake {
    Shutdown,
    Ack(CommitRequest),
    Fetched(Option<BridgeResult<FetchedMessage>>),
}

/// 消息消费者，独占一个消费连接
pub struct Consumer<C> {
    connection: C,
    subscription: Option<Subscription>,
    retry: RetryConfig,
    shutdown: ShutdownSignal,
    ack_tx: mpsc::UnboundedSender<CommitRequest>,
    ack_rx: mpsc::UnboundedReceiver<CommitRequest>,
    /// 每个分区已提交的下一读取位置
    committed: HashMap<(String, i32), i64>,
    session: u64,
    closed: bool,
}

impl<C: FetchConnection> Consumer<C> {
    pub fn new(config: &BrokerConfig, connection: C, shutdown: ShutdownSignal) -> Self {
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        Self {
            connection,
            subscription: None,
            retry: config.retry_config(),
            shutdown,
            ack_tx,
            ack_rx,
            committed: HashMap::new(),
            session: 0,
            closed: false,
        }
    }

    /// 创建并订阅配置中的 topic 与消费者组
    pub async fn connect(
        config: &BrokerConfig,
        connection: C,
        shutdown: ShutdownSignal,
    ) -> BridgeResult<Self> {
        let mut consumer = Self::new(config, connection, shutdown);
        consumer.subscribe(config.topic(), config.group()).await?;
        Ok(consumer)
    }

    /// 加入消费者组并订阅 topic
    pub async fn subscribe(&mut self, topic: &str, group: &str) -> BridgeResult<()> {
        let topic = topic.trim();
        let group = group.trim();
        if topic.is_empty() {
            return Err(BridgeError::configuration("topic must not be empty"));
        }
        if group.is_empty() {
            return Err(BridgeError::configuration("consumer group must not be empty"));
        }
        if self.closed {
            return Err(BridgeError::configuration("consumer has been closed"));
        }

        self.subscription = Some(Subscription {
            topic: topic.to_string(),
            group: group.to_string(),
        });

        match self.connection.subscribe(topic, group).await {
            Ok(()) => {}
            Err(e) if e.is_retryable() => {
                warn!(topic, group, error = %e, "Subscribe failed, reconnecting");
                if !self.reconnect().await? {
                    self.close().await?;
                    return Ok(());
                }
            }
            Err(e) => {
                self.subscription = None;
                return Err(e);
            }
        }

        info!(topic, group, "Consumer subscribed");
        Ok(())
    }

    /// 下一条记录；`None` 表示消费序列已结束
    pub async fn next(&mut self) -> Option<BridgeResult<ConsumedRecord>> {
        loop {
            match self.advance(None).await {
                Step::Record(record) => return Some(Ok(record)),
                Step::Failed(e) => return Some(Err(e)),
                Step::Closed => return None,
                Step::Idle => continue,
            }
        }
    }

    /// 在超时内等待下一条记录
    pub async fn poll(&mut self, timeout: Duration) -> BridgeResult<Polled> {
        match self.advance(Some(timeout)).await {
            Step::Record(record) => Ok(Polled::Record(record)),
            Step::Idle => Ok(Polled::Idle),
            Step::Closed => Ok(Polled::Closed),
            Step::Failed(e) => Err(e),
        }
    }

    /// 立即提交该记录（先提交此前通过 `ack` 确认的记录）
    pub async fn commit(&mut self, record: ConsumedRecord) -> BridgeResult<()> {
        self.apply_pending_acks().await?;
        self.apply_commit(record.into_commit_request()).await
    }

    /// 提交待确认的偏移量并释放连接
    pub async fn close(&mut self) -> BridgeResult<()> {
        if self.closed {
            return Ok(());
        }

        // 先关闭接收端，之后的 ack 直接返回错误，已排队的仍会提交
        self.ack_rx.close();
        let result = self.apply_pending_acks().await;
        self.connection.close().await;
        self.closed = true;
        info!(session = self.session, "Consumer closed");
        result
    }

    /// 转换为 `Stream`，确认句柄在下一次拉取时生效
    pub fn into_stream(self) -> impl Stream<Item = BridgeResult<ConsumedRecord>> {
        futures::stream::unfold(self, |mut consumer| async move {
            consumer.next().await.map(|item| (item, consumer))
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// 重连次数
    pub fn session(&self) -> u64 {
        self.session
    }

    /// 分区已提交的下一读取位置
    pub fn committed_offset(&self, topic: &str, partition: i32) -> Option<i64> {
        self.committed
            .get(&(topic.to_string(), partition))
            .copied()
    }

    async fn advance(&mut self, timeout: Option<Duration>) -> Step {
        let deadline = timeout.map(|limit| Instant::now() + limit);
        loop {
            if self.closed {
                return Step::Closed;
            }
            if self.shutdown.is_shutdown() {
                return self.finish().await;
            }
            if self.subscription.is_none() {
                return Step::Failed(BridgeError::configuration("consumer is not subscribed"));
            }
            if let Err(e) = self.apply_pending_acks().await {
                if e.is_authorization() {
                    self.terminate(&e).await;
                }
                return Step::Failed(e);
            }

            // 等待拉取期间到达的 ack 立即提交
            let wake = {
                let connection = &mut self.connection;
                let shutdown = &mut self.shutdown;
                let acks = &mut self.ack_rx;
                tokio::select! {
                    biased;
                    _ = shutdown.wait() => Wake::Shutdown,
                    Some(request) = acks.recv() => Wake::Ack(request),
                    result = fetch_within(connection, deadline) => Wake::Fetched(result),
                }
            };

            let result = match wake {
                Wake::Shutdown => return self.finish().await,
                Wake::Ack(request) => {
                    if let Err(e) = self.apply_commit(request).await {
                        if e.is_authorization() {
                            self.terminate(&e).await;
                        }
                        return Step::Failed(e);
                    }
                    continue;
                }
                Wake::Fetched(None) => return Step::Idle,
                Wake::Fetched(Some(result)) => result,
            };

            match result {
                Ok(fetched) => {
                    if self.shutdown.is_shutdown() {
                        // 未交付的记录保持未提交，下次会话重新投递
                        return self.finish().await;
                    }
                    if self.is_committed(&fetched) {
                        debug!(
                            topic = %fetched.topic,
                            partition = fetched.partition,
                            offset = fetched.offset,
                            "Skipping record below committed offset"
                        );
                        continue;
                    }
                    return Step::Record(self.deliver(fetched));
                }
                Err(e) if e.is_authorization() => {
                    self.terminate(&e).await;
                    return Step::Failed(e);
                }
                Err(e) if e.is_retryable() => {
                    warn!(error = %e, session = self.session, "Fetch failed, reconnecting");
                    match self.reconnect().await {
                        Ok(true) => continue,
                        Ok(false) => return self.finish().await,
                        Err(e) => {
                            self.terminate(&e).await;
                            return Step::Failed(e);
                        }
                    }
                }
                Err(e) => return Step::Failed(e),
            }
        }
    }

    /// 带退避重连并重新订阅；返回 false 表示等待期间收到关闭信号
    async fn reconnect(&mut self) -> BridgeResult<bool> {
        let Some(subscription) = self.subscription.clone() else {
            return Err(BridgeError::configuration("consumer is not subscribed"));
        };

        let mut attempt: u32 = 0;
        loop {
            let delay = self.retry.delay_for_attempt(attempt);
            let interrupted = {
                let shutdown = &mut self.shutdown;
                tokio::select! {
                    biased;
                    _ = shutdown.wait() => true,
                    _ = tokio::time::sleep(delay) => false,
                }
            };
            if interrupted {
                return Ok(false);
            }

            attempt = attempt.saturating_add(1);
            let result = match self.connection.reconnect().await {
                Ok(()) => {
                    self.connection
                        .subscribe(&subscription.topic, &subscription.group)
                        .await
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => {
                    self.session += 1;
                    record_reconnect(&subscription.topic);
                    info!(
                        topic = %subscription.topic,
                        group = %subscription.group,
                        attempt,
                        session = self.session,
                        "Consumer reconnected"
                    );
                    return Ok(true);
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        topic = %subscription.topic,
                        attempt,
                        error = %e,
                        "Reconnect failed, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn is_committed(&self, fetched: &FetchedMessage) -> bool {
        self.committed
            .get(&(fetched.topic.clone(), fetched.partition))
            .is_some_and(|next| fetched.offset < *next)
    }

    fn deliver(&self, fetched: FetchedMessage) -> ConsumedRecord {
        debug!(
            topic = %fetched.topic,
            partition = fetched.partition,
            offset = fetched.offset,
            "Record received"
        );
        record_consume(&fetched.topic);
        ConsumedRecord::new(fetched, self.ack_tx.clone())
    }

    async fn apply_pending_acks(&mut self) -> BridgeResult<()> {
        while let Ok(request) = self.ack_rx.try_recv() {
            self.apply_commit(request).await?;
        }
        Ok(())
    }

    /// 偏移量按分区单调提交，低于已提交位置的确认直接忽略
    async fn apply_commit(&mut self, request: CommitRequest) -> BridgeResult<()> {
        let next_offset = request.offset + 1;
        let key = (request.topic, request.partition);

        if self
            .committed
            .get(&key)
            .is_some_and(|committed| next_offset <= *committed)
        {
            debug!(
                topic = %key.0,
                partition = key.1,
                offset = request.offset,
                "Offset already committed"
            );
            return Ok(());
        }

        match self.connection.commit(&key.0, key.1, next_offset).await {
            Ok(()) => {
                record_commit(&key.0, true);
                debug!(
                    topic = %key.0,
                    partition = key.1,
                    next_offset,
                    "Offset committed"
                );
                self.committed.insert(key, next_offset);
                Ok(())
            }
            Err(e) => {
                record_commit(&key.0, false);
                warn!(
                    topic = %key.0,
                    partition = key.1,
                    offset = request.offset,
                    error = %e,
                    "Failed to commit offset"
                );
                Err(e)
            }
        }
    }

    /// 正常结束：提交待确认偏移量后关闭
    async fn finish(&mut self) -> Step {
        match self.close().await {
            Ok(()) => Step::Closed,
            Err(e) => Step::Failed(e),
        }
    }

    /// 不可恢复错误：不再提交，直接释放连接
    async fn terminate(&mut self, cause: &BridgeError) {
        if self.closed {
            return;
        }

        self.ack_rx.close();
        let mut pending = 0;
        while self.ack_rx.try_recv().is_ok() {
            pending += 1;
        }

        error!(
            error = %cause,
            class = cause.class().as_str(),
            pending_acks = pending,
            "Consumer terminated"
        );
        self.connection.close().await;
        self.closed = true;
    }
}

async fn fetch_within<C: FetchConnection>(
    connection: &mut C,
    deadline: Option<Instant>,
) -> Option<BridgeResult<FetchedMessage>> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, connection.fetch())
            .await
            .ok(),
        None => Some(connection.fetch().await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_common::ShutdownController;
    use bridge_errors::ErrorClass;
    use bridge_ports::{Message, MockFetchConnection};
    use mockall::Sequence;

    fn config() -> BrokerConfig {
        BrokerConfig::builder("localhost:9092", "g1", "t1")
            .backoff(Duration::from_millis(1), Duration::from_millis(4))
            .build()
            .unwrap()
    }

    fn fetched(offset: i64) -> FetchedMessage {
        FetchedMessage {
            topic: "t1".to_string(),
            partition: 0,
            offset,
            timestamp: None,
            message: Message::new(format!("m{offset}")),
        }
    }

    #[tokio::test]
    async fn test_subscribe_rejects_empty_names() {
        let mut connection = MockFetchConnection::new();
        connection.expect_subscribe().never();

        let mut consumer = Consumer::new(&config(), connection, ShutdownSignal::never());
        let err = consumer.subscribe("", "g1").await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Configuration);
        let err = consumer.subscribe("t1", " ").await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Configuration);
    }

    #[tokio::test]
    async fn test_next_before_subscribe_is_configuration_error() {
        let mut consumer =
            Consumer::new(&config(), MockFetchConnection::new(), ShutdownSignal::never());
        let err = consumer.next().await.unwrap().unwrap_err();
        assert_eq!(err.class(), ErrorClass::Configuration);
    }

    #[tokio::test]
    async fn test_authorization_failure_ends_sequence() {
        let mut connection = MockFetchConnection::new();
        connection.expect_subscribe().times(1).returning(|_, _| Ok(()));
        connection
            .expect_fetch()
            .times(1)
            .returning(|| Err(BridgeError::authorization("group denied")));
        connection.expect_close().times(1).return_const(());

        let mut consumer = Consumer::connect(&config(), connection, ShutdownSignal::never())
            .await
            .unwrap();

        let err = consumer.next().await.unwrap().unwrap_err();
        assert!(err.is_authorization());
        assert!(consumer.next().await.is_none());
        assert!(consumer.is_closed());
    }

    #[tokio::test]
    async fn test_transient_fetch_error_reconnects() {
        let mut seq = Sequence::new();
        let mut connection = MockFetchConnection::new();
        connection
            .expect_subscribe()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        connection
            .expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err(BridgeError::connection_reset("peer closed")));
        connection
            .expect_reconnect()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err(BridgeError::broker_unavailable("still down")));
        connection
            .expect_reconnect()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        connection
            .expect_subscribe()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        connection
            .expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(fetched(0)));

        let mut consumer = Consumer::connect(&config(), connection, ShutdownSignal::never())
            .await
            .unwrap();

        let record = consumer.next().await.unwrap().unwrap();
        assert_eq!(record.offset(), 0);
        assert_eq!(consumer.session(), 1);
        drop(record);
    }

    #[tokio::test]
    async fn test_permanent_fetch_error_is_surfaced_and_sequence_continues() {
        let mut seq = Sequence::new();
        let mut connection = MockFetchConnection::new();
        connection
            .expect_subscribe()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        connection
            .expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err(BridgeError::message_too_large("fetch limit")));
        connection
            .expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(fetched(3)));

        let mut consumer = Consumer::connect(&config(), connection, ShutdownSignal::never())
            .await
            .unwrap();

        let err = consumer.next().await.unwrap().unwrap_err();
        assert_eq!(err.class(), ErrorClass::Permanent);
        let record = consumer.next().await.unwrap().unwrap();
        assert_eq!(record.offset(), 3);
        drop(record);
    }

    #[tokio::test]
    async fn test_commit_is_monotonic_per_partition() {
        let mut connection = MockFetchConnection::new();
        connection.expect_subscribe().returning(|_, _| Ok(()));
        let mut offsets = vec![5, 2, 6].into_iter();
        connection
            .expect_fetch()
            .times(3)
            .returning(move || Ok(fetched(offsets.next().unwrap_or_default())));
        connection
            .expect_commit()
            .withf(|topic, partition, next| topic == "t1" && *partition == 0 && *next == 6)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut consumer = Consumer::connect(&config(), connection, ShutdownSignal::never())
            .await
            .unwrap();

        let first = consumer.next().await.unwrap().unwrap();
        consumer.commit(first).await.unwrap();
        assert_eq!(consumer.committed_offset("t1", 0), Some(6));

        // offset 2 低于已提交位置，被跳过
        match consumer.poll(Duration::from_millis(20)).await {
            Ok(Polled::Record(record)) => assert_eq!(record.offset(), 6),
            other => panic!("unexpected poll result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_commit_failure_is_reported() {
        let mut connection = MockFetchConnection::new();
        connection.expect_subscribe().returning(|_, _| Ok(()));
        connection.expect_fetch().times(1).returning(|| Ok(fetched(0)));
        connection
            .expect_commit()
            .times(1)
            .returning(|_, _, _| Err(BridgeError::timeout("commit timed out")));

        let mut consumer = Consumer::connect(&config(), connection, ShutdownSignal::never())
            .await
            .unwrap();

        let record = consumer.next().await.unwrap().unwrap();
        let err = consumer.commit(record).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(consumer.committed_offset("t1", 0), None);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_acks_and_closes() {
        let controller = ShutdownController::new();
        let mut connection = MockFetchConnection::new();
        connection.expect_subscribe().returning(|_, _| Ok(()));
        connection.expect_fetch().times(1).returning(|| Ok(fetched(0)));
        connection
            .expect_commit()
            .withf(|_, _, next| *next == 1)
            .times(1)
            .returning(|_, _, _| Ok(()));
        connection.expect_close().times(1).return_const(());

        let mut consumer = Consumer::connect(&config(), connection, controller.signal())
            .await
            .unwrap();

        let record = consumer.next().await.unwrap().unwrap();
        record.ack().unwrap();
        controller.shutdown();

        assert!(consumer.next().await.is_none());
        assert!(consumer.is_closed());
        assert_eq!(consumer.committed_offset("t1", 0), Some(1));
    }
}
