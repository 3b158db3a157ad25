//! 投递结果与消费记录

use bridge_errors::{BridgeError, BridgeResult, ErrorClass};
use bridge_ports::{Delivery, FetchedMessage, Headers, Message};
use tokio::sync::mpsc;

/// 一次发布调用的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
    /// 已投递
    Delivered {
        partition: i32,
        offset: i64,
        attempts: u32,
    },
    /// 投递失败；`attempts` 为 0 表示未发生任何 I/O
    Failed { error: BridgeError, attempts: u32 },
}

impl DeliveryResult {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Delivered { attempts, .. } | Self::Failed { attempts, .. } => *attempts,
        }
    }

    /// 失败分类，成功时为 None
    pub fn class(&self) -> Option<ErrorClass> {
        self.error().map(BridgeError::class)
    }

    pub fn error(&self) -> Option<&BridgeError> {
        match self {
            Self::Delivered { .. } => None,
            Self::Failed { error, .. } => Some(error),
        }
    }

    pub fn into_result(self) -> BridgeResult<Delivery> {
        match self {
            Self::Delivered {
                partition, offset, ..
            } => Ok(Delivery { partition, offset }),
            Self::Failed { error, .. } => Err(error),
        }
    }

    pub(crate) fn outcome_label(&self) -> &'static str {
        match self.class() {
            None => "delivered",
            Some(class) => class.as_str(),
        }
    }
}

/// 待提交的位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CommitRequest {
    pub(crate) topic: String,
    pub(crate) partition: i32,
    pub(crate) offset: i64,
}

/// 确认句柄：调用后由消费者在下一次拉取前提交该偏移量
#[derive(Debug, Clone)]
pub struct AckHandle {
    pub(crate) request: CommitRequest,
    tx: mpsc::UnboundedSender<CommitRequest>,
}

impl AckHandle {
    pub(crate) fn new(request: CommitRequest, tx: mpsc::UnboundedSender<CommitRequest>) -> Self {
        Self { request, tx }
    }

    /// 确认处理完成；消费者会话已结束时返回错误
    pub fn ack(self) -> BridgeResult<()> {
        self.tx
            .send(self.request)
            .map_err(|_| BridgeError::connection_reset("consumer session has ended"))
    }
}

/// 消费到的记录
///
/// 未确认就丢弃的记录不会提交，会在重连或重启后重新投递
#[must_use = "records must be acknowledged to commit their offset"]
#[derive(Debug)]
pub struct ConsumedRecord {
    topic: String,
    partition: i32,
    offset: i64,
    timestamp: Option<i64>,
    message: Message,
    ack: AckHandle,
}

impl ConsumedRecord {
    pub(crate) fn new(fetched: FetchedMessage, tx: mpsc::UnboundedSender<CommitRequest>) -> Self {
        let request = CommitRequest {
            topic: fetched.topic.clone(),
            partition: fetched.partition,
            offset: fetched.offset,
        };
        Self {
            topic: fetched.topic,
            partition: fetched.partition,
            offset: fetched.offset,
            timestamp: fetched.timestamp,
            message: fetched.message,
            ack: AckHandle::new(request, tx),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// 毫秒时间戳
    pub fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    pub fn headers(&self) -> &Headers {
        &self.message.headers
    }

    /// 拆分为消息和确认句柄，便于把处理交给其他任务
    pub fn into_parts(self) -> (Message, AckHandle) {
        (self.message, self.ack)
    }

    /// 确认处理完成
    pub fn ack(self) -> BridgeResult<()> {
        self.ack.ack()
    }

    pub(crate) fn into_commit_request(self) -> CommitRequest {
        self.ack.request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetched(offset: i64) -> FetchedMessage {
        FetchedMessage {
            topic: "t1".to_string(),
            partition: 2,
            offset,
            timestamp: Some(1_700_000_000_000),
            message: Message::new("hello").with_header("source", "scanner"),
        }
    }

    #[test]
    fn test_delivery_result_accessors() {
        let delivered = DeliveryResult::Delivered {
            partition: 0,
            offset: 7,
            attempts: 2,
        };
        assert!(delivered.is_delivered());
        assert_eq!(delivered.attempts(), 2);
        assert_eq!(delivered.class(), None);
        assert_eq!(delivered.outcome_label(), "delivered");
        assert_eq!(
            delivered.into_result().unwrap(),
            Delivery {
                partition: 0,
                offset: 7
            }
        );

        let failed = DeliveryResult::Failed {
            error: BridgeError::timeout("30s"),
            attempts: 4,
        };
        assert!(!failed.is_delivered());
        assert_eq!(failed.class(), Some(ErrorClass::Transient));
        assert_eq!(failed.outcome_label(), "transient");
        assert!(failed.into_result().is_err());
    }

    #[test]
    fn test_record_ack_enqueues_commit() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let record = ConsumedRecord::new(fetched(41), tx);

        assert_eq!(record.topic(), "t1");
        assert_eq!(record.partition(), 2);
        assert_eq!(record.offset(), 41);
        assert_eq!(record.payload(), b"hello");
        assert!(record.headers().contains_key("source"));

        record.ack().unwrap();
        let request = rx.try_recv().unwrap();
        assert_eq!(request.offset, 41);
        assert_eq!(request.partition, 2);
    }

    #[test]
    fn test_ack_after_session_end_fails() {
        let (tx, rx) = mpsc::unbounded_channel();
        let record = ConsumedRecord::new(fetched(1), tx);
        drop(rx);

        let err = record.ack().unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_into_parts_keeps_handle_usable() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (message, handle) = ConsumedRecord::new(fetched(9), tx).into_parts();
        assert_eq!(message.payload, b"hello");

        handle.ack().unwrap();
        assert_eq!(rx.try_recv().unwrap().offset, 9);
    }
}
