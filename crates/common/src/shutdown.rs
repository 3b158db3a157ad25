//! Graceful Shutdown

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

/// Shutdown 控制器
#[derive(Clone)]
pub struct ShutdownController {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// 触发关闭
    pub fn shutdown(&self) {
        info!("Triggering shutdown");
        self.tx.send_replace(true);
    }

    /// 是否已触发关闭
    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }

    /// 创建关闭信号（可交给消费者等组件）
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// 关闭信号接收端
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// 永不触发的信号
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        // 发送端丢弃后 wait 永远挂起
        drop(tx);
        Self { rx }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// 等待关闭信号
    pub async fn wait(&mut self) {
        if self.rx.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
