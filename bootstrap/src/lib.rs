//! bridge-bootstrap - 启动骨架
//!
//! 运行时初始化、信号处理，以及把 Kafka 连接接入发布者/消费者

mod runtime;
mod starter;

pub use runtime::*;
pub use starter::*;
