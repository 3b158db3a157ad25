//! ports - 抽象 trait 层
//!
//! 定义消息类型和 broker 连接的抽象接口

mod connection;
mod message;

pub use connection::*;
pub use message::*;
