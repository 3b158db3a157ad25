//! common - 重试与关闭控制等通用工具

pub mod retry;
pub mod shutdown;

pub use retry::*;
pub use shutdown::*;
