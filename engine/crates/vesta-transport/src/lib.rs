//! headless 帧传输
//!
//! 每条消息由 8 字节的头部和 payload 组成：
//!
//! | 字段 | 类型 |
//! |---|---|
//! | kind | `u32` little endian |
//! | len | `u32` little endian，payload 的字节数 |
//! | payload | `len` 字节 |
//!
//! 引擎发送 [`TransportMessage::PushFrame`]，宿主进程发送其余消息。

pub mod channel;
pub mod codec;
pub mod error;
pub mod message;
pub mod stream;

use std::time::Duration;

pub use channel::ChannelTransport;
pub use error::TransportError;
pub use message::{FramePixels, MessageKind, TransportMessage};
pub use stream::StreamTransport;

/// 双向的消息通道
///
/// 实现需要是 `Clone` 的句柄：render 线程只发送，app 主线程只接收
pub trait FrameTransport: Send {
    fn send(&self, message: &TransportMessage) -> Result<(), TransportError>;

    /// 没有消息时返回 `Ok(None)`，对端关闭时返回 [`TransportError::Closed`]
    fn try_recv(&self) -> Result<Option<TransportMessage>, TransportError>;

    /// 最多等待 `timeout`，超时返回 `Ok(None)`
    fn recv_timeout(&self, timeout: Duration) -> Result<Option<TransportMessage>, TransportError>;
}
