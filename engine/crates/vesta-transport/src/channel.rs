use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::{FrameTransport, error::TransportError, message::TransportMessage};

/// 进程内的 transport，一端给引擎，一端模拟宿主
///
/// 消息经过 codec 编码再解码，和真实连接的行为一致
#[derive(Clone)]
pub struct ChannelTransport {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

impl ChannelTransport {
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = crossbeam_channel::unbounded();
        let (b_tx, a_rx) = crossbeam_channel::unbounded();
        (Self { tx: a_tx, rx: a_rx }, Self { tx: b_tx, rx: b_rx })
    }

    /// 对端还没有读取的消息数量
    #[inline]
    pub fn pending_outgoing(&self) -> usize {
        self.tx.len()
    }

    fn decode(bytes: Vec<u8>) -> Result<Option<TransportMessage>, TransportError> {
        crate::codec::read_message(&mut bytes.as_slice())
    }
}

impl FrameTransport for ChannelTransport {
    fn send(&self, message: &TransportMessage) -> Result<(), TransportError> {
        let bytes = crate::codec::encode_message(message)?;
        self.tx.send(bytes).map_err(|_| TransportError::Closed)
    }

    fn try_recv(&self) -> Result<Option<TransportMessage>, TransportError> {
        match self.rx.try_recv() {
            Ok(bytes) => Self::decode(bytes),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(TransportError::Closed),
        }
    }

    fn recv_timeout(&self, timeout: Duration) -> Result<Option<TransportMessage>, TransportError> {
        match self.rx.recv_timeout(timeout) {
            Ok(bytes) => Self::decode(bytes),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_is_bidirectional() {
        let (engine, host) = ChannelTransport::pair();
        host.send(&TransportMessage::Resize { width: 3, height: 2 }).unwrap();
        engine.send(&TransportMessage::Close).unwrap();

        assert_eq!(engine.pending_outgoing(), 1);
        assert_eq!(engine.try_recv().unwrap(), Some(TransportMessage::Resize { width: 3, height: 2 }));
        assert_eq!(engine.try_recv().unwrap(), None);
        assert_eq!(host.recv_timeout(Duration::from_millis(10)).unwrap(), Some(TransportMessage::Close));
    }

    #[test]
    fn test_dropped_peer_reports_closed() {
        let (engine, host) = ChannelTransport::pair();
        drop(host);
        assert!(matches!(engine.try_recv(), Err(TransportError::Closed)));
        assert!(matches!(engine.send(&TransportMessage::Close), Err(TransportError::Closed)));
    }
}
