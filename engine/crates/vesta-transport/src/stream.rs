use std::{
    io::{BufWriter, Read, Write},
    net::{Shutdown, TcpStream, ToSocketAddrs},
    sync::Arc,
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use parking_lot::Mutex;

use crate::{FrameTransport, codec, error::TransportError, message::TransportMessage};

type Incoming = Result<TransportMessage, TransportError>;

/// 基于字节流的 transport
///
/// 后台线程负责阻塞读取并解码，通过 channel 交给 [`try_recv`](FrameTransport::try_recv)；
/// 发送在调用线程完成，每条消息写完后 flush
pub struct StreamTransport<W: Write + Send> {
    writer: Arc<Mutex<BufWriter<W>>>,
    incoming: Receiver<Incoming>,
}

impl<W: Write + Send> Clone for StreamTransport<W> {
    fn clone(&self) -> Self {
        Self {
            writer: self.writer.clone(),
            incoming: self.incoming.clone(),
        }
    }
}

// new & init
impl<W: Write + Send> StreamTransport<W> {
    pub fn new<R: Read + Send + 'static>(reader: R, writer: W) -> Result<Self, TransportError> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let _reader = std::thread::Builder::new().name("vesta-transport-reader".to_string()).spawn(move || {
            let mut reader = reader;
            loop {
                match codec::read_message(&mut reader) {
                    Ok(Some(message)) => {
                        if tx.send(Ok(message)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        log::info!("transport stream reached end of file");
                        break;
                    }
                    Err(e) => {
                        log::error!("transport reader stopped: {e}");
                        let _ = tx.send(Err(e.closed_if_disconnected()));
                        break;
                    }
                }
            }
        })?;

        Ok(Self {
            writer: Arc::new(Mutex::new(BufWriter::new(writer))),
            incoming: rx,
        })
    }
}

impl StreamTransport<TcpStream> {
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        log::info!("transport connected to {}", stream.peer_addr()?);
        let reader = stream.try_clone()?;
        Self::new(reader, stream)
    }

    /// 关闭 socket，后台读线程随之退出
    pub fn shutdown(&self) {
        let writer = self.writer.lock();
        if let Err(e) = writer.get_ref().shutdown(Shutdown::Both) {
            log::warn!("failed to shutdown transport socket: {e}");
        }
    }
}

impl<W: Write + Send> StreamTransport<W> {
    fn map_incoming(incoming: Incoming) -> Result<Option<TransportMessage>, TransportError> {
        incoming.map(Some)
    }
}

impl<W: Write + Send> FrameTransport for StreamTransport<W> {
    fn send(&self, message: &TransportMessage) -> Result<(), TransportError> {
        let _span = vesta_utils::profile_span!("StreamTransport::send");
        let mut writer = self.writer.lock();
        codec::write_message(&mut *writer, message)
            .and_then(|()| writer.flush().map_err(TransportError::from))
            .map_err(TransportError::closed_if_disconnected)
    }

    fn try_recv(&self) -> Result<Option<TransportMessage>, TransportError> {
        match self.incoming.try_recv() {
            Ok(incoming) => Self::map_incoming(incoming),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(TransportError::Closed),
        }
    }

    fn recv_timeout(&self, timeout: Duration) -> Result<Option<TransportMessage>, TransportError> {
        match self.incoming.recv_timeout(timeout) {
            Ok(incoming) => Self::map_incoming(incoming),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
        }
    }
}
