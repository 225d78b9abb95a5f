use std::io::ErrorKind;

use crate::message::MAX_PAYLOAD_SIZE;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown message kind: {0}")]
    UnknownKind(u32),

    #[error("malformed {kind} message: {reason}")]
    Malformed { kind: &'static str, reason: String },

    #[error("payload of {0} bytes exceeds the limit of {MAX_PAYLOAD_SIZE} bytes")]
    TooLarge(usize),

    #[error("transport closed")]
    Closed,
}

impl TransportError {
    /// 对端已经断开的 io 错误归为 [`TransportError::Closed`]
    pub fn closed_if_disconnected(self) -> Self {
        match self {
            Self::Io(e)
                if matches!(
                    e.kind(),
                    ErrorKind::BrokenPipe
                        | ErrorKind::ConnectionReset
                        | ErrorKind::ConnectionAborted
                        | ErrorKind::NotConnected
                ) =>
            {
                Self::Closed
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_kinds_become_closed() {
        for kind in [ErrorKind::BrokenPipe, ErrorKind::ConnectionReset, ErrorKind::ConnectionAborted] {
            let error = TransportError::from(std::io::Error::from(kind)).closed_if_disconnected();
            assert!(matches!(error, TransportError::Closed), "{kind:?}");
        }

        let error = TransportError::from(std::io::Error::from(ErrorKind::TimedOut)).closed_if_disconnected();
        assert!(matches!(error, TransportError::Io(_)));
        assert!(matches!(TransportError::UnknownKind(7).closed_if_disconnected(), TransportError::UnknownKind(7)));
    }
}
