//! 消息的编解码

use std::io::{ErrorKind, Read, Write};

use crate::{
    error::TransportError,
    message::{FramePixels, MAX_PAYLOAD_SIZE, MessageKind, TransportMessage},
};

pub const HEADER_SIZE: usize = 8;

/// 把消息写入 `writer`，不会 flush
pub fn write_message(writer: &mut impl Write, message: &TransportMessage) -> Result<(), TransportError> {
    let kind = message.kind();
    let payload = encode_payload(message)?;
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(TransportError::TooLarge(payload.len()));
    }

    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(&kind.raw().to_le_bytes());
    header[4..8].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    writer.write_all(&header)?;
    writer.write_all(&payload)?;
    Ok(())
}

pub fn encode_message(message: &TransportMessage) -> Result<Vec<u8>, TransportError> {
    let mut bytes = Vec::new();
    write_message(&mut bytes, message)?;
    Ok(bytes)
}

/// 读取一条完整的消息
///
/// 在消息边界上遇到 EOF 时返回 `Ok(None)`，消息中途 EOF 属于 io 错误
pub fn read_message(reader: &mut impl Read) -> Result<Option<TransportMessage>, TransportError> {
    let mut header = [0u8; HEADER_SIZE];
    if !read_header(reader, &mut header)? {
        return Ok(None);
    }

    let raw_kind = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    let kind = MessageKind::from_raw(raw_kind).ok_or(TransportError::UnknownKind(raw_kind))?;
    if len > MAX_PAYLOAD_SIZE {
        return Err(TransportError::TooLarge(len));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    decode_payload(kind, payload).map(Some)
}

fn read_header(reader: &mut impl Read, header: &mut [u8; HEADER_SIZE]) -> Result<bool, TransportError> {
    let mut filled = 0;
    while filled < HEADER_SIZE {
        match reader.read(&mut header[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(std::io::Error::from(ErrorKind::UnexpectedEof).into()),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

fn encode_payload(message: &TransportMessage) -> Result<Vec<u8>, TransportError> {
    let payload = match message {
        TransportMessage::UpdateData { delta, time } => {
            let mut bytes = Vec::with_capacity(16);
            bytes.extend_from_slice(&delta.to_le_bytes());
            bytes.extend_from_slice(&time.to_le_bytes());
            bytes
        }
        TransportMessage::PushFrame(frame) | TransportMessage::FrameData(frame) => {
            if !frame.is_consistent() {
                return Err(malformed(
                    message.kind(),
                    format!("{}x{} frame carries {} bytes", frame.width, frame.height, frame.pixels.len()),
                ));
            }
            let mut bytes = Vec::with_capacity(8 + frame.pixels.len());
            bytes.extend_from_slice(&frame.width.to_le_bytes());
            bytes.extend_from_slice(&frame.height.to_le_bytes());
            bytes.extend_from_slice(&frame.pixels);
            bytes
        }
        TransportMessage::Resize { width, height } => {
            let mut bytes = Vec::with_capacity(8);
            bytes.extend_from_slice(&width.to_le_bytes());
            bytes.extend_from_slice(&height.to_le_bytes());
            bytes
        }
        TransportMessage::Close => vec![],
    };
    Ok(payload)
}

fn decode_payload(kind: MessageKind, mut payload: Vec<u8>) -> Result<TransportMessage, TransportError> {
    let expect_len = |expected: usize, payload: &[u8]| {
        if payload.len() == expected {
            Ok(())
        } else {
            Err(malformed(kind, format!("expected {expected} bytes, got {}", payload.len())))
        }
    };

    match kind {
        MessageKind::UpdateData => {
            expect_len(16, &payload)?;
            Ok(TransportMessage::UpdateData {
                delta: f64::from_le_bytes(array_at(&payload, 0)),
                time: f64::from_le_bytes(array_at(&payload, 8)),
            })
        }
        MessageKind::PushFrame | MessageKind::FrameData => {
            if payload.len() < 8 {
                return Err(malformed(kind, format!("{} bytes is shorter than the frame header", payload.len())));
            }
            let width = u32::from_le_bytes(array_at(&payload, 0));
            let height = u32::from_le_bytes(array_at(&payload, 4));
            let pixel_len = FramePixels::expected_len(width, height)
                .filter(|len| *len <= MAX_PAYLOAD_SIZE - 8)
                .ok_or_else(|| malformed(kind, format!("{width}x{height} frame does not fit in one message")))?;
            expect_len(8 + pixel_len, &payload)?;
            payload.drain(..8);
            let frame = FramePixels {
                width,
                height,
                pixels: payload,
            };
            Ok(if kind == MessageKind::PushFrame {
                TransportMessage::PushFrame(frame)
            } else {
                TransportMessage::FrameData(frame)
            })
        }
        MessageKind::Resize => {
            expect_len(8, &payload)?;
            Ok(TransportMessage::Resize {
                width: i32::from_le_bytes(array_at(&payload, 0)),
                height: i32::from_le_bytes(array_at(&payload, 4)),
            })
        }
        MessageKind::Close => {
            expect_len(0, &payload)?;
            Ok(TransportMessage::Close)
        }
    }
}

#[inline]
fn array_at<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut array = [0u8; N];
    array.copy_from_slice(&bytes[offset..offset + N]);
    array
}

fn malformed(kind: MessageKind, reason: String) -> TransportError {
    TransportError::Malformed {
        kind: kind.name(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_resize_wire_layout() {
        let bytes = encode_message(&TransportMessage::Resize {
            width: 640,
            height: -1,
        })
        .unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + 8);
        assert_eq!(&bytes[0..4], &4u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &8u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &640i32.to_le_bytes());
        assert_eq!(&bytes[12..16], &(-1i32).to_le_bytes());
    }

    #[test]
    fn test_stream_of_messages() {
        let messages = vec![
            TransportMessage::UpdateData { delta: 0.016, time: 1.5 },
            TransportMessage::PushFrame(FramePixels {
                width: 2,
                height: 1,
                pixels: vec![1, 2, 3, 4, 5, 6, 7, 8],
            }),
            TransportMessage::Close,
        ];
        let mut bytes = Vec::new();
        for message in &messages {
            write_message(&mut bytes, message).unwrap();
        }

        let mut reader = Cursor::new(bytes);
        let mut decoded = Vec::new();
        while let Some(message) = read_message(&mut reader).unwrap() {
            decoded.push(message);
        }
        assert_eq!(decoded, messages);
    }

    #[test]
    fn test_unknown_kind_and_oversized_payload() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&9u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        assert!(matches!(read_message(&mut Cursor::new(bytes)), Err(TransportError::UnknownKind(9))));

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(read_message(&mut Cursor::new(bytes)), Err(TransportError::TooLarge(_))));
    }

    #[test]
    fn test_malformed_frames() {
        let inconsistent = TransportMessage::PushFrame(FramePixels {
            width: 4,
            height: 4,
            pixels: vec![0; 3],
        });
        assert!(matches!(encode_message(&inconsistent), Err(TransportError::Malformed { .. })));

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(&[0; 4]);
        assert!(matches!(read_message(&mut Cursor::new(bytes)), Err(TransportError::Malformed { .. })));
    }

    #[test]
    fn test_oversized_frame_dimensions_are_malformed() {
        for (width, height) in [(u32::MAX, u32::MAX), (1 << 31, 1 << 31), (65536, 65536)] {
            let mut bytes = Vec::new();
            bytes.extend_from_slice(&3u32.to_le_bytes());
            bytes.extend_from_slice(&8u32.to_le_bytes());
            bytes.extend_from_slice(&width.to_le_bytes());
            bytes.extend_from_slice(&height.to_le_bytes());
            assert!(
                matches!(read_message(&mut Cursor::new(bytes)), Err(TransportError::Malformed { .. })),
                "{width}x{height}"
            );
        }

        let frame = FramePixels {
            width: u32::MAX,
            height: u32::MAX,
            pixels: vec![],
        };
        assert!(!frame.is_consistent());
        assert!(matches!(encode_message(&TransportMessage::PushFrame(frame)), Err(TransportError::Malformed { .. })));
    }

    #[test]
    fn test_truncated_message_is_io_error() {
        let mut bytes = encode_message(&TransportMessage::Resize { width: 1, height: 1 }).unwrap();
        bytes.truncate(HEADER_SIZE + 3);
        assert!(matches!(read_message(&mut Cursor::new(bytes)), Err(TransportError::Io(_))));

        let bytes = vec![1u8, 0, 0];
        assert!(matches!(read_message(&mut Cursor::new(bytes)), Err(TransportError::Io(_))));
    }
}
