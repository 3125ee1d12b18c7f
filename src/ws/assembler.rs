//! Reassembly of fragmented data messages

use bytes::Bytes;

use crate::error::WsError;
use crate::ws::frame::{Frame, OpCode};

/// A complete data message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Bytes),
}

/// Accumulates data frames until `fin`
///
/// The buffer starts at `initial` bytes and doubles as needed; a message
/// that would need more than `limit` bytes is rejected.
pub struct MessageAssembler {
    buf: Vec<u8>,
    capacity: usize,
    limit: usize,
    kind: Option<OpCode>,
}

impl MessageAssembler {
    pub fn new(initial: usize, limit: usize) -> Self {
        let capacity = initial.min(limit).max(1);
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
            limit,
            kind: None,
        }
    }

    /// Current accumulation buffer size
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_progress(&self) -> bool {
        self.kind.is_some()
    }

    /// Add a data frame; returns the message once its final frame arrives.
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>, WsError> {
        let kind = match (frame.opcode, self.kind) {
            (OpCode::Text | OpCode::Binary, None) => frame.opcode,
            (OpCode::Continuation, Some(kind)) => kind,
            (OpCode::Continuation, None) => {
                return Err(WsError::Protocol("continuation without a message".into()))
            }
            (OpCode::Text | OpCode::Binary, Some(_)) => {
                return Err(WsError::Protocol("new message inside a fragmented one".into()))
            }
            (opcode, _) => {
                return Err(WsError::Protocol(format!("{:?} is not a data frame", opcode)))
            }
        };

        self.reserve(frame.payload.len())?;
        self.buf.extend_from_slice(&frame.payload);
        self.kind = Some(kind);

        if !frame.fin {
            return Ok(None);
        }

        self.kind = None;
        // The accumulation buffer is kept for the next message
        let message = match kind {
            OpCode::Text => std::str::from_utf8(&self.buf)
                .map(|text| Message::Text(text.to_owned()))
                .map_err(|_| WsError::Protocol("text message is not UTF-8".into())),
            _ => Ok(Message::Binary(Bytes::copy_from_slice(&self.buf))),
        };
        self.buf.clear();
        message.map(Some)
    }

    /// Drop a partial message (connection reset).
    pub fn reset(&mut self) {
        self.buf.clear();
        self.kind = None;
    }

    fn reserve(&mut self, extra: usize) -> Result<(), WsError> {
        let needed = self.buf.len() + extra;
        if needed > self.limit {
            self.reset();
            return Err(WsError::MessageTooLarge { limit: self.limit });
        }
        if needed > self.capacity {
            let mut capacity = self.capacity;
            while capacity < needed {
                capacity = (capacity * 2).min(self.limit);
            }
            tracing::debug!("Message buffer grown {} -> {} bytes", self.capacity, capacity);
            self.buf.reserve_exact(capacity - self.buf.len());
            self.capacity = capacity;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_frame_message() {
        let mut assembler = MessageAssembler::new(16, 64);
        let msg = assembler.push(Frame::text("hello")).unwrap();
        assert_eq!(msg, Some(Message::Text("hello".into())));
        assert!(!assembler.in_progress());
    }

    #[test]
    fn test_fragments_accumulate_until_fin() {
        let mut assembler = MessageAssembler::new(4, 64);
        assert_eq!(
            assembler.push(Frame::new(false, OpCode::Text, "hel")).unwrap(),
            None
        );
        assert!(assembler.in_progress());
        assert_eq!(
            assembler.push(Frame::new(false, OpCode::Continuation, "lo ")).unwrap(),
            None
        );
        let msg = assembler
            .push(Frame::new(true, OpCode::Continuation, "world"))
            .unwrap();
        assert_eq!(msg, Some(Message::Text("hello world".into())));
        // 4 -> 8 -> 16
        assert_eq!(assembler.capacity(), 16);
    }

    #[test]
    fn test_growth_is_capped() {
        let mut assembler = MessageAssembler::new(32, 100);
        assembler
            .push(Frame::new(false, OpCode::Binary, vec![0u8; 60]))
            .unwrap();
        assert_eq!(assembler.capacity(), 64);
        assembler
            .push(Frame::new(false, OpCode::Continuation, vec![0u8; 40]))
            .unwrap();
        assert_eq!(assembler.capacity(), 100);

        let err = assembler
            .push(Frame::new(true, OpCode::Continuation, vec![0u8; 1]))
            .unwrap_err();
        assert!(matches!(err, WsError::MessageTooLarge { limit: 100 }));
        assert!(!assembler.in_progress());
    }

    #[test]
    fn test_out_of_order_fragments_rejected() {
        let mut assembler = MessageAssembler::new(16, 64);
        assert!(assembler
            .push(Frame::new(true, OpCode::Continuation, "x"))
            .is_err());

        assembler.push(Frame::new(false, OpCode::Text, "a")).unwrap();
        assert!(assembler.push(Frame::text("b")).is_err());
    }

    #[test]
    fn test_buffer_is_reused_between_messages() {
        let mut assembler = MessageAssembler::new(64, 1024);
        assembler.push(Frame::text("first")).unwrap();
        let buffer = assembler.buf.as_ptr();

        let msg = assembler.push(Frame::text("second")).unwrap();
        assert_eq!(msg, Some(Message::Text("second".into())));
        assert_eq!(assembler.buf.as_ptr(), buffer);
        assert!(assembler.buf.is_empty());
        assert!(assembler.buf.capacity() >= 64);

        assert!(assembler
            .push(Frame::new(true, OpCode::Text, vec![0xff, 0xfe]))
            .is_err());
        assert!(assembler.buf.is_empty());
    }
}
