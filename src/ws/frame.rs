//! WebSocket frame codec (RFC 6455 subset: no extensions)
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |     Masking-key (0 or 4 bytes), then payload data             |
//! +---------------------------------------------------------------+
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::config::MaskMode;
use crate::error::WsError;

/// Frame opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl OpCode {
    pub fn from_u8(value: u8) -> Result<Self, WsError> {
        match value {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            other => Err(WsError::BadOpcode(other)),
        }
    }

    pub fn is_control(self) -> bool {
        (self as u8) & 0x8 != 0
    }
}

/// One WebSocket frame with its payload unmasked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: OpCode,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(fin: bool, opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin,
            opcode,
            payload: payload.into(),
        }
    }

    pub fn text(text: &str) -> Self {
        Self::new(true, OpCode::Text, Bytes::copy_from_slice(text.as_bytes()))
    }

    pub fn pong(payload: Bytes) -> Self {
        Self::new(true, OpCode::Pong, payload)
    }

    pub fn close() -> Self {
        Self::new(true, OpCode::Close, Bytes::new())
    }

    /// Serialize as a client frame: mask bit always set, payload XORed
    /// with `key`.
    pub fn encode(&self, key: [u8; 4]) -> Vec<u8> {
        let len = self.payload.len();
        let mut out = BytesMut::with_capacity(len + 14);

        let fin_bit = if self.fin { 0x80 } else { 0x00 };
        out.put_u8(fin_bit | self.opcode as u8);

        if len < 126 {
            out.put_u8(0x80 | len as u8);
        } else if len <= u16::MAX as usize {
            out.put_u8(0x80 | 126);
            out.put_u16(len as u16);
        } else {
            out.put_u8(0x80 | 127);
            out.put_u64(len as u64);
        }

        out.put_slice(&key);
        let start = out.len();
        out.put_slice(&self.payload);
        apply_mask(&mut out[start..], key);
        out.to_vec()
    }
}

/// Masking key for the next outbound frame
pub fn mask_key(mode: MaskMode) -> [u8; 4] {
    match mode {
        MaskMode::Zero => [0; 4],
        MaskMode::Random => {
            let id = uuid::Uuid::new_v4();
            let bytes = id.as_bytes();
            [bytes[0], bytes[1], bytes[2], bytes[3]]
        }
    }
}

/// XOR `data` with the repeating 4-byte key (self-inverse).
pub fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    if key == [0; 4] {
        return;
    }
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}

/// Incremental frame parser over a byte buffer
///
/// Feed transport bytes with [`push`](Self::push) and pull complete
/// frames with [`next_frame`](Self::next_frame); a frame whose header or
/// payload is still incomplete stays pending.
pub struct FrameDecoder {
    buf: BytesMut,
    max_payload: usize,
    accept_masked: bool,
}

impl FrameDecoder {
    /// Decoder for server→client frames, which are never masked
    pub fn new(max_payload: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(8 * 1024),
            max_payload,
            accept_masked: false,
        }
    }

    /// Also accept masked frames (server-side view of client frames)
    pub fn accepting_masked(mut self) -> Self {
        self.accept_masked = true;
        self
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes received but not yet consumed by a complete frame
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn next_frame(&mut self) -> Result<Option<Frame>, WsError> {
        if self.buf.len() < 2 {
            return Ok(None);
        }

        let b0 = self.buf[0];
        let b1 = self.buf[1];
        let fin = b0 & 0x80 != 0;
        if b0 & 0x70 != 0 {
            return Err(WsError::Protocol("reserved bits set".into()));
        }
        let opcode = OpCode::from_u8(b0 & 0x0F)?;
        let masked = b1 & 0x80 != 0;
        if masked && !self.accept_masked {
            return Err(WsError::MaskedServerFrame);
        }

        let (len, mut header_len) = match b1 & 0x7F {
            126 => {
                if self.buf.len() < 4 {
                    return Ok(None);
                }
                (u16::from_be_bytes([self.buf[2], self.buf[3]]) as u64, 4)
            }
            127 => {
                if self.buf.len() < 10 {
                    return Ok(None);
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&self.buf[2..10]);
                let len = u64::from_be_bytes(raw);
                if len >> 63 != 0 {
                    return Err(WsError::LengthUnsupported(len));
                }
                (len, 10)
            }
            short => (short as u64, 2),
        };

        if opcode.is_control() && (!fin || len > 125) {
            return Err(WsError::Protocol(format!(
                "invalid control frame {:?} (fin={}, len={})",
                opcode, fin, len
            )));
        }
        if len > self.max_payload as u64 {
            return Err(WsError::MessageTooLarge {
                limit: self.max_payload,
            });
        }

        let key = if masked {
            if self.buf.len() < header_len + 4 {
                return Ok(None);
            }
            let key = [
                self.buf[header_len],
                self.buf[header_len + 1],
                self.buf[header_len + 2],
                self.buf[header_len + 3],
            ];
            header_len += 4;
            Some(key)
        } else {
            None
        };

        let len = len as usize;
        if self.buf.len() < header_len + len {
            return Ok(None);
        }

        self.buf.advance(header_len);
        let mut payload = self.buf.split_to(len);
        if let Some(key) = key {
            apply_mask(&mut payload, key);
        }

        Ok(Some(Frame {
            fin,
            opcode,
            payload: payload.freeze(),
        }))
    }
}
