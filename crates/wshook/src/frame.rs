//! WebSocket frame codec (RFC 6455 Section 5.2-5.3).
//!
//! Stateless conversion between application payloads and single,
//! unfragmented data frames.
//!
//! - [`encode`] / [`encode_with`]: Build an unmasked server frame (7-bit or 16-bit length)
//! - [`decode`]: Classify one inbound chunk as a payload, incomplete, unsupported or malformed
//! - [`decode_frame`]: Same parse, keeping the frame header fields
//! - [`frame_len`]: Size of the leading frame, to step over it
//! - [`apply_mask`]: Symmetric XOR masking per RFC 6455 Section 5.3

use std::fmt;

use crate::error::EncodeError;

/// Largest payload [`encode`] will frame. Anything longer needs the 64-bit
/// length field.
pub const MAX_ENCODED_PAYLOAD: usize = 0xFFFF;

/// Largest declared payload [`decode`] will wait for (64 MiB). Bigger
/// declarations are reported as unsupported instead of incomplete.
pub const MAX_DECODED_PAYLOAD: u64 = 64 * 1024 * 1024;

/// WebSocket frame opcodes per RFC 6455 Section 5.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    /// Parse a 4-bit opcode value. Reserved values yield `None`.
    pub fn from_u8(byte: u8) -> Option<Opcode> {
        match byte {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    /// Data opcodes are the ones below 3.
    pub fn is_data(self) -> bool {
        (self as u8) < 3
    }
}

/// Opcode used for outbound data frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MessageKind {
    #[default]
    Text,
    Binary,
}

impl MessageKind {
    pub fn opcode(self) -> Opcode {
        match self {
            MessageKind::Text => Opcode::Text,
            MessageKind::Binary => Opcode::Binary,
        }
    }
}

/// A parsed inbound data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// FIN bit. Always `true` for frames returned by [`decode_frame`].
    pub fin: bool,
    pub opcode: Opcode,
    /// Masking key, present iff the MASK bit was set.
    pub mask_key: Option<[u8; 4]>,
    /// The unmasked payload bytes.
    pub payload: Vec<u8>,
    /// Number of input bytes the frame occupied (header + payload).
    pub wire_len: usize,
}

impl Frame {
    pub fn is_masked(&self) -> bool {
        self.mask_key.is_some()
    }
}

/// Frame kinds that are recognized but not handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unsupported {
    /// FIN bit clear: the message continues in later frames.
    Fragmented,
    /// Close frame. Callers usually drop the connection on this.
    Close,
    /// Ping, pong or a reserved opcode.
    Opcode(u8),
    /// Declared payload length above [`MAX_DECODED_PAYLOAD`].
    Oversized(u64),
}

impl fmt::Display for Unsupported {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unsupported::Fragmented => write!(f, "fragmented frame"),
            Unsupported::Close => write!(f, "close frame"),
            Unsupported::Opcode(op) => write!(f, "control/unknown opcode 0x{op:X}"),
            Unsupported::Oversized(len) => write!(f, "oversized payload of {len} bytes"),
        }
    }
}

/// Frames that violate the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Malformed {
    /// The most significant bit of a 64-bit length must be 0.
    LengthHighBit,
}

impl fmt::Display for Malformed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Malformed::LengthHighBit => write!(f, "most significant bit of 64-bit length is set"),
        }
    }
}

/// Outcome of decoding one inbound chunk.
///
/// An empty `Message` is a valid zero-length frame and is never used to
/// signal missing bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Message(Vec<u8>),
    /// The chunk holds less than one whole frame.
    Incomplete,
    Unsupported(Unsupported),
    Malformed(Malformed),
}

/// Reasons [`decode_frame`] did not produce a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    Incomplete,
    Unsupported(Unsupported),
    Malformed(Malformed),
}

impl From<DecodeError> for Decoded {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Incomplete => Decoded::Incomplete,
            DecodeError::Unsupported(reason) => Decoded::Unsupported(reason),
            DecodeError::Malformed(reason) => Decoded::Malformed(reason),
        }
    }
}

/// Apply or remove the 4-byte XOR mask on a payload.
///
/// The operation is symmetric: applying the mask twice returns the original.
pub fn apply_mask(payload: &mut [u8], mask_key: &[u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask_key[i % 4];
    }
}

/// Frame `payload` as a single unmasked text frame.
pub fn encode(payload: &[u8]) -> Result<Vec<u8>, EncodeError> {
    encode_with(MessageKind::Text, payload)
}

/// Frame `payload` as a single unmasked data frame of the given kind.
///
/// Servers MUST NOT mask frames (RFC 6455 Section 5.1). Payloads longer than
/// [`MAX_ENCODED_PAYLOAD`] are refused rather than framed with a header that
/// does not match the payload.
pub fn encode_with(kind: MessageKind, payload: &[u8]) -> Result<Vec<u8>, EncodeError> {
    let len = payload.len();
    if len > MAX_ENCODED_PAYLOAD {
        return Err(EncodeError::UnsupportedLength(len));
    }

    // Byte 0: FIN=1 + opcode. Byte 1: MASK=0 + payload length.
    let byte0 = 0x80 | kind.opcode() as u8;
    let mut out = Vec::with_capacity(4 + len);
    if len < 126 {
        out.extend_from_slice(&[byte0, len as u8]);
    } else {
        out.extend_from_slice(&[byte0, 126]);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    }
    out.extend_from_slice(payload);
    Ok(out)
}

/// Decode one data frame from the start of `buf`, returning only its payload.
pub fn decode(buf: &[u8]) -> Decoded {
    match decode_frame(buf) {
        Ok(frame) => Decoded::Message(frame.payload),
        Err(err) => err.into(),
    }
}

/// Parse one data frame from the start of `buf`.
///
/// Handles all three payload length encodings and unmasks client frames.
/// Bytes past the end of the frame are left alone; `wire_len` tells how
/// many were used.
pub fn decode_frame(buf: &[u8]) -> Result<Frame, DecodeError> {
    // Byte 0: FIN(1) RSV(3) Opcode(4)
    // Byte 1: MASK(1) Payload-Length(7)
    let mut offset = 0;
    let [byte0, byte1] = take::<2>(buf, &mut offset)?;

    let fin = byte0 & 0x80 != 0;
    let opcode_byte = byte0 & 0x0F;
    let masked = byte1 & 0x80 != 0;
    let length_byte = byte1 & 0x7F;

    if !fin {
        return Err(DecodeError::Unsupported(Unsupported::Fragmented));
    }

    let opcode = match Opcode::from_u8(opcode_byte) {
        Some(op) if op.is_data() => op,
        Some(Opcode::Close) => return Err(DecodeError::Unsupported(Unsupported::Close)),
        _ => return Err(DecodeError::Unsupported(Unsupported::Opcode(opcode_byte))),
    };

    let payload_len: u64 = match length_byte {
        0..=125 => u64::from(length_byte),
        126 => u64::from(u16::from_be_bytes(take::<2>(buf, &mut offset)?)),
        _ => {
            let len = u64::from_be_bytes(take::<8>(buf, &mut offset)?);
            if len >> 63 != 0 {
                return Err(DecodeError::Malformed(Malformed::LengthHighBit));
            }
            len
        }
    };

    if payload_len > MAX_DECODED_PAYLOAD {
        return Err(DecodeError::Unsupported(Unsupported::Oversized(payload_len)));
    }
    let len = usize::try_from(payload_len)
        .map_err(|_| DecodeError::Unsupported(Unsupported::Oversized(payload_len)))?;

    let mask_key = if masked {
        Some(take::<4>(buf, &mut offset)?)
    } else {
        None
    };

    let end = offset + len;
    let mut payload = buf
        .get(offset..end)
        .ok_or(DecodeError::Incomplete)?
        .to_vec();

    if let Some(key) = mask_key {
        apply_mask(&mut payload, &key);
    }

    Ok(Frame {
        fin,
        opcode,
        mask_key,
        payload,
        wire_len: end,
    })
}

/// Number of bytes the frame at the start of `buf` occupies, whatever its
/// opcode or FIN bit. `None` until the whole frame is in `buf`.
///
/// Lets a host step past a frame [`decode_frame`] refused (a ping, say) to
/// reach the next one in the same chunk.
pub fn frame_len(buf: &[u8]) -> Option<usize> {
    let mut offset = 0;
    let [_, byte1] = take::<2>(buf, &mut offset).ok()?;
    let payload_len = match byte1 & 0x7F {
        126 => u64::from(u16::from_be_bytes(take::<2>(buf, &mut offset).ok()?)),
        127 => u64::from_be_bytes(take::<8>(buf, &mut offset).ok()?),
        n => u64::from(n),
    };
    if byte1 & 0x80 != 0 {
        offset += 4;
    }
    let end = usize::try_from(payload_len).ok()?.checked_add(offset)?;
    (end <= buf.len()).then_some(end)
}

/// Copy `N` bytes at `offset`, advancing it.
fn take<const N: usize>(buf: &[u8], offset: &mut usize) -> Result<[u8; N], DecodeError> {
    let bytes = buf
        .get(*offset..*offset + N)
        .ok_or(DecodeError::Incomplete)?;
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    *offset += N;
    Ok(out)
}
