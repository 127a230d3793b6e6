//! Primitive wire encodings: big-endian integers, length-prefixed strings
//! and binary blobs, and the variable-length remaining-length field.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{MqttError, Result};

/// Largest value a four-byte remaining-length field can carry.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Cursor over a packet body.
///
/// All reads are bounds-checked; running off the end is a malformed packet,
/// never a panic.
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    /// UTF-8 string with a two-byte length prefix. Embedded NUL is rejected
    /// per MQTT-1.5.3-2.
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        if bytes.contains(&0) {
            return Err(MqttError::MalformedPacket(
                "string contains NUL character".into(),
            ));
        }
        String::from_utf8(bytes.to_vec()).map_err(|_| MqttError::InvalidUtf8)
    }

    /// Binary blob with a two-byte length prefix.
    pub fn read_binary(&mut self) -> Result<Bytes> {
        let len = self.read_u16()? as usize;
        Ok(Bytes::copy_from_slice(self.take(len)?))
    }

    /// Everything left in the body.
    pub fn read_rest(&mut self) -> Bytes {
        let rest = Bytes::copy_from_slice(&self.buf[self.pos..]);
        self.pos = self.buf.len();
        rest
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(MqttError::MalformedPacket(format!(
                "need {} more bytes, have {}",
                n,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }
}

pub fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

pub fn put_binary(buf: &mut BytesMut, b: &[u8]) {
    buf.put_u16(b.len() as u16);
    buf.put_slice(b);
}

/// Decode the remaining-length varint: 1-4 bytes, bit 7 of each byte is the
/// continuation flag.
///
/// Returns `Ok(None)` when the slice ends before a terminating byte, and
/// [`MqttError::OversizedLengthIndicator`] when four continuation bytes
/// appear with no terminator.
pub fn decode_remaining_length(buf: &[u8]) -> Result<Option<(usize, usize)>> {
    let mut value = 0usize;
    let mut shift = 0u32;

    for (i, &byte) in buf.iter().enumerate() {
        value |= usize::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
        // A fourth length byte carrying a continuation bit can never be
        // terminated validly.
        if i == 3 {
            return Err(MqttError::OversizedLengthIndicator);
        }
        shift += 7;
    }

    Ok(None)
}

/// Encode `len` as a remaining-length varint.
pub fn encode_remaining_length(mut len: usize, buf: &mut BytesMut) {
    debug_assert!(len <= MAX_REMAINING_LENGTH);
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if len == 0 {
            break;
        }
    }
}
