//! Minimal TL (Type Language) primitives used by the RLDP2 wire messages.
//!
//! Only the shapes RLDP2 needs are covered: 32/64-bit little-endian
//! integers, 256-bit ids and length-prefixed byte strings padded to a 4-byte
//! boundary.

use crate::types::RldpTypeError;

/// A helper for building TL messages.
#[derive(Debug, Default)]
pub struct TlWriter {
    buffer: Vec<u8>,
}

impl TlWriter {
    /// Creates a new TL writer.
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Creates a new TL writer with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Writes a u32 value in little-endian.
    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.buffer.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Writes a u64 value in little-endian.
    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.buffer.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Writes a 256-bit integer (32 bytes).
    pub fn write_int256(&mut self, value: &[u8; 32]) -> &mut Self {
        self.buffer.extend_from_slice(value);
        self
    }

    /// Writes bytes with TL encoding.
    ///
    /// - length < 254: 1 byte length, data, padding to 4 bytes
    /// - otherwise: 0xFE, 3 bytes length (LE), data, padding to 4 bytes
    pub fn write_bytes(&mut self, data: &[u8]) -> &mut Self {
        let len = data.len();

        let header = if len < 254 {
            self.buffer.push(len as u8);
            1
        } else {
            self.buffer.push(0xFE);
            self.buffer.extend_from_slice(&(len as u32).to_le_bytes()[..3]);
            4
        };
        self.buffer.extend_from_slice(data);

        let padding = (4 - ((header + len) % 4)) % 4;
        self.buffer.extend(std::iter::repeat_n(0, padding));
        self
    }

    /// Consumes the writer and returns the buffer.
    pub fn finish(self) -> Vec<u8> {
        self.buffer
    }
}

/// A helper for reading TL messages.
pub struct TlReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> TlReader<'a> {
    /// Creates a new TL reader.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Returns the number of unread bytes.
    pub fn remaining_len(&self) -> usize {
        self.data.len() - self.offset
    }

    /// Returns true if there's no more data to read.
    pub fn is_empty(&self) -> bool {
        self.offset >= self.data.len()
    }

    fn read_raw(&mut self, len: usize) -> Result<&'a [u8], RldpTypeError> {
        if self.remaining_len() < len {
            return Err(RldpTypeError::Truncated {
                need: len,
                have: self.remaining_len(),
            });
        }
        let result = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(result)
    }

    /// Reads a u32 value.
    pub fn read_u32(&mut self) -> Result<u32, RldpTypeError> {
        let bytes = self.read_raw(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads a u64 value.
    pub fn read_u64(&mut self) -> Result<u64, RldpTypeError> {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(self.read_raw(8)?);
        Ok(u64::from_le_bytes(bytes))
    }

    /// Reads a 256-bit integer (32 bytes).
    pub fn read_int256(&mut self) -> Result<[u8; 32], RldpTypeError> {
        let mut result = [0u8; 32];
        result.copy_from_slice(self.read_raw(32)?);
        Ok(result)
    }

    /// Reads TL-encoded bytes.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>, RldpTypeError> {
        let first = self.read_raw(1)?[0];

        let (header, len) = if first < 254 {
            (1, first as usize)
        } else {
            let len = self.read_raw(3)?;
            (4, len[0] as usize | (len[1] as usize) << 8 | (len[2] as usize) << 16)
        };

        let data = self.read_raw(len)?.to_vec();
        let padding = (4 - ((header + len) % 4)) % 4;
        self.read_raw(padding)?;
        Ok(data)
    }

    /// Peeks at the next u32 without consuming it.
    pub fn peek_u32(&self) -> Result<u32, RldpTypeError> {
        let mut reader = TlReader {
            data: self.data,
            offset: self.offset,
        };
        reader.read_u32()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_short_padding() {
        let mut writer = TlWriter::new();
        writer.write_bytes(b"Hi");
        let result = writer.finish();

        assert_eq!(result, vec![2, b'H', b'i', 0]);
    }

    #[test]
    fn test_bytes_long_header() {
        let data: Vec<u8> = (0..768).map(|i| i as u8).collect();
        let mut writer = TlWriter::new();
        writer.write_bytes(&data);
        let result = writer.finish();

        assert_eq!(&result[..4], &[0xFE, 0x00, 0x03, 0x00]);
        assert_eq!(result.len(), 4 + 768);

        let mut reader = TlReader::new(&result);
        assert_eq!(reader.read_bytes().unwrap(), data);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_truncated_input() {
        let mut reader = TlReader::new(&[1, 2, 3]);
        assert_eq!(
            reader.read_u32(),
            Err(RldpTypeError::Truncated { need: 4, have: 3 })
        );

        // Declared length runs past the end of the buffer.
        let mut reader = TlReader::new(&[10, 1, 2, 3]);
        assert!(reader.read_bytes().is_err());
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mut writer = TlWriter::with_capacity(8);
        writer.write_u32(0xdeadbeef).write_u64(7);
        let data = writer.finish();

        let mut reader = TlReader::new(&data);
        assert_eq!(reader.peek_u32().unwrap(), 0xdeadbeef);
        assert_eq!(reader.read_u32().unwrap(), 0xdeadbeef);
        assert_eq!(reader.read_u64().unwrap(), 7);
    }
}
