//! Bounds-checked cursors used by every record and by the wire header.
//!
//! A record body is its mandatory fields, written unconditionally in
//! declaration order, followed by zero or more optional fields encoded as
//! `(tag: u8, len: u16, bytes)`. Tag `0` is never written. Readers skip any
//! tag they do not recognise, so newer senders can append fields without
//! breaking older receivers.
//!
//! All multi-byte integers are big-endian.

use crate::error::CodecError;

pub struct TagWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> TagWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn reserve(&mut self, len: usize) -> Result<&mut [u8], CodecError> {
        let available = self.remaining();
        if len > available {
            return Err(CodecError::Overflow {
                needed: len,
                available,
            });
        }
        let start = self.pos;
        self.pos += len;
        Ok(&mut self.buf[start..start + len])
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> Result<(), CodecError> {
        self.reserve(data.len())?.copy_from_slice(data);
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), CodecError> {
        self.write_bytes(&[value])
    }

    pub fn write_u16(&mut self, value: u16) -> Result<(), CodecError> {
        self.write_bytes(&value.to_be_bytes())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<(), CodecError> {
        self.write_bytes(&value.to_be_bytes())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<(), CodecError> {
        self.write_bytes(&value.to_be_bytes())
    }

    pub fn write_i16(&mut self, value: i16) -> Result<(), CodecError> {
        self.write_bytes(&value.to_be_bytes())
    }

    pub fn write_i32(&mut self, value: i32) -> Result<(), CodecError> {
        self.write_bytes(&value.to_be_bytes())
    }

    pub fn write_f32(&mut self, value: f32) -> Result<(), CodecError> {
        self.write_bytes(&value.to_be_bytes())
    }

    pub fn write_f64(&mut self, value: f64) -> Result<(), CodecError> {
        self.write_bytes(&value.to_be_bytes())
    }

    pub fn write_bool(&mut self, value: bool) -> Result<(), CodecError> {
        self.write_u8(value as u8)
    }

    /// Writes a `u16` length prefix followed by the raw bytes.
    pub fn write_blob(&mut self, data: &[u8]) -> Result<(), CodecError> {
        let len = u16::try_from(data.len())
            .map_err(|_| CodecError::InvalidValue("blob longer than 65535 bytes"))?;
        self.write_u16(len)?;
        self.write_bytes(data)
    }

    pub fn write_str(&mut self, value: &str) -> Result<(), CodecError> {
        self.write_blob(value.as_bytes())
    }

    /// Writes one optional field. `body` writes the field value into a
    /// sub-writer; its length is patched in afterwards.
    pub fn write_tagged<F>(&mut self, tag: u8, body: F) -> Result<(), CodecError>
    where
        F: FnOnce(&mut TagWriter<'_>) -> Result<(), CodecError>,
    {
        if tag == 0 {
            return Err(CodecError::InvalidValue("tag 0 is reserved"));
        }
        self.write_u8(tag)?;
        let len_pos = self.pos;
        self.write_u16(0)?;

        let start = self.pos;
        let written = {
            let mut inner = TagWriter::new(&mut self.buf[start..]);
            body(&mut inner)?;
            inner.pos
        };
        let len = u16::try_from(written)
            .map_err(|_| CodecError::InvalidValue("tagged field longer than 65535 bytes"))?;

        self.buf[len_pos..len_pos + 2].copy_from_slice(&len.to_be_bytes());
        self.pos = start + written;
        Ok(())
    }
}

pub struct TagReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> TagReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let remaining = self.remaining();
        if len > remaining {
            return Err(CodecError::Underflow {
                needed: len,
                remaining,
            });
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.buf[start..start + len])
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        self.read_array().map(u16::from_be_bytes)
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        self.read_array().map(u32::from_be_bytes)
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        self.read_array().map(u64::from_be_bytes)
    }

    pub fn read_i16(&mut self) -> Result<i16, CodecError> {
        self.read_array().map(i16::from_be_bytes)
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        self.read_array().map(i32::from_be_bytes)
    }

    pub fn read_f32(&mut self) -> Result<f32, CodecError> {
        self.read_array().map(f32::from_be_bytes)
    }

    pub fn read_f64(&mut self) -> Result<f64, CodecError> {
        self.read_array().map(f64::from_be_bytes)
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(CodecError::InvalidValue("bool byte out of range")),
        }
    }

    pub fn read_blob(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.read_u16()? as usize;
        self.read_bytes(len)
    }

    pub fn read_str(&mut self) -> Result<&'a str, CodecError> {
        std::str::from_utf8(self.read_blob()?).map_err(|_| CodecError::InvalidUtf8)
    }

    /// Walks the optional-field section until the buffer is exhausted.
    /// `field` returns `false` for tags it does not know; those are skipped.
    pub fn read_tags<F>(&mut self, mut field: F) -> Result<(), CodecError>
    where
        F: FnMut(u8, &mut TagReader<'a>) -> Result<bool, CodecError>,
    {
        while !self.is_empty() {
            let tag = self.read_u8()?;
            if tag == 0 {
                return Err(CodecError::InvalidValue("tag 0 is reserved"));
            }
            let len = self.read_u16()? as usize;
            let mut body = TagReader::new(self.read_bytes(len)?);
            if !field(tag, &mut body)? {
                log::trace!("skipping unknown tag {} ({} bytes)", tag, len);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_overflow_is_reported() {
        let mut buf = [0u8; 3];
        let mut writer = TagWriter::new(&mut buf);

        assert!(writer.write_u16(7).is_ok());
        assert_eq!(
            writer.write_u32(1),
            Err(CodecError::Overflow {
                needed: 4,
                available: 1
            })
        );
        assert_eq!(writer.position(), 2);
    }

    #[test]
    fn test_reader_underflow_is_reported() {
        let buf = [0u8, 1];
        let mut reader = TagReader::new(&buf);

        assert_eq!(
            reader.read_u32(),
            Err(CodecError::Underflow {
                needed: 4,
                remaining: 2
            })
        );
        assert_eq!(reader.read_u16(), Ok(1));
    }

    #[test]
    fn test_unknown_tags_are_skipped() {
        let mut buf = [0u8; 64];
        let mut writer = TagWriter::new(&mut buf);
        writer.write_u8(9).unwrap();
        writer.write_tagged(1, |w| w.write_u32(0xDEAD_BEEF)).unwrap();
        writer.write_tagged(42, |w| w.write_str("from the future")).unwrap();
        writer.write_tagged(2, |w| w.write_u16(77)).unwrap();
        let len = writer.position();

        let mut reader = TagReader::new(&buf[..len]);
        assert_eq!(reader.read_u8(), Ok(9));

        let mut first = None;
        let mut second = None;
        reader
            .read_tags(|tag, body| match tag {
                1 => {
                    first = Some(body.read_u32()?);
                    Ok(true)
                }
                2 => {
                    second = Some(body.read_u16()?);
                    Ok(true)
                }
                _ => Ok(false),
            })
            .unwrap();

        assert_eq!(first, Some(0xDEAD_BEEF));
        assert_eq!(second, Some(77));
    }

    #[test]
    fn test_truncated_tag_body_fails() {
        let buf = [1u8, 0, 8, 0xAA];
        let mut reader = TagReader::new(&buf);

        let result = reader.read_tags(|_, _| Ok(true));
        assert!(matches!(result, Err(CodecError::Underflow { .. })));
    }

    #[test]
    fn test_string_rejects_invalid_utf8() {
        let buf = [0u8, 2, 0xFF, 0xFE];
        let mut reader = TagReader::new(&buf);

        assert_eq!(reader.read_str(), Err(CodecError::InvalidUtf8));
    }
}
