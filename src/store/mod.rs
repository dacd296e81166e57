//! Sequential byte sinks and sources the codec reads from and writes to.
//!
//! Packed words are little-endian on the wire; `lib.rs` refuses to build on
//! other targets so the words can be cast to bytes directly.

use std::io::Write;

use crate::{
    error::{CodecError, Result},
    utils::vint,
};

pub trait DataOutput {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()>;

    /// Number of bytes written so far.
    fn file_pointer(&self) -> u64;

    fn write_byte(&mut self, b: u8) -> Result<()> {
        self.write_bytes(&[b])
    }

    fn write_vint(&mut self, val: u32) -> Result<()> {
        let mut buf = [0u8; 5];
        let len = vint::encode_vint32_to(val, &mut buf);
        self.write_bytes(&buf[..len])
    }

    fn write_vlong(&mut self, val: u64) -> Result<()> {
        let mut buf = [0u8; 10];
        let len = vint::encode_vint64_to(val, &mut buf);
        self.write_bytes(&buf[..len])
    }

    fn write_longs(&mut self, words: &[u64]) -> Result<()> {
        self.write_bytes(bytemuck::cast_slice(words))
    }
}

impl DataOutput for Vec<u8> {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.extend_from_slice(bytes);
        Ok(())
    }

    fn file_pointer(&self) -> u64 {
        self.len() as u64
    }

    fn write_byte(&mut self, b: u8) -> Result<()> {
        self.push(b);
        Ok(())
    }

    fn write_vlong(&mut self, val: u64) -> Result<()> {
        vint::encode_vint64(val, self)?;
        Ok(())
    }
}

/// A [`DataOutput`] over any writer, tracking how many bytes went through it.
pub struct CountingWriter<W: Write> {
    inner: W,
    written: u64,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> DataOutput for CountingWriter<W> {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes)?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    fn file_pointer(&self) -> u64 {
        self.written
    }
}

pub trait DataInput {
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()>;

    fn skip_bytes(&mut self, n: usize) -> Result<()>;

    fn read_byte(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.read_bytes(&mut b)?;
        Ok(b[0])
    }

    fn read_vint(&mut self) -> Result<u32> {
        let mut result = 0u32;
        for shift in (0..35).step_by(7) {
            let b = self.read_byte()?;
            if shift == 28 && b > 0x0f {
                break;
            }
            result |= u32::from(b & 127) << shift;
            if b & 128 == 0 {
                return Ok(result);
            }
        }
        Err(CodecError::corruption("invalid vint32"))
    }

    fn read_vlong(&mut self) -> Result<u64> {
        let mut result = 0u64;
        for shift in (0..70).step_by(7) {
            let b = self.read_byte()?;
            if shift == 63 && b > 0x01 {
                break;
            }
            result |= u64::from(b & 127) << shift;
            if b & 128 == 0 {
                return Ok(result);
            }
        }
        Err(CodecError::corruption("invalid vint64"))
    }

    fn read_longs(&mut self, words: &mut [u64]) -> Result<()> {
        self.read_bytes(bytemuck::cast_slice_mut(words))
    }
}

// Reading consumes from the front of the slice.
impl DataInput for &[u8] {
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        if self.len() < buf.len() {
            return Err(CodecError::UnexpectedEof {
                needed: buf.len(),
                remaining: self.len(),
            });
        }
        let data = *self;
        let (head, tail) = data.split_at(buf.len());
        buf.copy_from_slice(head);
        *self = tail;
        Ok(())
    }

    fn skip_bytes(&mut self, n: usize) -> Result<()> {
        if self.len() < n {
            return Err(CodecError::UnexpectedEof {
                needed: n,
                remaining: self.len(),
            });
        }
        *self = &self[n..];
        Ok(())
    }

    fn read_byte(&mut self) -> Result<u8> {
        let data = *self;
        let (&b, tail) = data.split_first().ok_or(CodecError::UnexpectedEof {
            needed: 1,
            remaining: 0,
        })?;
        *self = tail;
        Ok(b)
    }

    fn read_vint(&mut self) -> Result<u32> {
        vint::decode_vint32(self)
    }

    fn read_vlong(&mut self) -> Result<u64> {
        vint::decode_vint64(self)
    }
}
