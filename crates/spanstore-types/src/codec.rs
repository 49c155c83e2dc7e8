//! Fixed-width, big-endian field codecs for record payloads.
//!
//! [`RecordReader`] never indexes past the end of its input: every read
//! checks the remaining length first and reports [`TypeError::Truncated`].

use crate::error::{TypeError, TypeResult};

/// Builds a record payload field by field.
#[derive(Debug, Default, Clone)]
pub struct RecordWriter {
    buf: Vec<u8>,
}

impl RecordWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn put_i32(&mut self, value: i32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn put_u64(&mut self, value: u64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn put_i64(&mut self, value: i64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Length-prefixed (u64) byte string.
    pub fn put_bytes(&mut self, value: &[u8]) -> &mut Self {
        self.put_u64(value.len() as u64);
        self.buf.extend_from_slice(value);
        self
    }

    /// Length-prefixed (u64) UTF-8 string.
    pub fn put_str(&mut self, value: &str) -> &mut Self {
        self.put_bytes(value.as_bytes())
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Reads fields back out of a record payload.
#[derive(Debug, Clone)]
pub struct RecordReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> RecordReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> TypeResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(TypeError::Truncated {
                offset: self.pos,
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> TypeResult<[u8; N]> {
        let mut arr = [0u8; N];
        arr.copy_from_slice(self.take(N)?);
        Ok(arr)
    }

    pub fn get_u8(&mut self) -> TypeResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u32(&mut self) -> TypeResult<u32> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    pub fn get_i32(&mut self) -> TypeResult<i32> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    pub fn get_u64(&mut self) -> TypeResult<u64> {
        Ok(u64::from_be_bytes(self.take_array()?))
    }

    pub fn get_i64(&mut self) -> TypeResult<i64> {
        Ok(i64::from_be_bytes(self.take_array()?))
    }

    /// Length-prefixed (u64) byte string.
    pub fn get_bytes(&mut self) -> TypeResult<&'a [u8]> {
        let offset = self.pos;
        let len = self.get_u64()?;
        let len = usize::try_from(len).map_err(|_| TypeError::Truncated {
            offset,
            needed: usize::MAX,
            available: self.remaining(),
        })?;
        self.take(len)
    }

    /// Length-prefixed (u64) UTF-8 string.
    pub fn get_str(&mut self) -> TypeResult<&'a str> {
        let offset = self.pos;
        let bytes = self.get_bytes()?;
        std::str::from_utf8(bytes).map_err(|_| TypeError::InvalidUtf8 { offset })
    }

    /// Fails unless every byte has been consumed.
    pub fn finish(self) -> TypeResult<()> {
        match self.remaining() {
            0 => Ok(()),
            remaining => Err(TypeError::TrailingBytes { remaining }),
        }
    }
}
