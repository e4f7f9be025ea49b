//! Little-endian cursor primitives for dex data
//!
//! Reading goes through [`Reader`], a cheap `Copy`-able cursor over the input
//! bytes. Following an offset pointer is done on a fresh reader, so the
//! enclosing sequential read never has to save and restore its position.
//! Writing helpers append to a `Vec<u8>`; output regions build on them.

use crate::{Error, Result};

/// Cursor over an immutable byte buffer
#[derive(Debug, Clone, Copy)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Create a reader positioned at the start of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Create a reader positioned at `offset`
    pub fn at(data: &'a [u8], offset: usize) -> Self {
        Self { data, pos: offset }
    }

    /// Current absolute position
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Move to an absolute position
    pub fn seek(&mut self, offset: usize) {
        self.pos = offset;
    }

    /// Number of bytes left after the cursor
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or(Error::UnexpectedEof {
                offset: self.pos,
                needed: n,
            })?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    /// Read `n` raw bytes
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    /// Read an unsigned LEB128 value of at most five bytes
    pub fn read_uleb128(&mut self) -> Result<u32> {
        let start = self.pos;
        let mut result = 0u32;
        let mut shift = 0;
        loop {
            let byte = self.read_u8()?;
            result |= u32::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
            if shift >= 35 {
                return Err(Error::InvalidDex(format!(
                    "ULEB128 at {start:#x} is longer than five bytes"
                )));
            }
        }
    }

    /// Read a signed LEB128 value of at most five bytes
    pub fn read_sleb128(&mut self) -> Result<i32> {
        let start = self.pos;
        let mut result = 0i32;
        let mut shift = 0;
        loop {
            let byte = self.read_u8()?;
            result |= i32::from(byte & 0x7f) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < 32 && byte & 0x40 != 0 {
                    result |= -1i32 << shift;
                }
                return Ok(result);
            }
            if shift >= 35 {
                return Err(Error::InvalidDex(format!(
                    "SLEB128 at {start:#x} is longer than five bytes"
                )));
            }
        }
    }

    /// Skip forward to the next multiple of four
    pub fn align_to_four_bytes(&mut self) {
        self.pos = (self.pos + 3) & !3;
    }
}

/// Append an unsigned LEB128 value
pub fn write_uleb128(out: &mut Vec<u8>, mut value: u32) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Append a signed LEB128 value
pub fn write_sleb128(out: &mut Vec<u8>, mut value: i32) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
        if done {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Round `value` up to the next multiple of four
pub fn align4(value: usize) -> usize {
    (value + 3) & !3
}
