//! Encoded value transcoding
//!
//! Static field initializers are stored as `encoded_array` items: a stream of
//! self-describing values, each led by one header byte holding the value type
//! in its low five bits and `size - 1` (or a small argument) in its high three.
//! Values that name a pool entry are translated through the owning input's
//! [`IndexMap`] and written back at the smallest width that holds the new
//! index; everything else is copied through byte for byte.

use crate::io::{write_uleb128, Reader};
use crate::index_map::IndexMap;
use crate::{Error, Result};

pub const VALUE_BYTE: u8 = 0x00;
pub const VALUE_SHORT: u8 = 0x02;
pub const VALUE_CHAR: u8 = 0x03;
pub const VALUE_INT: u8 = 0x04;
pub const VALUE_LONG: u8 = 0x06;
pub const VALUE_FLOAT: u8 = 0x10;
pub const VALUE_DOUBLE: u8 = 0x11;
pub const VALUE_METHOD_TYPE: u8 = 0x15;
pub const VALUE_METHOD_HANDLE: u8 = 0x16;
pub const VALUE_STRING: u8 = 0x17;
pub const VALUE_TYPE: u8 = 0x18;
pub const VALUE_FIELD: u8 = 0x19;
pub const VALUE_METHOD: u8 = 0x1a;
pub const VALUE_ENUM: u8 = 0x1b;
pub const VALUE_ARRAY: u8 = 0x1c;
pub const VALUE_ANNOTATION: u8 = 0x1d;
pub const VALUE_NULL: u8 = 0x1e;
pub const VALUE_BOOLEAN: u8 = 0x1f;

/// Rewrites encoded values from one input into the merged index space
pub struct EncodedValueTranscoder<'a> {
    map: &'a IndexMap,
}

impl<'a> EncodedValueTranscoder<'a> {
    pub fn new(map: &'a IndexMap) -> Self {
        Self { map }
    }

    /// Transcode an `encoded_array`: ULEB128 count, then that many values
    pub fn transcode_array(&self, reader: &mut Reader<'_>, out: &mut Vec<u8>) -> Result<()> {
        let size = reader.read_uleb128()?;
        write_uleb128(out, size);
        for _ in 0..size {
            self.transcode_value(reader, out)?;
        }
        Ok(())
    }

    /// Transcode an `encoded_annotation`: type, member count, then
    /// (name, value) pairs
    pub fn transcode_annotation(&self, reader: &mut Reader<'_>, out: &mut Vec<u8>) -> Result<()> {
        let type_idx = self.map.remap_type(reader.read_uleb128()?)?;
        write_uleb128(out, type_idx);
        let size = reader.read_uleb128()?;
        write_uleb128(out, size);
        for _ in 0..size {
            let name_idx = self.map.remap_string(reader.read_uleb128()?)?;
            write_uleb128(out, name_idx);
            self.transcode_value(reader, out)?;
        }
        Ok(())
    }

    /// Transcode one `encoded_value`
    pub fn transcode_value(&self, reader: &mut Reader<'_>, out: &mut Vec<u8>) -> Result<()> {
        let header = reader.read_u8()?;
        let value_type = header & 0x1f;
        let arg = header >> 5;
        let width = usize::from(arg) + 1;

        match value_type {
            VALUE_BYTE | VALUE_SHORT | VALUE_CHAR | VALUE_INT | VALUE_LONG | VALUE_FLOAT
            | VALUE_DOUBLE => {
                out.push(header);
                out.extend_from_slice(reader.read_bytes(width)?);
            }
            VALUE_METHOD_TYPE | VALUE_STRING | VALUE_TYPE | VALUE_FIELD | VALUE_METHOD
            | VALUE_ENUM => {
                let old = read_index(reader, width)?;
                let new = match value_type {
                    VALUE_METHOD_TYPE => self.map.remap_proto(old)?,
                    VALUE_STRING => self.map.remap_string(old)?,
                    VALUE_TYPE => self.map.remap_type(old)?,
                    VALUE_METHOD => self.map.remap_method(old)?,
                    _ => self.map.remap_field(old)?,
                };
                write_index(out, value_type, new);
            }
            VALUE_ARRAY => {
                out.push(header);
                self.transcode_array(reader, out)?;
            }
            VALUE_ANNOTATION => {
                out.push(header);
                self.transcode_annotation(reader, out)?;
            }
            VALUE_NULL | VALUE_BOOLEAN => out.push(header),
            other => return Err(Error::UnsupportedValue(other)),
        }
        Ok(())
    }
}

/// Read a little-endian unsigned index of `width` bytes
fn read_index(reader: &mut Reader<'_>, width: usize) -> Result<u32> {
    if width > 4 {
        return Err(Error::InvalidDex(format!(
            "index value at {:#x} is {width} bytes wide",
            reader.position()
        )));
    }
    Ok(reader
        .read_bytes(width)?
        .iter()
        .rev()
        .fold(0u32, |acc, &b| (acc << 8) | u32::from(b)))
}

/// Smallest number of bytes (1..=4) that holds `value`
pub fn minimal_width(value: u32) -> usize {
    match value {
        0..=0xff => 1,
        0x100..=0xffff => 2,
        0x1_0000..=0xff_ffff => 3,
        _ => 4,
    }
}

fn write_index(out: &mut Vec<u8>, value_type: u8, index: u32) {
    let width = minimal_width(index);
    out.push(((width as u8 - 1) << 5) | value_type);
    out.extend_from_slice(&index.to_le_bytes()[..width]);
}
