//! Provides functionality to read primitives from a JFR chunk held in memory.
//!
//! Related JMC code: [SeekableInputStream.java](https://github.com/openjdk/jmc/blob/8.2.0-ga/core/org.openjdk.jmc.flightrecorder/src/main/java/org/openjdk/jmc/flightrecorder/internal/parser/v1/SeekableInputStream.java)

use crate::reader::type_descriptor::BuiltinType;
use crate::reader::{Error, Result};
use byteorder::{ByteOrder, BE};
use std::borrow::Cow;

const STRING_ENCODING_NULL: u8 = 0;
const STRING_ENCODING_EMPTY_STRING: u8 = 1;
const STRING_ENCODING_UTF8_BYTE_ARRAY: u8 = 3;
const STRING_ENCODING_CHAR_ARRAY: u8 = 4;
const STRING_ENCODING_LATIN1_BYTE_ARRAY: u8 = 5;

const VAR_LONG_MAX_BYTES: usize = 9;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum IntEncoding {
    Raw,
    Compressed, // varint encoding, but not ZigZag
}

/// Position-tracked view over an immutable byte buffer.
///
/// `base` is the absolute file offset of `buf[0]` and is only used for error reporting.
#[derive(Debug, Clone)]
pub struct ByteStream<'a> {
    buf: &'a [u8],
    pos: usize,
    base: usize,
    int_encoding: IntEncoding,
}

impl<'a> ByteStream<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self::with_base(buf, 0)
    }

    pub fn with_base(buf: &'a [u8], base: usize) -> Self {
        Self {
            buf,
            pos: 0,
            base,
            int_encoding: IntEncoding::Raw,
        }
    }

    pub fn set_int_encoding(&mut self, encoding: IntEncoding) {
        self.int_encoding = encoding;
    }

    pub fn int_encoding(&self) -> IntEncoding {
        self.int_encoding
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Absolute file offset of the current position.
    pub fn absolute_position(&self) -> usize {
        self.base + self.pos
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn seek(&mut self, position: usize) -> Result<()> {
        if position > self.buf.len() {
            return Err(Error::UnexpectedEndOfInput {
                offset: self.base + position,
                needed: position - self.buf.len(),
            });
        }
        self.pos = position;
        Ok(())
    }

    /// Returns a stream over `[position, position + len)` sharing this stream's encoding.
    pub fn sub_stream(&self, position: usize, len: usize) -> Result<ByteStream<'a>> {
        let end = position
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or(Error::UnexpectedEndOfInput {
                offset: self.base + position,
                needed: len.saturating_sub(self.buf.len().saturating_sub(position)),
            })?;
        Ok(ByteStream {
            buf: &self.buf[position..end],
            pos: 0,
            base: self.base + position,
            int_encoding: self.int_encoding,
        })
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(Error::UnexpectedEndOfInput {
                offset: self.absolute_position(),
                needed: len - self.remaining(),
            });
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.read_bytes(len).map(drop)
    }

    pub fn read_exact<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0; N];
        buf.copy_from_slice(self.read_bytes(N)?);
        Ok(buf)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.read_bytes(1).map(|b| b[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        self.read_u8().map(|b| b as i8)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        self.read_u8().map(|b| b != 0)
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        match self.int_encoding {
            IntEncoding::Raw => self.read_bytes(2).map(BE::read_i16),
            IntEncoding::Compressed => self.read_var_u32().map(|i| i as i16),
        }
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        match self.int_encoding {
            IntEncoding::Raw => self.read_bytes(4).map(BE::read_i32),
            IntEncoding::Compressed => self.read_var_u32().map(|i| i as i32),
        }
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        match self.int_encoding {
            IntEncoding::Raw => self.read_bytes(8).map(BE::read_i64),
            IntEncoding::Compressed => self.read_var_u64().map(|i| i as i64),
        }
    }

    pub fn read_u64_be(&mut self) -> Result<u64> {
        self.read_bytes(8).map(BE::read_u64)
    }

    pub fn read_u32_be(&mut self) -> Result<u32> {
        self.read_bytes(4).map(BE::read_u32)
    }

    pub fn read_u16_be(&mut self) -> Result<u16> {
        self.read_bytes(2).map(BE::read_u16)
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        self.read_bytes(4).map(BE::read_f32)
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        self.read_bytes(8).map(BE::read_f64)
    }

    pub fn read_char(&mut self) -> Result<char> {
        let code = match self.int_encoding {
            IntEncoding::Raw => self.read_u16_be()? as u32,
            IntEncoding::Compressed => self.read_var_u32()?,
        };
        Ok(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER))
    }

    /// Reads a base-128 varint into 32 bits. More than 5 bytes is an overflow.
    pub fn read_var_u32(&mut self) -> Result<u32> {
        let start = self.absolute_position();
        let mut ret = 0u32;
        let mut shift = 0;
        loop {
            if shift >= 32 {
                return Err(Error::IntegerOverflow { offset: start });
            }
            let b = self.read_u8()?;
            ret |= ((b & 0x7f) as u32) << shift;
            if b & 0x80 == 0 {
                return Ok(ret);
            }
            shift += 7;
        }
    }

    /// Reads a base-128 varint into 64 bits. The 9th byte contributes all of its 8 bits.
    pub fn read_var_u64(&mut self) -> Result<u64> {
        let mut ret = 0u64;
        for i in 0..VAR_LONG_MAX_BYTES - 1 {
            let b = self.read_u8()? as u64;
            ret |= (b & 0x7f) << (7 * i);
            if b & 0x80 == 0 {
                return Ok(ret);
            }
        }
        Ok(ret | ((self.read_u8()? as u64) << 56))
    }

    /// Reads a tagged string. UTF-8 text and ASCII-only Latin-1 text borrow from the buffer.
    pub fn read_string(&mut self) -> Result<Cow<'a, str>> {
        let offset = self.absolute_position();
        match self.read_u8()? {
            STRING_ENCODING_NULL | STRING_ENCODING_EMPTY_STRING => Ok(Cow::Borrowed("")),
            STRING_ENCODING_UTF8_BYTE_ARRAY => {
                let size = self.read_length()?;
                Ok(String::from_utf8_lossy(self.read_bytes(size)?))
            }
            STRING_ENCODING_CHAR_ARRAY => {
                let size = self.read_length()?;
                let mut buf = String::with_capacity(size.min(self.remaining()));
                for _ in 0..size {
                    buf.push(self.read_char()?);
                }
                Ok(Cow::Owned(buf))
            }
            STRING_ENCODING_LATIN1_BYTE_ARRAY => {
                let size = self.read_length()?;
                let bytes = self.read_bytes(size)?;
                if bytes.is_ascii() {
                    // ASCII is a subset of both Latin-1 and UTF-8
                    Ok(String::from_utf8_lossy(bytes))
                } else {
                    Ok(Cow::Owned(bytes.iter().map(|&c| c as char).collect()))
                }
            }
            tag => Err(Error::UnknownStringEncoding { offset, tag }),
        }
    }

    pub fn skip_string(&mut self) -> Result<()> {
        let offset = self.absolute_position();
        match self.read_u8()? {
            STRING_ENCODING_NULL | STRING_ENCODING_EMPTY_STRING => Ok(()),
            STRING_ENCODING_UTF8_BYTE_ARRAY | STRING_ENCODING_LATIN1_BYTE_ARRAY => {
                let size = self.read_length()?;
                self.skip(size)
            }
            STRING_ENCODING_CHAR_ARRAY => {
                let size = self.read_length()?;
                for _ in 0..size {
                    self.read_char()?;
                }
                Ok(())
            }
            tag => Err(Error::UnknownStringEncoding { offset, tag }),
        }
    }

    /// Advances past one value of a builtin primitive (or string) type.
    pub fn skip_primitive(&mut self, ty: BuiltinType) -> Result<()> {
        match ty {
            BuiltinType::Boolean | BuiltinType::Byte => self.skip(1),
            BuiltinType::Short => self.read_i16().map(drop),
            BuiltinType::Char => self.read_char().map(drop),
            BuiltinType::Int => self.read_i32().map(drop),
            BuiltinType::Long => self.read_i64().map(drop),
            BuiltinType::Float => self.skip(4),
            BuiltinType::Double => self.skip(8),
            BuiltinType::String => self.skip_string(),
            // composite builtins are skipped field by field, never here
            _ => Ok(()),
        }
    }

    fn read_length(&mut self) -> Result<usize> {
        self.read_i32().map(|len| len.max(0) as usize)
    }
}
