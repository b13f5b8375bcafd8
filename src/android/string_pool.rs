use bitflags::bitflags;
use nom::number::complete::le_u32;
use nom::sequence::tuple;
use nom::IResult;

use crate::android::chunk::{
    parse_at, read_u16, read_u32, read_u8, slice, ChunkHeader, NO_ENTRY, RES_STRING_POOL_TYPE,
};
use crate::android::error::{FormatError, FormatResult};

bitflags! {
    /// `ResStringPool_header::flags`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct StringPoolFlags: u32 {
        const SORTED = 0x0000_0001;
        const UTF8 = 0x0000_0100;
    }
}

/// The fields of a string pool header that drive decoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StringPoolHeader {
    pub string_count: u32,
    pub flags: StringPoolFlags,
    pub strings_start: u32,
}

impl StringPoolHeader {
    pub fn is_utf8(&self) -> bool {
        self.flags.contains(StringPoolFlags::UTF8)
    }
}

fn pool_header_fields(input: &[u8]) -> IResult<&[u8], (u32, u32, u32, u32)> {
    tuple((le_u32, le_u32, le_u32, le_u32))(input)
}

/// An immutable, ordered table of decoded strings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StringPool {
    strings: Vec<String>,
}

impl StringPool {
    /// Decodes a `RES_STRING_POOL_TYPE` chunk starting at `offset`.
    pub fn from_chunk(buf: &[u8], offset: usize) -> FormatResult<Self> {
        let chunk = ChunkHeader::expect(buf, offset, RES_STRING_POOL_TYPE)?;
        let (string_count, _style_count, flags, strings_start) =
            parse_at(buf, offset + 8, pool_header_fields)?;
        let header = StringPoolHeader {
            string_count,
            flags: StringPoolFlags::from_bits_retain(flags),
            strings_start,
        };
        let strings_base = chunk.start + strings_start as usize;
        Self::decode(&buf[..chunk.end()], &header, chunk.body(), strings_base)
    }

    /// Decodes `header.string_count` strings whose 32-bit offsets start at `index_offset`
    /// and are relative to `strings_base`.
    pub fn decode(
        buf: &[u8],
        header: &StringPoolHeader,
        index_offset: usize,
        strings_base: usize,
    ) -> FormatResult<Self> {
        let count = header.string_count as usize;
        let mut strings = Vec::with_capacity(count.min(buf.len() / 4));
        for i in 0..count {
            let relative = read_u32(buf, index_offset + i * 4)? as usize;
            let absolute = strings_base
                .checked_add(relative)
                .ok_or(FormatError::InvalidString { offset: strings_base })?;
            let text = if header.is_utf8() {
                read_utf8_string(buf, absolute)?
            } else {
                read_utf16_string(buf, absolute)?
            };
            strings.push(text);
        }
        Ok(StringPool { strings })
    }

    pub fn from_strings(strings: Vec<String>) -> Self {
        StringPool { strings }
    }

    /// Returns the string at `index`, or `None` for `NO_ENTRY` and out-of-range indices.
    pub fn get(&self, index: u32) -> Option<&str> {
        if index == NO_ENTRY {
            return None;
        }
        self.strings.get(index as usize).map(|s| s.as_str())
    }

    /// Like [`StringPool::get`], but an out-of-range index other than `NO_ENTRY` is an error.
    pub fn lookup(&self, index: u32) -> FormatResult<Option<&str>> {
        if index == NO_ENTRY {
            return Ok(None);
        }
        self.strings
            .get(index as usize)
            .map(|s| Some(s.as_str()))
            .ok_or(FormatError::StringIndex {
                index,
                len: self.strings.len(),
            })
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.strings.iter().map(|s| s.as_str())
    }
}

fn read_utf8_string(buf: &[u8], offset: usize) -> FormatResult<String> {
    // The first length counts UTF-16 units and is not needed to decode.
    let (_char_len, char_len_size) = read_utf8_length(buf, offset)?;
    let (byte_len, byte_len_size) = read_utf8_length(buf, offset + char_len_size)?;
    let start = offset + char_len_size + byte_len_size;
    let bytes = slice(buf, start, byte_len)?;
    std::str::from_utf8(bytes)
        .map(|text| text.to_string())
        .map_err(|_| FormatError::InvalidString { offset })
}

fn read_utf16_string(buf: &[u8], offset: usize) -> FormatResult<String> {
    let (char_count, header_size) = read_utf16_length(buf, offset)?;
    let bytes = slice(buf, offset + header_size, char_count * 2)?;
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).map_err(|_| FormatError::InvalidString { offset })
}

fn read_utf8_length(buf: &[u8], offset: usize) -> FormatResult<(usize, usize)> {
    let first = read_u8(buf, offset)?;
    if first & 0x80 == 0 {
        Ok((first as usize, 1))
    } else {
        let second = read_u8(buf, offset + 1)?;
        Ok(((((first & 0x7F) as usize) << 8) | second as usize, 2))
    }
}

fn read_utf16_length(buf: &[u8], offset: usize) -> FormatResult<(usize, usize)> {
    let first = read_u16(buf, offset)?;
    if first & 0x8000 == 0 {
        Ok((first as usize, 2))
    } else {
        let second = read_u16(buf, offset + 2)?;
        Ok(((((first & 0x7FFF) as usize) << 16) | second as usize, 4))
    }
}
