//! Bounds-checked little-endian reads over the raw AXML/ARSC buffers.
//!
//! Every read is random access: callers pass the absolute offset and nothing advances. The
//! AXML walk depends on this because it scans forward for markers instead of trusting the
//! header offsets.

use nom::number::complete::{le_u16, le_u32};
use nom::sequence::tuple;
use nom::IResult;

use crate::android::error::{FormatError, FormatResult};

pub const START_DOC_TAG: u32 = 0x0010_0100;
pub const END_DOC_TAG: u32 = 0x0010_0101;
pub const START_TAG: u32 = 0x0010_0102;
pub const END_TAG: u32 = 0x0010_0103;
pub const TEXT_TAG: u32 = 0x0010_0104;

pub const RES_STRING_POOL_TYPE: u16 = 0x0001;
pub const RES_TABLE_TYPE: u16 = 0x0002;
pub const RES_TABLE_PACKAGE_TYPE: u16 = 0x0200;
pub const RES_TABLE_TYPE_TYPE: u16 = 0x0201;
pub const RES_TABLE_TYPE_SPEC_TYPE: u16 = 0x0202;

/// Index value meaning "no entry" in string references and entry offset tables.
pub const NO_ENTRY: u32 = 0xFFFF_FFFF;

/// Minimum size of a `ResChunk_header`.
pub const CHUNK_HEADER_SIZE: usize = 8;

pub(crate) fn slice(buf: &[u8], offset: usize, size: usize) -> FormatResult<&[u8]> {
    offset
        .checked_add(size)
        .filter(|end| *end <= buf.len())
        .map(|end| &buf[offset..end])
        .ok_or(FormatError::OutOfRange {
            offset,
            size,
            len: buf.len(),
        })
}

pub fn read_u8(buf: &[u8], offset: usize) -> FormatResult<u8> {
    Ok(slice(buf, offset, 1)?[0])
}

pub fn read_u16(buf: &[u8], offset: usize) -> FormatResult<u16> {
    let bytes = slice(buf, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

pub fn read_u32(buf: &[u8], offset: usize) -> FormatResult<u32> {
    let bytes = slice(buf, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Runs a nom parser over `buf[offset..]`, translating parse failures into `Truncated`.
pub(crate) fn parse_at<'a, O, P>(buf: &'a [u8], offset: usize, mut parser: P) -> FormatResult<O>
where
    P: FnMut(&'a [u8]) -> IResult<&'a [u8], O>,
{
    let input = buf.get(offset..).ok_or(FormatError::OutOfRange {
        offset,
        size: 0,
        len: buf.len(),
    })?;
    parser(input)
        .map(|(_, value)| value)
        .map_err(|_| FormatError::Truncated { offset })
}

fn chunk_header_fields(input: &[u8]) -> IResult<&[u8], (u16, u16, u32)> {
    tuple((le_u16, le_u16, le_u32))(input)
}

/// A `ResChunk_header` located at `start` in the enclosing buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkHeader {
    pub chunk_type: u16,
    pub header_size: u16,
    pub chunk_size: u32,
    pub start: usize,
}

impl ChunkHeader {
    /// Reads and validates the header at `offset`. The whole chunk must fit in `buf`.
    pub fn read(buf: &[u8], offset: usize) -> FormatResult<Self> {
        let (chunk_type, header_size, chunk_size) = parse_at(buf, offset, chunk_header_fields)?;
        if (header_size as usize) < CHUNK_HEADER_SIZE || chunk_size < header_size as u32 {
            return Err(FormatError::MalformedChunk {
                offset,
                reason: "chunk size smaller than its header",
            });
        }
        let header = ChunkHeader {
            chunk_type,
            header_size,
            chunk_size,
            start: offset,
        };
        if header.end() > buf.len() {
            return Err(FormatError::MalformedChunk {
                offset,
                reason: "chunk extends past end of buffer",
            });
        }
        Ok(header)
    }

    /// Like [`ChunkHeader::read`], but fails unless the chunk has the expected type.
    pub fn expect(buf: &[u8], offset: usize, expected: u16) -> FormatResult<Self> {
        let header = Self::read(buf, offset)?;
        if header.chunk_type != expected {
            return Err(FormatError::UnexpectedChunkType {
                offset,
                expected,
                found: header.chunk_type,
            });
        }
        Ok(header)
    }

    /// Offset of the first byte after the chunk header.
    pub fn body(&self) -> usize {
        self.start + self.header_size as usize
    }

    pub fn end(&self) -> usize {
        self.start.saturating_add(self.chunk_size as usize)
    }
}

/// Iterates the sibling chunks laid out back to back in `buf[start..end]`.
pub(crate) struct Chunks<'a> {
    buf: &'a [u8],
    pos: usize,
    end: usize,
}

impl<'a> Chunks<'a> {
    pub(crate) fn new(buf: &'a [u8], start: usize, end: usize) -> Self {
        Chunks {
            buf,
            pos: start,
            end: end.min(buf.len()),
        }
    }
}

impl Iterator for Chunks<'_> {
    type Item = FormatResult<ChunkHeader>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos + CHUNK_HEADER_SIZE > self.end {
            return None;
        }
        match ChunkHeader::read(self.buf, self.pos) {
            Ok(header) if header.end() <= self.end => {
                self.pos = header.end();
                Some(Ok(header))
            }
            Ok(header) => {
                self.pos = self.end;
                Some(Err(FormatError::MalformedChunk {
                    offset: header.start,
                    reason: "chunk extends past its parent",
                }))
            }
            Err(err) => {
                self.pos = self.end;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian_at_arbitrary_offsets() {
        let buf = [0xAA, 0x02, 0x01, 0x04, 0x03, 0x02, 0x01];
        assert_eq!(read_u8(&buf, 0).unwrap(), 0xAA);
        assert_eq!(read_u16(&buf, 1).unwrap(), 0x0102);
        assert_eq!(read_u32(&buf, 3).unwrap(), 0x0102_0304);
    }

    #[test]
    fn rejects_reads_past_the_end() {
        let buf = [0u8; 6];
        assert_eq!(
            read_u32(&buf, 3),
            Err(FormatError::OutOfRange {
                offset: 3,
                size: 4,
                len: 6
            })
        );
        assert!(read_u16(&buf, usize::MAX).is_err());
        assert!(read_u8(&buf, 6).is_err());
    }

    #[test]
    fn chunk_header_must_fit_in_buffer() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&RES_TABLE_TYPE.to_le_bytes());
        buf.extend_from_slice(&12u16.to_le_bytes());
        buf.extend_from_slice(&64u32.to_le_bytes());
        buf.extend_from_slice(&[0u8; 4]);
        assert!(matches!(
            ChunkHeader::read(&buf, 0),
            Err(FormatError::MalformedChunk { .. })
        ));

        buf[4..8].copy_from_slice(&12u32.to_le_bytes());
        let header = ChunkHeader::expect(&buf, 0, RES_TABLE_TYPE).unwrap();
        assert_eq!(header.body(), 12);
        assert_eq!(header.end(), 12);
        assert!(matches!(
            ChunkHeader::expect(&buf, 0, RES_STRING_POOL_TYPE),
            Err(FormatError::UnexpectedChunkType { found: RES_TABLE_TYPE, .. })
        ));
    }
}
