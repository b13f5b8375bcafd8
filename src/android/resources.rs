//! Decoder for the compiled resource table (`resources.arsc`).
//!
//! Only simple entries are interpreted. Every `TYPE` chunk is one configuration variant, so a
//! resource id maps to an ordered list of values, one per configuration that defines it.
//! Reference entries are recorded as edges and copied once the whole package is loaded.

use std::collections::{BTreeMap, BTreeSet};

use bitflags::bitflags;
use log::debug;
use nom::bytes::complete::take;
use nom::number::complete::{le_u16, le_u32, le_u8};
use nom::sequence::tuple;
use nom::IResult;
use serde::{Deserialize, Serialize};

use crate::android::chunk::{
    parse_at, read_u16, read_u32, read_u8, slice, ChunkHeader, Chunks, NO_ENTRY,
    RES_STRING_POOL_TYPE, RES_TABLE_PACKAGE_TYPE, RES_TABLE_TYPE, RES_TABLE_TYPE_SPEC_TYPE,
    RES_TABLE_TYPE_TYPE,
};
use crate::android::error::{FormatError, FormatResult};
use crate::android::string_pool::StringPool;
use crate::android::value::{format_typed_value, ResourceId, TYPE_NULL, TYPE_REFERENCE, TYPE_STRING};

bitflags! {
    /// `ResTable_entry::flags`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct EntryFlags: u16 {
        const COMPLEX = 0x0001;
        const PUBLIC = 0x0002;
        const WEAK = 0x0004;
        const COMPACT = 0x0008;
    }
}

bitflags! {
    /// `ResTable_type::flags`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TypeFlags: u8 {
        const SPARSE = 0x01;
        const OFFSET16 = 0x02;
    }
}

const NO_ENTRY_16: u16 = 0xFFFF;
const PACKAGE_NAME_SIZE: usize = 256;
const MAP_ENTRY_SIZE: usize = 12;
/// Smallest `ResTable_config` that still carries locale and density.
const CONFIG_LOCALE_DENSITY_SIZE: u32 = 16;

/// The configuration axes this crate reads from `ResTable_config`.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Configuration {
    pub language: String,
    pub country: String,
    pub density: u16,
}

impl Configuration {
    /// `""` for the default locale, otherwise `"en"` or `"en-US"`.
    pub fn locale(&self) -> String {
        match (self.language.is_empty(), self.country.is_empty()) {
            (true, _) => String::new(),
            (false, true) => self.language.clone(),
            (false, false) => format!("{}-{}", self.language, self.country),
        }
    }

    fn read(buf: &[u8], offset: usize) -> FormatResult<Self> {
        let size = read_u32(buf, offset)?;
        if size < CONFIG_LOCALE_DENSITY_SIZE {
            return Ok(Configuration::default());
        }
        let locale = slice(buf, offset + 8, 4)?;
        Ok(Configuration {
            language: unpack_locale_part(locale[0], locale[1], b'a'),
            country: unpack_locale_part(locale[2], locale[3], b'0'),
            density: read_u16(buf, offset + 14)?,
        })
    }
}

/// Decodes a two-byte language or region field, including the packed three-letter form.
fn unpack_locale_part(first: u8, second: u8, base: u8) -> String {
    if first & 0x80 != 0 {
        let letters = [
            second & 0x1f,
            ((second & 0xe0) >> 5) | ((first & 0x03) << 3),
            (first & 0x7c) >> 2,
        ];
        letters.iter().map(|l| (base + l) as char).collect()
    } else {
        [first, second]
            .iter()
            .take_while(|b| **b != 0)
            .map(|b| *b as char)
            .collect()
    }
}

/// One value of a resource under one configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceValue {
    pub value: String,
    pub config: Configuration,
}

/// A decoded resource table: every simple entry of every package, keyed by id.
#[derive(Clone, Debug, Default)]
pub struct ResourceTable {
    pub package_id: u8,
    pub package_name: String,
    pub type_strings: StringPool,
    pub key_strings: StringPool,
    pub value_strings: StringPool,
    entries: BTreeMap<ResourceId, Vec<ResourceValue>>,
}

impl ResourceTable {
    /// Decodes a whole `resources.arsc` buffer.
    pub fn parse(buf: &[u8]) -> FormatResult<Self> {
        if buf.is_empty() {
            return Err(FormatError::EmptyInput);
        }
        let chunk_type = read_u16(buf, 0)?;
        if chunk_type != RES_TABLE_TYPE {
            return Err(FormatError::UnexpectedChunkType {
                offset: 0,
                expected: RES_TABLE_TYPE,
                found: chunk_type,
            });
        }
        let declared_size = read_u32(buf, 4)? as usize;
        if declared_size != buf.len() {
            return Err(FormatError::SizeMismatch {
                declared: declared_size,
                actual: buf.len(),
            });
        }
        let root = ChunkHeader::read(buf, 0)?;
        let declared_packages = read_u32(buf, 8)?;

        let mut pools = Vec::new();
        let mut packages = Vec::new();
        for chunk in Chunks::new(buf, root.body(), root.end()) {
            let chunk = chunk?;
            match chunk.chunk_type {
                RES_STRING_POOL_TYPE => pools.push(chunk),
                RES_TABLE_PACKAGE_TYPE => packages.push(chunk),
                other => debug!("ARSC: skipping top-level chunk {other:#06x} at {:#x}", chunk.start),
            }
        }
        if pools.len() != 1 {
            return Err(FormatError::StringPoolCount(pools.len()));
        }
        if packages.len() as u32 != declared_packages {
            return Err(FormatError::PackageCountMismatch {
                declared: declared_packages,
                parsed: packages.len() as u32,
            });
        }

        let value_strings = StringPool::from_chunk(buf, pools[0].start)?;
        let mut table = ResourceTable {
            value_strings,
            ..ResourceTable::default()
        };
        for (idx, chunk) in packages.iter().enumerate() {
            let package = PackageReader::read(buf, chunk, &table.value_strings)?;
            debug!(
                "ARSC: package {:#04x} '{}' with {} resolved ids",
                package.id,
                package.name,
                package.entries.len()
            );
            for (id, values) in package.entries {
                table.entries.entry(id).or_default().extend(values);
            }
            if idx == 0 {
                table.package_id = package.id;
                table.package_name = package.name;
                table.type_strings = package.type_strings;
                table.key_strings = package.key_strings;
            }
        }
        Ok(table)
    }

    /// All values recorded for `id`, in configuration order.
    pub fn values(&self, id: ResourceId) -> &[ResourceValue] {
        self.entries.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Looks up a textual id such as `@7f0b0001`, ignoring case.
    pub fn lookup(&self, id: &str) -> Option<&[ResourceValue]> {
        let id = id.parse::<ResourceId>().ok()?;
        self.entries.get(&id).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Values of the requested ids, keyed by their `@XXXXXXXX` form. Ids without any value
    /// are left out.
    pub fn resolve(&self, requested: &BTreeSet<ResourceId>) -> BTreeMap<String, Vec<String>> {
        requested
            .iter()
            .filter_map(|id| {
                let values = self.values(*id);
                if values.is_empty() {
                    None
                } else {
                    Some((id.to_string(), values.iter().map(|v| v.value.clone()).collect()))
                }
            })
            .collect()
    }
}

/// Decodes `buf` and returns the values of `requested`.
pub fn resolve(
    buf: &[u8],
    requested: &BTreeSet<ResourceId>,
) -> FormatResult<BTreeMap<String, Vec<String>>> {
    Ok(ResourceTable::parse(buf)?.resolve(requested))
}

fn package_header_fields(input: &[u8]) -> IResult<&[u8], (u32, &[u8], u32, u32, u32, u32)> {
    tuple((le_u32, take(PACKAGE_NAME_SIZE), le_u32, le_u32, le_u32, le_u32))(input)
}

fn type_header_fields(input: &[u8]) -> IResult<&[u8], (u8, u8, u16, u32, u32)> {
    tuple((le_u8, le_u8, le_u16, le_u32, le_u32))(input)
}

fn type_spec_header_fields(input: &[u8]) -> IResult<&[u8], (u8, u8, u16, u32)> {
    tuple((le_u8, le_u8, le_u16, le_u32))(input)
}

fn decode_package_name(raw: &[u8]) -> String {
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take_while(|unit| *unit != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

struct Package {
    id: u8,
    name: String,
    type_strings: StringPool,
    key_strings: StringPool,
    entries: BTreeMap<ResourceId, Vec<ResourceValue>>,
}

/// Per-package decoding state. Reference edges stay local to the package.
struct PackageReader<'a> {
    buf: &'a [u8],
    package_id: u8,
    values: &'a StringPool,
    entries: BTreeMap<ResourceId, Vec<ResourceValue>>,
    edges: Vec<(ResourceId, ResourceId)>,
}

impl<'a> PackageReader<'a> {
    fn read(buf: &'a [u8], chunk: &ChunkHeader, values: &'a StringPool) -> FormatResult<Package> {
        let buf = &buf[..chunk.end()];
        let (id, raw_name, type_strings, _last_public_type, key_strings, _last_public_key) =
            parse_at(buf, chunk.start + 8, package_header_fields)?;
        let type_strings = match type_strings {
            0 => StringPool::default(),
            offset => StringPool::from_chunk(buf, chunk.start + offset as usize)?,
        };
        let key_strings = match key_strings {
            0 => StringPool::default(),
            offset => StringPool::from_chunk(buf, chunk.start + offset as usize)?,
        };

        let mut reader = PackageReader {
            buf,
            package_id: id as u8,
            values,
            entries: BTreeMap::new(),
            edges: Vec::new(),
        };
        for sub in Chunks::new(buf, chunk.body(), chunk.end()) {
            let sub = sub?;
            match sub.chunk_type {
                // The type and key pools, already decoded through their offsets.
                RES_STRING_POOL_TYPE => {}
                RES_TABLE_TYPE_SPEC_TYPE => reader.check_type_spec(&sub)?,
                RES_TABLE_TYPE_TYPE => reader.read_type(&sub)?,
                other => debug!("ARSC: skipping package chunk {other:#06x} at {:#x}", sub.start),
            }
        }
        reader.resolve_references();

        Ok(Package {
            id: reader.package_id,
            name: decode_package_name(raw_name),
            type_strings,
            key_strings,
            entries: reader.entries,
        })
    }

    /// Type specs only carry configuration masks; make sure they fit their chunk.
    fn check_type_spec(&self, chunk: &ChunkHeader) -> FormatResult<()> {
        let (id, _res0, _types_count, entry_count) =
            parse_at(self.buf, chunk.start + 8, type_spec_header_fields)?;
        let masks = (entry_count as usize).checked_mul(4);
        match masks.and_then(|len| chunk.body().checked_add(len)) {
            Some(end) if end <= chunk.end() => Ok(()),
            _ => {
                debug!("ARSC: type spec {id:#04x} declares {entry_count} entries past its end");
                Err(FormatError::MalformedChunk {
                    offset: chunk.start,
                    reason: "type spec entry masks exceed chunk",
                })
            }
        }
    }

    fn read_type(&mut self, chunk: &ChunkHeader) -> FormatResult<()> {
        let buf = self.buf;
        let buf = &buf[..chunk.end()];
        let (type_id, flags, _reserved, entry_count, entries_start) =
            parse_at(buf, chunk.start + 8, type_header_fields)?;
        let flags = TypeFlags::from_bits_retain(flags);
        let config = Configuration::read(buf, chunk.start + 20)?;
        let index_base = chunk.body();
        let entries_base = chunk.start + entries_start as usize;

        let mut slots = Vec::new();
        for i in 0..entry_count as usize {
            if flags.contains(TypeFlags::SPARSE) {
                let index = read_u16(buf, index_base + i * 4)?;
                let offset = read_u16(buf, index_base + i * 4 + 2)? as usize * 4;
                slots.push((index, offset));
            } else if flags.contains(TypeFlags::OFFSET16) {
                let offset = read_u16(buf, index_base + i * 2)?;
                if offset != NO_ENTRY_16 {
                    slots.push((i as u16, offset as usize * 4));
                }
            } else {
                let offset = read_u32(buf, index_base + i * 4)?;
                if offset != NO_ENTRY {
                    slots.push((i as u16, offset as usize));
                }
            }
        }

        for (index, offset) in slots {
            let id = ResourceId::new(self.package_id, type_id, index);
            self.read_entry(buf, id, entries_base + offset, &config)?;
        }
        Ok(())
    }

    fn read_entry(
        &mut self,
        buf: &[u8],
        id: ResourceId,
        offset: usize,
        config: &Configuration,
    ) -> FormatResult<()> {
        let size = read_u16(buf, offset)? as usize;
        let flags = read_u16(buf, offset + 2)?;
        let key = read_u32(buf, offset + 4)?;
        let entry_flags = EntryFlags::from_bits_retain(flags);

        if entry_flags.contains(EntryFlags::COMPACT) {
            return self.store(id, (flags >> 8) as u8, key, config);
        }
        if entry_flags.contains(EntryFlags::COMPLEX) {
            // Map entries are out of scope; only check that their pairs are in bounds.
            let count = read_u32(buf, offset + 12)? as usize;
            let len = count.checked_mul(MAP_ENTRY_SIZE).ok_or(FormatError::MalformedChunk {
                offset,
                reason: "map entry count overflows",
            })?;
            slice(buf, offset + size, len)?;
            return Ok(());
        }
        let value_offset = offset + size;
        let data_type = read_u8(buf, value_offset + 3)?;
        let data = read_u32(buf, value_offset + 4)?;
        self.store(id, data_type, data, config)
    }

    fn store(
        &mut self,
        id: ResourceId,
        data_type: u8,
        data: u32,
        config: &Configuration,
    ) -> FormatResult<()> {
        let value = match data_type {
            TYPE_NULL => return Ok(()),
            TYPE_STRING => match self.values.lookup(data)? {
                Some(text) => text.to_string(),
                None => return Ok(()),
            },
            TYPE_REFERENCE => {
                if data != 0 {
                    self.edges.push((id, ResourceId(data)));
                }
                return Ok(());
            }
            other => format_typed_value(other, data),
        };
        self.entries.entry(id).or_default().push(ResourceValue {
            value,
            config: config.clone(),
        });
        Ok(())
    }

    /// Copies the values of each reference target onto its source, in encounter order.
    ///
    /// One pass over the edge list: targets that are only filled later, or never, contribute
    /// nothing, and edges that close a cycle are dropped.
    fn resolve_references(&mut self) {
        let edges = std::mem::take(&mut self.edges);
        let mut graph: BTreeMap<ResourceId, Vec<ResourceId>> = BTreeMap::new();
        for (source, target) in &edges {
            graph.entry(*source).or_default().push(*target);
        }

        for (source, target) in edges {
            if reaches(&graph, target, source) {
                debug!("ARSC: dropping cyclic reference {source} -> {target}");
                continue;
            }
            let copied = self.entries.get(&target).cloned().unwrap_or_default();
            if copied.is_empty() {
                debug!("ARSC: reference {source} -> {target} is unresolved");
                continue;
            }
            self.entries.entry(source).or_default().extend(copied);
        }
    }
}

fn reaches(graph: &BTreeMap<ResourceId, Vec<ResourceId>>, from: ResourceId, to: ResourceId) -> bool {
    let mut pending = vec![from];
    let mut seen = BTreeSet::new();
    while let Some(current) = pending.pop() {
        if current == to {
            return true;
        }
        if !seen.insert(current) {
            continue;
        }
        if let Some(next) = graph.get(&current) {
            pending.extend(next.iter().copied());
        }
    }
    false
}
