//! Decoder for the compressed binary XML used by `AndroidManifest.xml`.
//!
//! The decoder follows the word layout of the document instead of walking the chunk headers:
//! the header's tag-tree offset is only a hint, so the decoder scans forward four bytes at a
//! time until it meets the first start-tag marker and walks the tag stream from there.

use std::fmt;

use log::debug;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::Writer;

use crate::android::chunk::{
    read_u16, read_u32, END_DOC_TAG, END_TAG, NO_ENTRY, START_DOC_TAG, START_TAG, TEXT_TAG,
};
use crate::android::error::{FormatError, FormatResult, RenderError};
use crate::android::string_pool::{StringPool, StringPoolFlags, StringPoolHeader};
use crate::android::value::{format_typed_value, ResourceId, TYPE_REFERENCE, TYPE_STRING};

pub const ANDROID_NAMESPACE_URI: &str = "http://schemas.android.com/apk/res/android";

/// Offset of the string index table (header word 9).
const STRING_INDEX_OFFSET: usize = 0x24;

const TAG_TREE_HINT_WORD: usize = 3;
const STRING_COUNT_WORD: usize = 4;
const STRING_FLAGS_WORD: usize = 6;

/// Words occupied by a start tag before its attributes.
const START_TAG_WORDS: usize = 9;
const ATTRIBUTE_WORDS: usize = 5;
/// End-tag and namespace chunks are six words long.
const SHORT_CHUNK_WORDS: usize = 6;

/// Tags searched by [`ManifestTree::fuzzy_find`], in order.
pub const FUZZY_TAGS: [&str; 3] = ["manifest", "application", "activity"];

/// Index of an [`Element`] inside its [`ManifestTree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

/// Value of a manifest attribute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttributeValue {
    /// The attribute carried a raw string from the pool.
    String(String),
    /// A literal typed value (integer, boolean, resource reference, ...).
    Typed { data_type: u8, data: u32 },
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(value) => Some(value),
            AttributeValue::Typed { .. } => None,
        }
    }

    /// The resource id this value points at, if it is a typed reference.
    pub fn as_reference(&self) -> Option<ResourceId> {
        match self {
            AttributeValue::Typed {
                data_type: TYPE_REFERENCE,
                data,
            } => Some(ResourceId(*data)),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::String(value) => f.write_str(value),
            AttributeValue::Typed { data_type, data } => {
                f.write_str(&format_typed_value(*data_type, *data))
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attribute {
    pub namespace: Option<String>,
    pub name: String,
    pub value: AttributeValue,
}

/// A decoded element. Children and parent are ids into the owning tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Element {
    pub id: NodeId,
    pub name: String,
    pub namespace: Option<String>,
    pub line: u32,
    pub attributes: Vec<Attribute>,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
}

impl Element {
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes
            .iter()
            .find(|attr| attr.name == name)
            .map(|attr| &attr.value)
    }

    pub fn attribute_ending_with(&self, suffix: &str) -> Option<&AttributeValue> {
        self.attributes
            .iter()
            .find(|attr| attr.name.ends_with(suffix))
            .map(|attr| &attr.value)
    }
}

/// The element tree decoded from a binary manifest.
///
/// Elements are stored in document order, so iterating [`ManifestTree::elements`] visits
/// them the way they appear in the source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ManifestTree {
    nodes: Vec<Element>,
    roots: Vec<NodeId>,
}

impl ManifestTree {
    /// Decodes a binary manifest.
    pub fn from_bytes(buf: &[u8]) -> FormatResult<Self> {
        if buf.is_empty() {
            return Err(FormatError::EmptyInput);
        }
        let tag_tree_hint = read_u32(buf, TAG_TREE_HINT_WORD * 4)? as usize;
        let string_count = read_u32(buf, STRING_COUNT_WORD * 4)?;
        let flags = read_u32(buf, STRING_FLAGS_WORD * 4)?;

        let header = StringPoolHeader {
            string_count,
            flags: StringPoolFlags::from_bits_retain(flags),
            strings_start: 0,
        };
        let strings_base =
            STRING_INDEX_OFFSET.saturating_add((string_count as usize).saturating_mul(4));
        let strings = StringPool::decode(buf, &header, STRING_INDEX_OFFSET, strings_base)?;

        let start = find_start_tag(buf, tag_tree_hint)?;
        debug!(
            "AXML: {} strings, tag tree hint {:#x}, first start tag at {:#x}",
            strings.len(),
            tag_tree_hint,
            start
        );

        let mut decoder = TreeBuilder {
            buf,
            strings: &strings,
            tree: ManifestTree::default(),
            stack: Vec::new(),
        };
        decoder.walk(start)?;
        Ok(decoder.tree)
    }

    pub fn root(&self) -> Option<&Element> {
        self.roots.first().map(|id| self.get(*id))
    }

    pub fn get(&self, id: NodeId) -> &Element {
        &self.nodes[id.0]
    }

    pub fn parent(&self, element: &Element) -> Option<&Element> {
        element.parent.map(|id| self.get(id))
    }

    pub fn children<'a>(&'a self, element: &'a Element) -> impl Iterator<Item = &'a Element> {
        element.children.iter().map(move |id| self.get(*id))
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.nodes.iter()
    }

    pub fn elements_by_tag<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Element> {
        self.nodes.iter().filter(move |element| element.name == tag)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// First `attr` value carried by an element named `tag`.
    pub fn find_attribute(&self, tag: &str, attr: &str) -> Option<&AttributeValue> {
        self.nodes
            .iter()
            .filter(|element| element.name == tag)
            .find_map(|element| element.attribute(attr))
    }

    /// First attribute whose name ends with `suffix` on a `manifest`, `application` or
    /// `activity` element.
    pub fn fuzzy_find(&self, suffix: &str) -> Option<&AttributeValue> {
        FUZZY_TAGS.iter().find_map(|tag| {
            self.nodes
                .iter()
                .filter(|element| element.name == *tag)
                .find_map(|element| element.attribute_ending_with(suffix))
        })
    }

    /// Renders the tree as indented XML text.
    pub fn to_xml_string(&self) -> Result<String, RenderError> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
            .map_err(|err| RenderError(err.to_string()))?;
        for (idx, root) in self.roots.iter().enumerate() {
            self.write_element(&mut writer, self.get(*root), idx == 0)?;
        }
        String::from_utf8(writer.into_inner()).map_err(|err| RenderError(err.to_string()))
    }

    fn write_element(
        &self,
        writer: &mut Writer<Vec<u8>>,
        element: &Element,
        declare_namespace: bool,
    ) -> Result<(), RenderError> {
        let mut start = BytesStart::new(element.name.as_str());
        if declare_namespace && self.uses_android_namespace() {
            start.push_attribute(("xmlns:android", ANDROID_NAMESPACE_URI));
        }
        for attr in &element.attributes {
            let name = match attr.namespace.as_deref() {
                Some(ANDROID_NAMESPACE_URI) => format!("android:{}", attr.name),
                _ => attr.name.clone(),
            };
            let value = attr.value.to_string();
            start.push_attribute((name.as_str(), value.as_str()));
        }
        if element.children.is_empty() {
            writer
                .write_event(Event::Empty(start))
                .map_err(|err| RenderError(err.to_string()))?;
            return Ok(());
        }
        writer
            .write_event(Event::Start(start))
            .map_err(|err| RenderError(err.to_string()))?;
        for child in self.children(element) {
            self.write_element(writer, child, false)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(element.name.as_str())))
            .map_err(|err| RenderError(err.to_string()))?;
        Ok(())
    }

    fn uses_android_namespace(&self) -> bool {
        self.nodes.iter().any(|element| {
            element
                .attributes
                .iter()
                .any(|attr| attr.namespace.as_deref() == Some(ANDROID_NAMESPACE_URI))
        })
    }
}

/// Scans forward from `hint` in four-byte steps for the first start-tag marker.
fn find_start_tag(buf: &[u8], hint: usize) -> FormatResult<usize> {
    let mut offset = hint;
    while offset.saturating_add(4) <= buf.len() {
        if read_u32(buf, offset)? == START_TAG {
            return Ok(offset);
        }
        offset += 4;
    }
    Err(FormatError::MissingStartTag { offset: hint })
}

/// Skips a text run and returns the offset just past its terminating word.
///
/// The run ends at the first word equal to the sentinel; the sentinel starts as `NO_ENTRY`
/// and drops to zero the first time `NO_ENTRY` is seen.
fn skip_text(buf: &[u8], offset: usize) -> FormatResult<usize> {
    let mut sentinel = NO_ENTRY;
    let mut cursor = offset + 4;
    while cursor + 4 <= buf.len() {
        let word = read_u32(buf, cursor)?;
        cursor += 4;
        if word == sentinel {
            if sentinel == NO_ENTRY {
                sentinel = 0;
            } else {
                return Ok(cursor);
            }
        }
    }
    Err(FormatError::UnterminatedText { offset })
}

struct TreeBuilder<'a> {
    buf: &'a [u8],
    strings: &'a StringPool,
    tree: ManifestTree,
    stack: Vec<NodeId>,
}

impl TreeBuilder<'_> {
    fn walk(&mut self, start: usize) -> FormatResult<()> {
        let mut depth = 1u32;
        let mut offset = start;
        while offset + 4 <= self.buf.len() {
            match read_u32(self.buf, offset)? {
                START_TAG => offset = self.start_element(offset)?,
                END_TAG => {
                    if self.stack.pop().is_none() {
                        debug!("AXML: end tag without open element at {offset:#x}");
                    }
                    offset += SHORT_CHUNK_WORDS * 4;
                }
                START_DOC_TAG => {
                    depth += 1;
                    offset += SHORT_CHUNK_WORDS * 4;
                }
                END_DOC_TAG => {
                    depth -= 1;
                    offset += SHORT_CHUNK_WORDS * 4;
                    if depth == 0 {
                        break;
                    }
                }
                TEXT_TAG => offset = skip_text(self.buf, offset)?,
                other => {
                    debug!("AXML: stopping at unknown tag {other:#010x} at {offset:#x}");
                    break;
                }
            }
        }
        Ok(())
    }

    fn start_element(&mut self, offset: usize) -> FormatResult<usize> {
        let buf = self.buf;
        let line = read_u32(buf, offset + 2 * 4)?;
        let namespace_ref = read_u32(buf, offset + 4 * 4)?;
        let name_ref = read_u32(buf, offset + 5 * 4)?;
        let attribute_count = read_u16(buf, offset + 7 * 4)? as usize;

        let name = self.strings.lookup(name_ref)?.unwrap_or_default().to_string();
        let namespace = self.strings.lookup(namespace_ref)?.map(str::to_string);

        let mut cursor = offset + START_TAG_WORDS * 4;
        let mut attributes = Vec::with_capacity(attribute_count.min(64));
        for _ in 0..attribute_count {
            let attr_namespace = read_u32(buf, cursor)?;
            let attr_name = read_u32(buf, cursor + 4)?;
            let raw_value = read_u32(buf, cursor + 8)?;
            let flags = read_u32(buf, cursor + 12)?;
            let data = read_u32(buf, cursor + 16)?;
            cursor += ATTRIBUTE_WORDS * 4;

            let data_type = (flags >> 24) as u8;
            let value = match self.strings.lookup(raw_value)? {
                Some(text) => AttributeValue::String(text.to_string()),
                None if data_type == TYPE_STRING => match self.strings.lookup(data)? {
                    Some(text) => AttributeValue::String(text.to_string()),
                    None => AttributeValue::Typed { data_type, data },
                },
                None => AttributeValue::Typed { data_type, data },
            };
            attributes.push(Attribute {
                namespace: self.strings.lookup(attr_namespace)?.map(str::to_string),
                name: self.strings.lookup(attr_name)?.unwrap_or_default().to_string(),
                value,
            });
        }

        let id = NodeId(self.tree.nodes.len());
        let parent = self.stack.last().copied();
        match parent {
            Some(parent) => self.tree.nodes[parent.0].children.push(id),
            None => self.tree.roots.push(id),
        }
        self.tree.nodes.push(Element {
            id,
            name,
            namespace,
            line,
            attributes,
            children: Vec::new(),
            parent,
        });
        self.stack.push(id);
        Ok(cursor)
    }
}
