//! Dex file parsing
//!
//! This module validates the dex header, reads the map list into a
//! [`TableOfContents`], and exposes random-access readers for the id tables
//! and the data items the merge follows pointers into.

use crate::io::Reader;
use crate::{Error, Result};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Size of `header_item`
pub const HEADER_SIZE: u32 = 0x70;

/// Little-endian byte order tag
pub const ENDIAN_CONSTANT: u32 = 0x1234_5678;

/// Sentinel for an absent index (distinct from the `0` used for absent offsets)
pub const NO_INDEX: u32 = 0xFFFF_FFFF;

pub const STRING_ID_SIZE: u32 = 4;
pub const TYPE_ID_SIZE: u32 = 4;
pub const PROTO_ID_SIZE: u32 = 12;
pub const FIELD_ID_SIZE: u32 = 8;
pub const METHOD_ID_SIZE: u32 = 8;
pub const CLASS_DEF_SIZE: u32 = 32;
pub const MAP_ITEM_SIZE: u32 = 12;

/// Map list item types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ItemType {
    Header,
    StringId,
    TypeId,
    ProtoId,
    FieldId,
    MethodId,
    ClassDef,
    CallSiteId,
    MethodHandle,
    MapList,
    TypeList,
    AnnotationSetRefList,
    AnnotationSet,
    ClassData,
    Code,
    StringData,
    DebugInfo,
    Annotation,
    EncodedArray,
    AnnotationsDirectory,
    HiddenapiClassData,
}

impl ItemType {
    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            0x0000 => ItemType::Header,
            0x0001 => ItemType::StringId,
            0x0002 => ItemType::TypeId,
            0x0003 => ItemType::ProtoId,
            0x0004 => ItemType::FieldId,
            0x0005 => ItemType::MethodId,
            0x0006 => ItemType::ClassDef,
            0x0007 => ItemType::CallSiteId,
            0x0008 => ItemType::MethodHandle,
            0x1000 => ItemType::MapList,
            0x1001 => ItemType::TypeList,
            0x1002 => ItemType::AnnotationSetRefList,
            0x1003 => ItemType::AnnotationSet,
            0x2000 => ItemType::ClassData,
            0x2001 => ItemType::Code,
            0x2002 => ItemType::StringData,
            0x2003 => ItemType::DebugInfo,
            0x2004 => ItemType::Annotation,
            0x2005 => ItemType::EncodedArray,
            0x2006 => ItemType::AnnotationsDirectory,
            0xF000 => ItemType::HiddenapiClassData,
            _ => return None,
        })
    }

    pub fn code(self) -> u16 {
        match self {
            ItemType::Header => 0x0000,
            ItemType::StringId => 0x0001,
            ItemType::TypeId => 0x0002,
            ItemType::ProtoId => 0x0003,
            ItemType::FieldId => 0x0004,
            ItemType::MethodId => 0x0005,
            ItemType::ClassDef => 0x0006,
            ItemType::CallSiteId => 0x0007,
            ItemType::MethodHandle => 0x0008,
            ItemType::MapList => 0x1000,
            ItemType::TypeList => 0x1001,
            ItemType::AnnotationSetRefList => 0x1002,
            ItemType::AnnotationSet => 0x1003,
            ItemType::ClassData => 0x2000,
            ItemType::Code => 0x2001,
            ItemType::StringData => 0x2002,
            ItemType::DebugInfo => 0x2003,
            ItemType::Annotation => 0x2004,
            ItemType::EncodedArray => 0x2005,
            ItemType::AnnotationsDirectory => 0x2006,
            ItemType::HiddenapiClassData => 0xF000,
        }
    }
}

/// Location and extent of one logical section
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Section {
    /// Number of items
    pub count: u32,
    /// File offset of the first item (0 when empty)
    pub offset: u32,
    /// Bytes spanned by the section, including inter-item padding
    pub byte_count: u32,
}

/// Per-section summary of a dex file, built from its map list
#[derive(Debug, Clone, Default)]
pub struct TableOfContents {
    sections: BTreeMap<ItemType, Section>,
}

impl TableOfContents {
    /// Section of the given type, or an empty section when absent
    pub fn section(&self, ty: ItemType) -> Section {
        self.sections.get(&ty).copied().unwrap_or_default()
    }

    /// Iterate all present sections
    pub fn iter(&self) -> impl Iterator<Item = (ItemType, Section)> + '_ {
        self.sections.iter().map(|(ty, s)| (*ty, *s))
    }

    /// Derive byte counts from the distance to the next section by offset;
    /// the last section runs to the end of the file.
    fn compute_sizes_from_offsets(&mut self, file_size: u32) {
        let mut by_offset: Vec<(u32, ItemType)> = self
            .sections
            .iter()
            .filter(|(_, s)| s.count > 0)
            .map(|(ty, s)| (s.offset, *ty))
            .collect();
        by_offset.sort();
        for (i, &(offset, ty)) in by_offset.iter().enumerate() {
            let end = by_offset.get(i + 1).map_or(file_size, |next| next.0);
            if let Some(section) = self.sections.get_mut(&ty) {
                section.byte_count = end.saturating_sub(offset);
            }
        }
    }
}

/// Parsed `header_item`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Three-digit format version from the magic (35, 37, ...)
    pub version: u32,
    pub checksum: u32,
    pub signature: [u8; 20],
    pub file_size: u32,
    pub header_size: u32,
    pub link_size: u32,
    pub link_off: u32,
    pub map_off: u32,
    pub string_ids: (u32, u32),
    pub type_ids: (u32, u32),
    pub proto_ids: (u32, u32),
    pub field_ids: (u32, u32),
    pub method_ids: (u32, u32),
    pub class_defs: (u32, u32),
    pub data_size: u32,
    pub data_off: u32,
}

impl Header {
    fn parse(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let magic = reader.read_bytes(8)?;
        if &magic[0..4] != b"dex\n" || magic[7] != 0 {
            return Err(Error::InvalidDex("bad magic".to_string()));
        }
        let version = std::str::from_utf8(&magic[4..7])
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .ok_or_else(|| Error::InvalidDex("bad version in magic".to_string()))?;
        let checksum = reader.read_u32()?;
        let mut signature = [0u8; 20];
        signature.copy_from_slice(reader.read_bytes(20)?);
        let file_size = reader.read_u32()?;
        let header_size = reader.read_u32()?;
        let endian_tag = reader.read_u32()?;
        if endian_tag != ENDIAN_CONSTANT {
            return Err(Error::InvalidDex(format!(
                "unsupported endian tag {endian_tag:#010x}"
            )));
        }
        fn pair(reader: &mut Reader<'_>) -> Result<(u32, u32)> {
            Ok((reader.read_u32()?, reader.read_u32()?))
        }
        let (link_size, link_off) = pair(&mut reader)?;
        let map_off = reader.read_u32()?;
        let string_ids = pair(&mut reader)?;
        let type_ids = pair(&mut reader)?;
        let proto_ids = pair(&mut reader)?;
        let field_ids = pair(&mut reader)?;
        let method_ids = pair(&mut reader)?;
        let class_defs = pair(&mut reader)?;
        let (data_size, data_off) = pair(&mut reader)?;

        Ok(Header {
            version,
            checksum,
            signature,
            file_size,
            header_size,
            link_size,
            link_off,
            map_off,
            string_ids,
            type_ids,
            proto_ids,
            field_ids,
            method_ids,
            class_defs,
            data_size,
            data_off,
        })
    }
}

/// Raw `proto_id_item`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtoId {
    pub shorty_idx: u32,
    pub return_type_idx: u32,
    /// Offset of the parameter type list, 0 for no parameters
    pub parameters_off: u32,
}

/// `field_id_item`, ordered by class, then name, then type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldId {
    pub class_idx: u32,
    pub type_idx: u32,
    pub name_idx: u32,
}

impl Ord for FieldId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.class_idx
            .cmp(&other.class_idx)
            .then(self.name_idx.cmp(&other.name_idx))
            .then(self.type_idx.cmp(&other.type_idx))
    }
}

impl PartialOrd for FieldId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// `method_id_item`, ordered by class, then name, then prototype
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodId {
    pub class_idx: u32,
    pub proto_idx: u32,
    pub name_idx: u32,
}

impl Ord for MethodId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.class_idx
            .cmp(&other.class_idx)
            .then(self.name_idx.cmp(&other.name_idx))
            .then(self.proto_idx.cmp(&other.proto_idx))
    }
}

impl PartialOrd for MethodId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// `class_def_item`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassDef {
    /// File offset this definition was read from
    pub offset: u32,
    pub class_idx: u32,
    pub access_flags: u32,
    pub superclass_idx: u32,
    pub interfaces_off: u32,
    pub source_file_idx: u32,
    pub annotations_off: u32,
    pub class_data_off: u32,
    pub static_values_off: u32,
}

/// Field entry of a `class_data_item`, with its index already undeltaed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedField {
    pub field_idx: u32,
    pub access_flags: u32,
}

/// Method entry of a `class_data_item`, with its index already undeltaed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedMethod {
    pub method_idx: u32,
    pub access_flags: u32,
    pub code_off: u32,
}

/// Decoded `class_data_item`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassData {
    pub static_fields: Vec<EncodedField>,
    pub instance_fields: Vec<EncodedField>,
    pub direct_methods: Vec<EncodedMethod>,
    pub virtual_methods: Vec<EncodedMethod>,
}

/// `try_item`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TryItem {
    pub start_addr: u32,
    pub insn_count: u16,
    /// Byte offset of the handler from the start of the handler list
    pub handler_off: u16,
}

/// `encoded_catch_handler`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatchHandler {
    /// (exception type index, handler address) pairs
    pub pairs: Vec<(u32, u32)>,
    pub catch_all_addr: Option<u32>,
}

/// `encoded_catch_handler_list`, each handler keyed by its byte offset
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatchHandlerList {
    pub handlers: Vec<(u16, CatchHandler)>,
}

/// `code_item`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeItem {
    pub registers_size: u16,
    pub ins_size: u16,
    pub outs_size: u16,
    pub debug_info_off: u32,
    pub insns: Vec<u16>,
    pub tries: Vec<TryItem>,
    pub handlers: Option<CatchHandlerList>,
}

/// Raw string data: UTF-16 length plus the Modified UTF-8 bytes without
/// the trailing NUL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringData<'a> {
    pub utf16_size: u32,
    pub data: &'a [u8],
}

impl StringData<'_> {
    /// Decode into UTF-16 code units
    pub fn to_utf16(&self) -> Result<Vec<u16>> {
        mutf8_to_utf16(self.data)
    }
}

/// Decode Modified UTF-8 into UTF-16 code units
pub fn mutf8_to_utf16(bytes: &[u8]) -> Result<Vec<u16>> {
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    let continuation = |i: usize| -> Result<u16> {
        match bytes.get(i) {
            Some(&b) if b & 0xc0 == 0x80 => Ok(u16::from(b & 0x3f)),
            _ => Err(Error::InvalidDex(format!(
                "bad MUTF-8 continuation byte at {i}"
            ))),
        }
    };
    while i < bytes.len() {
        let b = bytes[i];
        if b & 0x80 == 0 {
            units.push(u16::from(b));
            i += 1;
        } else if b & 0xe0 == 0xc0 {
            units.push((u16::from(b & 0x1f) << 6) | continuation(i + 1)?);
            i += 2;
        } else if b & 0xf0 == 0xe0 {
            units.push(
                (u16::from(b & 0x0f) << 12) | (continuation(i + 1)? << 6) | continuation(i + 2)?,
            );
            i += 3;
        } else {
            return Err(Error::InvalidDex(format!("bad MUTF-8 lead byte {b:#04x}")));
        }
    }
    Ok(units)
}

/// A parsed dex file
#[derive(Debug, Clone)]
pub struct DexFile {
    bytes: Vec<u8>,
    header: Header,
    contents: TableOfContents,
}

impl DexFile {
    /// Parse and validate a dex file
    pub fn parse(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() < HEADER_SIZE as usize {
            return Err(Error::InvalidDex(format!(
                "file is {} bytes, smaller than a header",
                bytes.len()
            )));
        }
        let header = Header::parse(&bytes)?;
        if header.file_size as usize != bytes.len() {
            return Err(Error::InvalidDex(format!(
                "header file_size {} does not match actual size {}",
                header.file_size,
                bytes.len()
            )));
        }

        let mut contents = TableOfContents::default();
        let mut reader = Reader::at(&bytes, header.map_off as usize);
        let count = reader.read_u32()?;
        for _ in 0..count {
            let code = reader.read_u16()?;
            let _unused = reader.read_u16()?;
            let size = reader.read_u32()?;
            let offset = reader.read_u32()?;
            let Some(ty) = ItemType::from_code(code) else {
                return Err(Error::InvalidDex(format!("unknown map item type {code:#06x}")));
            };
            contents.sections.insert(
                ty,
                Section {
                    count: size,
                    offset,
                    byte_count: 0,
                },
            );
        }
        contents.compute_sizes_from_offsets(header.file_size);

        Ok(Self {
            bytes,
            header,
            contents,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn table_of_contents(&self) -> &TableOfContents {
        &self.contents
    }

    /// Reader positioned at an absolute file offset
    pub fn reader_at(&self, offset: u32) -> Reader<'_> {
        Reader::at(&self.bytes, offset as usize)
    }

    /// Reader positioned at the `index`th fixed-size item of an id table
    fn table_reader(&self, ty: ItemType, index: u32, item_size: u32) -> Result<Reader<'_>> {
        let section = self.contents.section(ty);
        if index >= section.count {
            return Err(Error::InvalidDex(format!(
                "{ty:?} index {index} out of range (count {})",
                section.count
            )));
        }
        Ok(self.reader_at(section.offset + index * item_size))
    }

    /// Raw string data for a string id
    pub fn string_data(&self, index: u32) -> Result<StringData<'_>> {
        let data_off = self
            .table_reader(ItemType::StringId, index, STRING_ID_SIZE)?
            .read_u32()?;
        let mut reader = self.reader_at(data_off);
        let utf16_size = reader.read_uleb128()?;
        let start = reader.position();
        let len = self.bytes[start.min(self.bytes.len())..]
            .iter()
            .position(|&b| b == 0)
            .ok_or(Error::UnexpectedEof {
                offset: start,
                needed: 1,
            })?;
        Ok(StringData {
            utf16_size,
            data: &self.bytes[start..start + len],
        })
    }

    /// Decoded string for a string id
    pub fn string(&self, index: u32) -> Result<String> {
        let units = self.string_data(index)?.to_utf16()?;
        Ok(String::from_utf16_lossy(&units))
    }

    /// String index of a type's descriptor
    pub fn type_descriptor_index(&self, index: u32) -> Result<u32> {
        self.table_reader(ItemType::TypeId, index, TYPE_ID_SIZE)?
            .read_u32()
    }

    /// Descriptor string of a type, e.g. `Ljava/lang/Object;`
    pub fn type_descriptor(&self, index: u32) -> Result<String> {
        self.string(self.type_descriptor_index(index)?)
    }

    pub fn proto_id(&self, index: u32) -> Result<ProtoId> {
        let mut reader = self.table_reader(ItemType::ProtoId, index, PROTO_ID_SIZE)?;
        Ok(ProtoId {
            shorty_idx: reader.read_u32()?,
            return_type_idx: reader.read_u32()?,
            parameters_off: reader.read_u32()?,
        })
    }

    pub fn field_id(&self, index: u32) -> Result<FieldId> {
        let mut reader = self.table_reader(ItemType::FieldId, index, FIELD_ID_SIZE)?;
        Ok(FieldId {
            class_idx: u32::from(reader.read_u16()?),
            type_idx: u32::from(reader.read_u16()?),
            name_idx: reader.read_u32()?,
        })
    }

    pub fn method_id(&self, index: u32) -> Result<MethodId> {
        let mut reader = self.table_reader(ItemType::MethodId, index, METHOD_ID_SIZE)?;
        Ok(MethodId {
            class_idx: u32::from(reader.read_u16()?),
            proto_idx: u32::from(reader.read_u16()?),
            name_idx: reader.read_u32()?,
        })
    }

    /// Type indices of the type list at `offset`; offset 0 is the empty list
    pub fn type_list(&self, offset: u32) -> Result<Vec<u32>> {
        if offset == 0 {
            return Ok(Vec::new());
        }
        let mut reader = self.reader_at(offset);
        let size = reader.read_u32()?;
        (0..size)
            .map(|_| reader.read_u16().map(u32::from))
            .collect()
    }

    pub fn class_def(&self, index: u32) -> Result<ClassDef> {
        let reader = self.table_reader(ItemType::ClassDef, index, CLASS_DEF_SIZE)?;
        self.class_def_at(reader.position() as u32)
    }

    /// Class definition stored at an absolute offset
    pub fn class_def_at(&self, offset: u32) -> Result<ClassDef> {
        let mut reader = self.reader_at(offset);
        Ok(ClassDef {
            offset,
            class_idx: reader.read_u32()?,
            access_flags: reader.read_u32()?,
            superclass_idx: reader.read_u32()?,
            interfaces_off: reader.read_u32()?,
            source_file_idx: reader.read_u32()?,
            annotations_off: reader.read_u32()?,
            class_data_off: reader.read_u32()?,
            static_values_off: reader.read_u32()?,
        })
    }

    /// All class definitions in file order
    pub fn class_defs(&self) -> Result<Vec<ClassDef>> {
        let count = self.contents.section(ItemType::ClassDef).count;
        (0..count).map(|i| self.class_def(i)).collect()
    }

    pub fn class_data(&self, offset: u32) -> Result<ClassData> {
        let mut reader = self.reader_at(offset);
        let static_fields = reader.read_uleb128()?;
        let instance_fields = reader.read_uleb128()?;
        let direct_methods = reader.read_uleb128()?;
        let virtual_methods = reader.read_uleb128()?;
        Ok(ClassData {
            static_fields: read_encoded_fields(&mut reader, static_fields)?,
            instance_fields: read_encoded_fields(&mut reader, instance_fields)?,
            direct_methods: read_encoded_methods(&mut reader, direct_methods)?,
            virtual_methods: read_encoded_methods(&mut reader, virtual_methods)?,
        })
    }

    pub fn code_item(&self, offset: u32) -> Result<CodeItem> {
        let mut reader = self.reader_at(offset);
        let registers_size = reader.read_u16()?;
        let ins_size = reader.read_u16()?;
        let outs_size = reader.read_u16()?;
        let tries_size = reader.read_u16()?;
        let debug_info_off = reader.read_u32()?;
        let insns_size = reader.read_u32()?;
        let insns = (0..insns_size)
            .map(|_| reader.read_u16())
            .collect::<Result<Vec<_>>>()?;

        let mut tries = Vec::with_capacity(tries_size as usize);
        let mut handlers = None;
        if tries_size > 0 {
            if insns_size % 2 == 1 {
                let _padding = reader.read_u16()?;
            }
            for _ in 0..tries_size {
                tries.push(TryItem {
                    start_addr: reader.read_u32()?,
                    insn_count: reader.read_u16()?,
                    handler_off: reader.read_u16()?,
                });
            }
            handlers = Some(read_catch_handler_list(&mut reader)?);
        }

        Ok(CodeItem {
            registers_size,
            ins_size,
            outs_size,
            debug_info_off,
            insns,
            tries,
            handlers,
        })
    }
}

fn read_encoded_fields(reader: &mut Reader<'_>, count: u32) -> Result<Vec<EncodedField>> {
    let mut fields = Vec::with_capacity(count as usize);
    let mut field_idx = 0u32;
    for _ in 0..count {
        field_idx = field_idx.wrapping_add(reader.read_uleb128()?);
        fields.push(EncodedField {
            field_idx,
            access_flags: reader.read_uleb128()?,
        });
    }
    Ok(fields)
}

fn read_encoded_methods(reader: &mut Reader<'_>, count: u32) -> Result<Vec<EncodedMethod>> {
    let mut methods = Vec::with_capacity(count as usize);
    let mut method_idx = 0u32;
    for _ in 0..count {
        method_idx = method_idx.wrapping_add(reader.read_uleb128()?);
        methods.push(EncodedMethod {
            method_idx,
            access_flags: reader.read_uleb128()?,
            code_off: reader.read_uleb128()?,
        });
    }
    Ok(methods)
}

fn read_catch_handler_list(reader: &mut Reader<'_>) -> Result<CatchHandlerList> {
    let base = reader.position();
    let size = reader.read_uleb128()?;
    let mut handlers = Vec::with_capacity(size as usize);
    for _ in 0..size {
        let offset = u16::try_from(reader.position() - base)
            .map_err(|_| Error::InvalidDex("catch handler list exceeds 64 KiB".to_string()))?;
        let count = reader.read_sleb128()?;
        let mut handler = CatchHandler::default();
        for _ in 0..count.unsigned_abs() {
            handler.pairs.push((reader.read_uleb128()?, reader.read_uleb128()?));
        }
        if count <= 0 {
            handler.catch_all_addr = Some(reader.read_uleb128()?);
        }
        handlers.push((offset, handler));
    }
    Ok(CatchHandlerList { handlers })
}
