//! Output layout planning and section writers
//!
//! Before any merge pass runs, [`OutputLayout::plan`] reserves one region per
//! logical section, sized to an upper bound derived from both inputs. Regions
//! never move or grow; a region that fills up is a bug in the bound and
//! surfaces as [`Error::SectionOverflow`].
//!
//! The bounds are deliberately generous. Re-encoded ULEB128 indices can grow
//! once both index spaces are combined, so sections holding them are inflated
//! by [`GrowthFactors`].

use crate::io::{align4, write_sleb128, write_uleb128};
use crate::parser::{
    ItemType, Section, TableOfContents, CLASS_DEF_SIZE, ENDIAN_CONSTANT, FIELD_ID_SIZE,
    HEADER_SIZE, MAP_ITEM_SIZE, METHOD_ID_SIZE, PROTO_ID_SIZE, STRING_ID_SIZE, TYPE_ID_SIZE,
};
use crate::{Error, Result};
use std::collections::BTreeMap;

/// Multipliers applied to sections whose re-encoded content can grow
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrowthFactors {
    pub class_data: f64,
    pub code: f64,
    pub encoded_array: f64,
    pub annotation: f64,
}

impl Default for GrowthFactors {
    fn default() -> Self {
        Self {
            class_data: 1.67,
            code: 1.25,
            encoded_array: 2.0,
            annotation: 2.0,
        }
    }
}

/// A fixed-capacity output region with a monotonic write cursor
#[derive(Debug, Clone)]
pub struct OutputSection {
    name: &'static str,
    start: u32,
    capacity: usize,
    bytes: Vec<u8>,
}

impl OutputSection {
    fn new(name: &'static str, start: u32, capacity: usize) -> Self {
        Self {
            name,
            start,
            capacity,
            bytes: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Absolute file offset of the region
    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Absolute file offset of the next byte to be written
    pub fn position(&self) -> u32 {
        self.start + self.bytes.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Bytes written so far
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        if self.bytes.len() + data.len() > self.capacity {
            return Err(Error::SectionOverflow {
                section: self.name,
                capacity: self.capacity,
            });
        }
        self.bytes.extend_from_slice(data);
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_bytes(&[value])
    }

    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_uleb128(&mut self, value: u32) -> Result<()> {
        let mut buf = Vec::with_capacity(5);
        write_uleb128(&mut buf, value);
        self.write_bytes(&buf)
    }

    pub fn write_sleb128(&mut self, value: i32) -> Result<()> {
        let mut buf = Vec::with_capacity(5);
        write_sleb128(&mut buf, value);
        self.write_bytes(&buf)
    }

    /// Pad with zeros up to the next four-byte boundary
    pub fn align_to_four_bytes(&mut self) -> Result<()> {
        let pos = self.position() as usize;
        let padding = align4(pos) - pos;
        self.write_bytes(&[0u8; 3][..padding])
    }
}

/// All output regions, in file order
#[derive(Debug, Clone)]
pub struct OutputLayout {
    pub header: OutputSection,
    /// String, type, proto, field and method ids followed by class defs
    pub ids_defs: OutputSection,
    pub map_list: OutputSection,
    pub type_list: OutputSection,
    pub annotation_set_ref_list: OutputSection,
    pub annotation_set: OutputSection,
    pub class_data: OutputSection,
    pub code: OutputSection,
    pub string_data: OutputSection,
    pub debug_info: OutputSection,
    pub annotation: OutputSection,
    pub encoded_array: OutputSection,
    pub annotations_directory: OutputSection,
}

/// Map item kinds the merger can emit
const MAX_MAP_ITEMS: u32 = 18;

/// An `annotations_directory_item` with no entries
pub const EMPTY_ANNOTATIONS_DIRECTORY_SIZE: usize = 16;

impl OutputLayout {
    /// Reserve every region from the two inputs' table of contents
    pub fn plan(a: &TableOfContents, b: &TableOfContents, growth: &GrowthFactors) -> Self {
        let count = |ty: ItemType| (a.section(ty).count + b.section(ty).count) as usize;
        let bytes = |ty: ItemType| {
            align4(a.section(ty).byte_count as usize) + align4(b.section(ty).byte_count as usize)
        };
        let grown = |ty: ItemType, factor: f64| (bytes(ty) as f64 * factor).ceil() as usize;

        let ids_defs = count(ItemType::StringId) * STRING_ID_SIZE as usize
            + count(ItemType::TypeId) * TYPE_ID_SIZE as usize
            + count(ItemType::ProtoId) * PROTO_ID_SIZE as usize
            + count(ItemType::FieldId) * FIELD_ID_SIZE as usize
            + count(ItemType::MethodId) * METHOD_ID_SIZE as usize
            + count(ItemType::ClassDef) * CLASS_DEF_SIZE as usize;

        let sizes: [(&'static str, usize); 13] = [
            ("header", HEADER_SIZE as usize),
            ("ids defs", ids_defs),
            ("map list", (4 + MAX_MAP_ITEMS * MAP_ITEM_SIZE) as usize),
            ("type list", bytes(ItemType::TypeList)),
            (
                "annotation set ref list",
                bytes(ItemType::AnnotationSetRefList),
            ),
            ("annotation set", bytes(ItemType::AnnotationSet)),
            (
                "class data",
                grown(ItemType::ClassData, growth.class_data),
            ),
            ("code", grown(ItemType::Code, growth.code)),
            ("string data", bytes(ItemType::StringData)),
            ("debug info", bytes(ItemType::DebugInfo)),
            (
                "annotation",
                grown(ItemType::Annotation, growth.annotation),
            ),
            (
                "encoded array",
                grown(ItemType::EncodedArray, growth.encoded_array),
            ),
            (
                "annotations directory",
                bytes(ItemType::AnnotationsDirectory)
                    .max(count(ItemType::ClassDef) * EMPTY_ANNOTATIONS_DIRECTORY_SIZE),
            ),
        ];

        let mut next = 0u32;
        let [
            header,
            ids_defs,
            map_list,
            type_list,
            annotation_set_ref_list,
            annotation_set,
            class_data,
            code,
            string_data,
            debug_info,
            annotation,
            encoded_array,
            annotations_directory,
        ] = sizes.map(|(name, size)| {
            let section = OutputSection::new(name, next, size);
            next = align4(next as usize + size) as u32;
            section
        });

        Self {
            header,
            ids_defs,
            map_list,
            type_list,
            annotation_set_ref_list,
            annotation_set,
            class_data,
            code,
            string_data,
            debug_info,
            annotation,
            encoded_array,
            annotations_directory,
        }
    }

    /// Regions in file order
    pub fn regions(&self) -> [&OutputSection; 13] {
        [
            &self.header,
            &self.ids_defs,
            &self.map_list,
            &self.type_list,
            &self.annotation_set_ref_list,
            &self.annotation_set,
            &self.class_data,
            &self.code,
            &self.string_data,
            &self.debug_info,
            &self.annotation,
            &self.encoded_array,
            &self.annotations_directory,
        ]
    }

    /// Start of the data area; the map list is its first item
    pub fn data_off(&self) -> u32 {
        self.map_list.start()
    }

    /// Length of the final file: the end of the last byte written, rounded
    /// up to four. Unwritten reserved space before that point stays zero.
    pub fn file_size(&self) -> u32 {
        let end = self
            .regions()
            .iter()
            .filter(|r| !r.is_empty())
            .map(|r| r.position())
            .max()
            .unwrap_or(HEADER_SIZE);
        align4(end as usize) as u32
    }

    /// Copy every region to its reserved offset in one buffer
    pub fn assemble(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.file_size() as usize];
        for region in self.regions() {
            let start = region.start() as usize;
            out[start..start + region.bytes().len()].copy_from_slice(region.bytes());
        }
        out
    }
}

/// Running item counts and first offsets of each output section
#[derive(Debug, Clone, Default)]
pub struct OutputContents {
    sections: BTreeMap<ItemType, Section>,
}

impl OutputContents {
    /// Record one item of `ty` written at `offset`
    pub fn add(&mut self, ty: ItemType, offset: u32) {
        let section = self.sections.entry(ty).or_default();
        if section.count == 0 {
            section.offset = offset;
        }
        section.count += 1;
    }

    pub fn section(&self, ty: ItemType) -> Section {
        self.sections.get(&ty).copied().unwrap_or_default()
    }

    /// Map list entries for every non-empty section, ascending by offset
    pub fn map_entries(&self) -> Vec<(ItemType, Section)> {
        let mut entries: Vec<_> = self
            .sections
            .iter()
            .filter(|(_, s)| s.count > 0)
            .map(|(ty, s)| (*ty, *s))
            .collect();
        entries.sort_by_key(|(ty, s)| (s.offset, ty.code()));
        entries
    }

    /// Write the map list into its region, registering the header and the
    /// map list itself first
    pub fn write_map_list(&mut self, layout: &mut OutputLayout) -> Result<()> {
        self.add(ItemType::Header, 0);
        let section = &mut layout.map_list;
        section.align_to_four_bytes()?;
        self.add(ItemType::MapList, section.position());

        let entries = self.map_entries();
        section.write_u32(entries.len() as u32)?;
        for (ty, s) in entries {
            section.write_u16(ty.code())?;
            section.write_u16(0)?;
            section.write_u32(s.count)?;
            section.write_u32(s.offset)?;
        }
        Ok(())
    }

    /// Write `header_item` with zeroed checksum and signature; those are
    /// patched once the whole file exists
    pub fn write_header(&self, layout: &mut OutputLayout, version: u32) -> Result<()> {
        let file_size = layout.file_size();
        let data_off = layout.data_off();
        let map_off = self.section(ItemType::MapList).offset;
        let header = &mut layout.header;

        header.write_bytes(format!("dex\n{version:03}\0").as_bytes())?;
        header.write_u32(0)?;
        header.write_bytes(&[0u8; 20])?;
        header.write_u32(file_size)?;
        header.write_u32(HEADER_SIZE)?;
        header.write_u32(ENDIAN_CONSTANT)?;
        header.write_u32(0)?; // link_size
        header.write_u32(0)?; // link_off
        header.write_u32(map_off)?;
        for ty in [
            ItemType::StringId,
            ItemType::TypeId,
            ItemType::ProtoId,
            ItemType::FieldId,
            ItemType::MethodId,
            ItemType::ClassDef,
        ] {
            let s = self.section(ty);
            header.write_u32(s.count)?;
            header.write_u32(if s.count == 0 { 0 } else { s.offset })?;
        }
        header.write_u32(file_size - data_off)?;
        header.write_u32(data_off)?;
        Ok(())
    }
}
