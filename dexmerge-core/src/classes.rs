//! Per-class copying and reindexing
//!
//! [`ClassTransformer`] copies one class definition at a time from its input
//! into the output, following every offset the definition holds: the class
//! data, each method's code item, and the static field initializers. Every
//! index met along the way is translated through the input's [`IndexMap`].
//!
//! Debug info and annotations are not carried over. A class that had an
//! annotations directory gets an empty one in its place.

use crate::index_map::IndexMap;
use crate::io::{write_sleb128, write_uleb128};
use crate::layout::{OutputContents, OutputLayout, EMPTY_ANNOTATIONS_DIRECTORY_SIZE};
use crate::parser::{
    CatchHandlerList, ClassData, ClassDef, CodeItem, DexFile, EncodedField, EncodedMethod,
    ItemType,
};
use crate::rewriter::InstructionPatcher;
use crate::values::EncodedValueTranscoder;
use crate::{Error, Result};
use std::collections::HashMap;

/// Copies class definitions out of one input
pub struct ClassTransformer<'a> {
    dex: &'a DexFile,
    map: &'a IndexMap,
    patcher: InstructionPatcher<'a>,
    values: EncodedValueTranscoder<'a>,
    /// Old -> new offsets of static value arrays, which classes may share
    static_values: HashMap<u32, u32>,
}

impl<'a> ClassTransformer<'a> {
    pub fn new(dex: &'a DexFile, map: &'a IndexMap) -> Self {
        Self {
            dex,
            map,
            patcher: InstructionPatcher::new(map),
            values: EncodedValueTranscoder::new(map),
            static_values: HashMap::new(),
        }
    }

    /// Copy `class_def` and everything it points to, emitting it as merged
    /// type `type_idx`
    pub fn transform(
        &mut self,
        type_idx: u32,
        class_def: &ClassDef,
        layout: &mut OutputLayout,
        contents: &mut OutputContents,
    ) -> Result<()> {
        let annotations_off = if class_def.annotations_off == 0 {
            0
        } else {
            let section = &mut layout.annotations_directory;
            section.align_to_four_bytes()?;
            let offset = section.position();
            section.write_bytes(&[0u8; EMPTY_ANNOTATIONS_DIRECTORY_SIZE])?;
            contents.add(ItemType::AnnotationsDirectory, offset);
            offset
        };

        let class_data_off = if class_def.class_data_off == 0 {
            0
        } else {
            self.write_class_data(class_def.class_data_off, layout, contents)?
        };

        let static_values_off = if class_def.static_values_off == 0 {
            0
        } else {
            self.write_static_values(class_def.static_values_off, layout, contents)?
        };

        let out = &mut layout.ids_defs;
        contents.add(ItemType::ClassDef, out.position());
        out.write_u32(type_idx)?;
        out.write_u32(class_def.access_flags)?;
        out.write_u32(self.map.remap_type_or_none(class_def.superclass_idx)?)?;
        out.write_u32(self.map.remap_type_list_offset(class_def.interfaces_off)?)?;
        out.write_u32(self.map.remap_string_or_none(class_def.source_file_idx)?)?;
        out.write_u32(annotations_off)?;
        out.write_u32(class_data_off)?;
        out.write_u32(static_values_off)?;
        Ok(())
    }

    fn write_class_data(
        &mut self,
        offset: u32,
        layout: &mut OutputLayout,
        contents: &mut OutputContents,
    ) -> Result<u32> {
        let data = self.dex.class_data(offset)?;

        let method_count = data.direct_methods.len() + data.virtual_methods.len();
        let mut code_offsets = Vec::with_capacity(method_count);
        for method in data.direct_methods.iter().chain(&data.virtual_methods) {
            let new_off = if method.code_off == 0 {
                0
            } else {
                self.write_code_item(method.code_off, layout, contents)?
            };
            code_offsets.push(new_off);
        }

        let encoded = encode_class_data(&data, self.map, &code_offsets)?;
        let section = &mut layout.class_data;
        let new_off = section.position();
        section.write_bytes(&encoded)?;
        contents.add(ItemType::ClassData, new_off);
        Ok(new_off)
    }

    fn write_code_item(
        &mut self,
        offset: u32,
        layout: &mut OutputLayout,
        contents: &mut OutputContents,
    ) -> Result<u32> {
        let code = self.dex.code_item(offset)?;
        let insns = self.patcher.patch(&code.insns)?;
        let encoded = encode_code_item(&code, &insns, self.map)?;

        let section = &mut layout.code;
        section.align_to_four_bytes()?;
        let new_off = section.position();
        section.write_bytes(&encoded)?;
        contents.add(ItemType::Code, new_off);
        Ok(new_off)
    }

    fn write_static_values(
        &mut self,
        offset: u32,
        layout: &mut OutputLayout,
        contents: &mut OutputContents,
    ) -> Result<u32> {
        if let Some(&new_off) = self.static_values.get(&offset) {
            return Ok(new_off);
        }

        let mut reader = self.dex.reader_at(offset);
        let mut encoded = Vec::new();
        self.values.transcode_array(&mut reader, &mut encoded)?;

        let section = &mut layout.encoded_array;
        let new_off = section.position();
        section.write_bytes(&encoded)?;
        contents.add(ItemType::EncodedArray, new_off);
        self.static_values.insert(offset, new_off);
        Ok(new_off)
    }
}

/// Encode a `class_data_item` with translated indices. `code_offsets` holds
/// the new code offset of every direct method, then every virtual method.
pub fn encode_class_data(
    data: &ClassData,
    map: &IndexMap,
    code_offsets: &[u32],
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_uleb128(&mut out, data.static_fields.len() as u32);
    write_uleb128(&mut out, data.instance_fields.len() as u32);
    write_uleb128(&mut out, data.direct_methods.len() as u32);
    write_uleb128(&mut out, data.virtual_methods.len() as u32);

    encode_fields(&mut out, &data.static_fields, map)?;
    encode_fields(&mut out, &data.instance_fields, map)?;
    let split = data.direct_methods.len().min(code_offsets.len());
    let (direct_offsets, virtual_offsets) = code_offsets.split_at(split);
    encode_methods(&mut out, &data.direct_methods, direct_offsets, map)?;
    encode_methods(&mut out, &data.virtual_methods, virtual_offsets, map)?;
    Ok(out)
}

fn delta(kind: &str, previous: u32, next: u32) -> Result<u32> {
    next.checked_sub(previous).ok_or_else(|| {
        Error::InvalidDex(format!(
            "{kind} indices not ascending after remap ({previous} then {next})"
        ))
    })
}

fn encode_fields(out: &mut Vec<u8>, fields: &[EncodedField], map: &IndexMap) -> Result<()> {
    let mut previous = 0;
    for field in fields {
        let idx = map.remap_field(field.field_idx)?;
        write_uleb128(out, delta("field", previous, idx)?);
        write_uleb128(out, field.access_flags);
        previous = idx;
    }
    Ok(())
}

fn encode_methods(
    out: &mut Vec<u8>,
    methods: &[EncodedMethod],
    code_offsets: &[u32],
    map: &IndexMap,
) -> Result<()> {
    if methods.len() != code_offsets.len() {
        return Err(Error::InvalidDex(format!(
            "{} methods but {} code offsets",
            methods.len(),
            code_offsets.len()
        )));
    }
    let mut previous = 0;
    for (method, &code_off) in methods.iter().zip(code_offsets) {
        let idx = map.remap_method(method.method_idx)?;
        write_uleb128(out, delta("method", previous, idx)?);
        write_uleb128(out, method.access_flags);
        write_uleb128(out, code_off);
        previous = idx;
    }
    Ok(())
}

/// Encode a `code_item` around already patched instructions. Debug info is
/// dropped; try items point into the re-encoded handler list.
pub fn encode_code_item(code: &CodeItem, insns: &[u16], map: &IndexMap) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(16 + insns.len() * 2);
    out.extend_from_slice(&code.registers_size.to_le_bytes());
    out.extend_from_slice(&code.ins_size.to_le_bytes());
    out.extend_from_slice(&code.outs_size.to_le_bytes());
    out.extend_from_slice(&(code.tries.len() as u16).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // debug_info_off
    out.extend_from_slice(&(insns.len() as u32).to_le_bytes());
    for unit in insns {
        out.extend_from_slice(&unit.to_le_bytes());
    }

    if code.tries.is_empty() {
        return Ok(out);
    }

    if insns.len() % 2 == 1 {
        out.extend_from_slice(&0u16.to_le_bytes());
    }

    let empty = CatchHandlerList::default();
    let (handlers, handler_offsets) =
        encode_catch_handlers(code.handlers.as_ref().unwrap_or(&empty), map)?;
    for item in &code.tries {
        let handler_off = handler_offsets.get(&item.handler_off).copied().ok_or_else(|| {
            Error::InvalidDex(format!(
                "try item refers to missing handler at {:#x}",
                item.handler_off
            ))
        })?;
        out.extend_from_slice(&item.start_addr.to_le_bytes());
        out.extend_from_slice(&item.insn_count.to_le_bytes());
        out.extend_from_slice(&handler_off.to_le_bytes());
    }
    out.extend_from_slice(&handlers);
    Ok(out)
}

/// Encode an `encoded_catch_handler_list` with translated exception types.
/// Returns the bytes and the old -> new byte offset of every handler.
pub fn encode_catch_handlers(
    list: &CatchHandlerList,
    map: &IndexMap,
) -> Result<(Vec<u8>, HashMap<u16, u16>)> {
    let mut out = Vec::new();
    let mut offsets = HashMap::with_capacity(list.handlers.len());
    write_uleb128(&mut out, list.handlers.len() as u32);

    for (old_off, handler) in &list.handlers {
        let new_off = u16::try_from(out.len()).map_err(|_| Error::IndexOverflow {
            kind: "catch handler offset",
            index: out.len() as u32,
            max: u32::from(u16::MAX),
        })?;
        offsets.insert(*old_off, new_off);

        let count = handler.pairs.len() as i32;
        write_sleb128(
            &mut out,
            if handler.catch_all_addr.is_some() {
                -count
            } else {
                count
            },
        );
        for &(type_idx, addr) in &handler.pairs {
            write_uleb128(&mut out, map.remap_type(type_idx)?);
            write_uleb128(&mut out, addr);
        }
        if let Some(addr) = handler.catch_all_addr {
            write_uleb128(&mut out, addr);
        }
    }
    Ok((out, offsets))
}
