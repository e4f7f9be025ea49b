//! Per-input index translation tables
//!
//! One [`IndexMap`] exists for each input file. Each id-table merge fills the
//! matching vector exactly once; afterwards the map is only read.

use crate::parser::{ItemType, TableOfContents, NO_INDEX};
use crate::{Error, Result};
use std::collections::HashMap;

/// Old-index to new-index translations for one input
#[derive(Debug, Clone)]
pub struct IndexMap {
    /// String index remapping: old -> new
    pub strings: Vec<u32>,
    /// Type index remapping: old -> new
    pub types: Vec<u32>,
    /// Prototype index remapping: old -> new
    pub protos: Vec<u32>,
    /// Field index remapping: old -> new
    pub fields: Vec<u32>,
    /// Method index remapping: old -> new
    pub methods: Vec<u32>,
    type_list_offsets: HashMap<u32, u32>,
}

impl IndexMap {
    /// Create a map sized to the input's id tables
    pub fn new(contents: &TableOfContents) -> Self {
        let sized = |ty: ItemType| vec![0u32; contents.section(ty).count as usize];
        let mut type_list_offsets = HashMap::new();
        // The empty list is always encoded as offset 0
        type_list_offsets.insert(0, 0);
        Self {
            strings: sized(ItemType::StringId),
            types: sized(ItemType::TypeId),
            protos: sized(ItemType::ProtoId),
            fields: sized(ItemType::FieldId),
            methods: sized(ItemType::MethodId),
            type_list_offsets,
        }
    }

    /// Remap a string index
    pub fn remap_string(&self, idx: u32) -> Result<u32> {
        lookup(&self.strings, "string", idx)
    }

    /// Remap a string index, passing [`NO_INDEX`] through
    pub fn remap_string_or_none(&self, idx: u32) -> Result<u32> {
        if idx == NO_INDEX {
            Ok(NO_INDEX)
        } else {
            self.remap_string(idx)
        }
    }

    /// Remap a type index
    pub fn remap_type(&self, idx: u32) -> Result<u32> {
        lookup(&self.types, "type", idx)
    }

    /// Remap a type index, passing [`NO_INDEX`] through
    pub fn remap_type_or_none(&self, idx: u32) -> Result<u32> {
        if idx == NO_INDEX {
            Ok(NO_INDEX)
        } else {
            self.remap_type(idx)
        }
    }

    /// Remap a prototype index
    pub fn remap_proto(&self, idx: u32) -> Result<u32> {
        lookup(&self.protos, "proto", idx)
    }

    /// Remap a field index
    pub fn remap_field(&self, idx: u32) -> Result<u32> {
        lookup(&self.fields, "field", idx)
    }

    /// Remap a method index
    pub fn remap_method(&self, idx: u32) -> Result<u32> {
        lookup(&self.methods, "method", idx)
    }

    /// Record where a type list was copied to
    pub fn put_type_list_offset(&mut self, old: u32, new: u32) {
        self.type_list_offsets.insert(old, new);
    }

    /// Remap a type list offset; 0 (the empty list) maps to itself
    pub fn remap_type_list_offset(&self, old: u32) -> Result<u32> {
        self.type_list_offsets.get(&old).copied().ok_or_else(|| {
            Error::InvalidDex(format!("no type list was copied from offset {old:#x}"))
        })
    }
}

fn lookup(table: &[u32], kind: &'static str, idx: u32) -> Result<u32> {
    table.get(idx as usize).copied().ok_or_else(|| {
        Error::InvalidDex(format!(
            "{kind} index {idx} out of range (table has {} entries)",
            table.len()
        ))
    })
}

/// Narrow a merged index to the 16-bit width most dex structures store
pub fn narrow_u16(kind: &'static str, idx: u32) -> Result<u16> {
    u16::try_from(idx).map_err(|_| Error::IndexOverflow {
        kind,
        index: idx,
        max: u32::from(u16::MAX),
    })
}
