//! Id table merging
//!
//! This module combines the sorted id tables of two dex files into one
//! sorted, duplicate-free output table, recording in each input's
//! [`IndexMap`] where every old entry ended up.
//!
//! Tables are merged in dependency order, since later tables refer to earlier
//! ones by index:
//!
//! ```text
//! strings → types → type lists → protos → fields → methods
//! ```

use crate::classes::ClassTransformer;
use crate::hasher;
use crate::index_map::{narrow_u16, IndexMap};
use crate::layout::{GrowthFactors, OutputContents, OutputLayout};
use crate::parser::{DexFile, FieldId, ItemType, MethodId, StringData};
use crate::resolver::{ClassOrdering, ClassSorter, InputId, SortableType};
use crate::Result;
use log::{debug, info, trace, warn};
use std::cmp::Ordering;

/// Index translations produced by one two-way merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Old index in A -> output index
    pub a: Vec<u32>,
    /// Old index in B -> output index
    pub b: Vec<u32>,
    /// Number of items emitted
    pub count: u32,
}

/// Merge two ascending sequences into one ascending, duplicate-free sequence.
///
/// `emit` is called once per output item, in output order. When both sides
/// hold an equal item, A's copy is emitted and B's is dropped; both old
/// indices map to the same output slot. Inputs that are not ascending produce
/// an unspecified (but memory-safe) result.
pub fn merge_sorted<T, F>(a: &[T], b: &[T], mut emit: F) -> Result<MergeOutcome>
where
    T: Ord,
    F: FnMut(&T) -> Result<()>,
{
    let mut a_map = vec![0u32; a.len()];
    let mut b_map = vec![0u32; b.len()];
    let (mut i, mut j) = (0usize, 0usize);
    let mut count = 0u32;

    while i < a.len() || j < b.len() {
        let order = match (a.get(i), b.get(j)) {
            (Some(x), Some(y)) => x.cmp(y),
            (Some(_), None) => Ordering::Less,
            _ => Ordering::Greater,
        };
        match order {
            Ordering::Less => {
                a_map[i] = count;
                emit(&a[i])?;
                i += 1;
            }
            Ordering::Greater => {
                b_map[j] = count;
                emit(&b[j])?;
                j += 1;
            }
            Ordering::Equal => {
                a_map[i] = count;
                b_map[j] = count;
                emit(&a[i])?;
                i += 1;
                j += 1;
            }
        }
        count += 1;
    }

    Ok(MergeOutcome {
        a: a_map,
        b: b_map,
        count,
    })
}

/// What the merge driver needs to know about one id table
trait IdTable<'a> {
    /// Entry with all of its references already translated into the output's
    /// index space, ordered by the table's canonical sort key
    type Item: Ord;

    const KIND: ItemType;

    fn read_items(dex: &'a DexFile, map: &IndexMap) -> Result<Vec<Self::Item>>;

    fn write(
        item: &Self::Item,
        layout: &mut OutputLayout,
        contents: &mut OutputContents,
    ) -> Result<()>;

    fn record(map: &mut IndexMap, remap: Vec<u32>);
}

/// A string, compared by UTF-16 code units
struct StringItem<'a> {
    utf16: Vec<u16>,
    raw: StringData<'a>,
}

impl PartialEq for StringItem<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.utf16 == other.utf16
    }
}

impl Eq for StringItem<'_> {}

impl PartialOrd for StringItem<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StringItem<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.utf16.cmp(&other.utf16)
    }
}

struct StringTable;

impl<'a> IdTable<'a> for StringTable {
    type Item = StringItem<'a>;
    const KIND: ItemType = ItemType::StringId;

    fn read_items(dex: &'a DexFile, _map: &IndexMap) -> Result<Vec<Self::Item>> {
        let count = dex.table_of_contents().section(ItemType::StringId).count;
        (0..count)
            .map(|i| {
                let raw = dex.string_data(i)?;
                Ok(StringItem {
                    utf16: raw.to_utf16()?,
                    raw,
                })
            })
            .collect()
    }

    fn write(
        item: &Self::Item,
        layout: &mut OutputLayout,
        contents: &mut OutputContents,
    ) -> Result<()> {
        let data_off = layout.string_data.position();
        layout.string_data.write_uleb128(item.raw.utf16_size)?;
        layout.string_data.write_bytes(item.raw.data)?;
        layout.string_data.write_u8(0)?;
        contents.add(ItemType::StringData, data_off);

        contents.add(Self::KIND, layout.ids_defs.position());
        layout.ids_defs.write_u32(data_off)
    }

    fn record(map: &mut IndexMap, remap: Vec<u32>) {
        map.strings = remap;
    }
}

struct TypeTable;

impl<'a> IdTable<'a> for TypeTable {
    /// Descriptor string index
    type Item = u32;
    const KIND: ItemType = ItemType::TypeId;

    fn read_items(dex: &'a DexFile, map: &IndexMap) -> Result<Vec<u32>> {
        let count = dex.table_of_contents().section(ItemType::TypeId).count;
        (0..count)
            .map(|i| map.remap_string(dex.type_descriptor_index(i)?))
            .collect()
    }

    fn write(item: &u32, layout: &mut OutputLayout, contents: &mut OutputContents) -> Result<()> {
        contents.add(Self::KIND, layout.ids_defs.position());
        layout.ids_defs.write_u32(*item)
    }

    fn record(map: &mut IndexMap, remap: Vec<u32>) {
        map.types = remap;
    }
}

/// A prototype ordered by return type, then parameter list
#[derive(Debug, Clone)]
struct ProtoItem {
    shorty_idx: u32,
    return_type_idx: u32,
    parameters: Vec<u32>,
    parameters_off: u32,
}

impl PartialEq for ProtoItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ProtoItem {}

impl PartialOrd for ProtoItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ProtoItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.return_type_idx
            .cmp(&other.return_type_idx)
            .then_with(|| self.parameters.cmp(&other.parameters))
    }
}

struct ProtoTable;

impl<'a> IdTable<'a> for ProtoTable {
    type Item = ProtoItem;
    const KIND: ItemType = ItemType::ProtoId;

    fn read_items(dex: &'a DexFile, map: &IndexMap) -> Result<Vec<ProtoItem>> {
        let count = dex.table_of_contents().section(ItemType::ProtoId).count;
        (0..count)
            .map(|i| {
                let proto = dex.proto_id(i)?;
                let parameters = dex
                    .type_list(proto.parameters_off)?
                    .into_iter()
                    .map(|ty| map.remap_type(ty))
                    .collect::<Result<Vec<_>>>()?;
                Ok(ProtoItem {
                    shorty_idx: map.remap_string(proto.shorty_idx)?,
                    return_type_idx: map.remap_type(proto.return_type_idx)?,
                    parameters,
                    parameters_off: map.remap_type_list_offset(proto.parameters_off)?,
                })
            })
            .collect()
    }

    fn write(
        item: &ProtoItem,
        layout: &mut OutputLayout,
        contents: &mut OutputContents,
    ) -> Result<()> {
        contents.add(Self::KIND, layout.ids_defs.position());
        layout.ids_defs.write_u32(item.shorty_idx)?;
        layout.ids_defs.write_u32(item.return_type_idx)?;
        layout.ids_defs.write_u32(item.parameters_off)
    }

    fn record(map: &mut IndexMap, remap: Vec<u32>) {
        map.protos = remap;
    }
}

struct FieldTable;

impl<'a> IdTable<'a> for FieldTable {
    type Item = FieldId;
    const KIND: ItemType = ItemType::FieldId;

    fn read_items(dex: &'a DexFile, map: &IndexMap) -> Result<Vec<FieldId>> {
        let count = dex.table_of_contents().section(ItemType::FieldId).count;
        (0..count)
            .map(|i| {
                let field = dex.field_id(i)?;
                Ok(FieldId {
                    class_idx: map.remap_type(field.class_idx)?,
                    type_idx: map.remap_type(field.type_idx)?,
                    name_idx: map.remap_string(field.name_idx)?,
                })
            })
            .collect()
    }

    fn write(
        item: &FieldId,
        layout: &mut OutputLayout,
        contents: &mut OutputContents,
    ) -> Result<()> {
        contents.add(Self::KIND, layout.ids_defs.position());
        layout.ids_defs.write_u16(narrow_u16("type", item.class_idx)?)?;
        layout.ids_defs.write_u16(narrow_u16("type", item.type_idx)?)?;
        layout.ids_defs.write_u32(item.name_idx)
    }

    fn record(map: &mut IndexMap, remap: Vec<u32>) {
        map.fields = remap;
    }
}

struct MethodTable;

impl<'a> IdTable<'a> for MethodTable {
    type Item = MethodId;
    const KIND: ItemType = ItemType::MethodId;

    fn read_items(dex: &'a DexFile, map: &IndexMap) -> Result<Vec<MethodId>> {
        let count = dex.table_of_contents().section(ItemType::MethodId).count;
        (0..count)
            .map(|i| {
                let method = dex.method_id(i)?;
                Ok(MethodId {
                    class_idx: map.remap_type(method.class_idx)?,
                    proto_idx: map.remap_proto(method.proto_idx)?,
                    name_idx: map.remap_string(method.name_idx)?,
                })
            })
            .collect()
    }

    fn write(
        item: &MethodId,
        layout: &mut OutputLayout,
        contents: &mut OutputContents,
    ) -> Result<()> {
        contents.add(Self::KIND, layout.ids_defs.position());
        layout.ids_defs.write_u16(narrow_u16("type", item.class_idx)?)?;
        layout.ids_defs.write_u16(narrow_u16("proto", item.proto_idx)?)?;
        layout.ids_defs.write_u32(item.name_idx)
    }

    fn record(map: &mut IndexMap, remap: Vec<u32>) {
        map.methods = remap;
    }
}

/// State of one merge: both inputs, their index maps, and the output
pub struct Merger<'a> {
    dex_a: &'a DexFile,
    dex_b: &'a DexFile,
    map_a: IndexMap,
    map_b: IndexMap,
    layout: OutputLayout,
    contents: OutputContents,
}

impl<'a> Merger<'a> {
    /// Plan the output layout for merging `dex_a` with `dex_b`
    pub fn new(dex_a: &'a DexFile, dex_b: &'a DexFile, growth: &GrowthFactors) -> Self {
        let toc_a = dex_a.table_of_contents();
        let toc_b = dex_b.table_of_contents();
        for (name, toc) in [("A", toc_a), ("B", toc_b)] {
            for ty in [
                ItemType::CallSiteId,
                ItemType::MethodHandle,
                ItemType::HiddenapiClassData,
            ] {
                if toc.section(ty).count > 0 {
                    warn!("input {name}: dropping {ty:?} section, it is not merged");
                }
            }
        }
        Self {
            dex_a,
            dex_b,
            map_a: IndexMap::new(toc_a),
            map_b: IndexMap::new(toc_b),
            layout: OutputLayout::plan(toc_a, toc_b, growth),
            contents: OutputContents::default(),
        }
    }

    pub fn contents(&self) -> &OutputContents {
        &self.contents
    }

    /// Merge all id tables, in dependency order
    pub fn merge_ids(&mut self) -> Result<()> {
        info!("Merging string ids");
        self.merge_table::<StringTable>()?;
        info!("Merging type ids");
        self.merge_table::<TypeTable>()?;
        info!("Copying type lists");
        self.copy_type_lists(InputId::A)?;
        self.copy_type_lists(InputId::B)?;
        info!("Merging proto ids");
        self.merge_table::<ProtoTable>()?;
        info!("Merging field ids");
        self.merge_table::<FieldTable>()?;
        info!("Merging method ids");
        self.merge_table::<MethodTable>()?;
        Ok(())
    }

    fn merge_table<T: IdTable<'a>>(&mut self) -> Result<u32> {
        let items_a = T::read_items(self.dex_a, &self.map_a)?;
        let items_b = T::read_items(self.dex_b, &self.map_b)?;

        let layout = &mut self.layout;
        let contents = &mut self.contents;
        let outcome = merge_sorted(&items_a, &items_b, |item| {
            T::write(item, layout, contents)
        })?;

        debug!(
            "{:?}: {} + {} -> {}",
            T::KIND,
            items_a.len(),
            items_b.len(),
            outcome.count
        );
        T::record(&mut self.map_a, outcome.a);
        T::record(&mut self.map_b, outcome.b);
        Ok(outcome.count)
    }

    /// Copy every type list of one input, translating its entries and
    /// recording the old-to-new offset of each list
    fn copy_type_lists(&mut self, input: InputId) -> Result<()> {
        let (dex, map) = match input {
            InputId::A => (self.dex_a, &mut self.map_a),
            InputId::B => (self.dex_b, &mut self.map_b),
        };
        let section = dex.table_of_contents().section(ItemType::TypeList);
        let out = &mut self.layout.type_list;
        let mut reader = dex.reader_at(section.offset);

        for _ in 0..section.count {
            reader.align_to_four_bytes();
            let old_off = reader.position() as u32;
            let size = reader.read_u32()?;

            out.align_to_four_bytes()?;
            let new_off = out.position();
            out.write_u32(size)?;
            for _ in 0..size {
                let ty = map.remap_type(u32::from(reader.read_u16()?))?;
                out.write_u16(narrow_u16("type", ty)?)?;
            }
            self.contents.add(ItemType::TypeList, new_off);
            map.put_type_list_offset(old_off, new_off);
        }
        debug!("input {input:?}: copied {} type lists", section.count);
        Ok(())
    }

    /// Compute the class emission order over both inputs
    pub fn sorted_classes(&self, ordering: ClassOrdering) -> Result<Vec<SortableType>> {
        info!("Ordering class definitions ({ordering:?})");
        let type_count = self.contents.section(ItemType::TypeId).count as usize;
        let mut sorter = ClassSorter::new(type_count);
        sorter.add_input(self.dex_a, &self.map_a, InputId::A)?;
        sorter.add_input(self.dex_b, &self.map_b, InputId::B)?;
        sorter.sort(ordering)
    }

    /// Copy and reindex every class, in the given order
    pub fn transform_classes(&mut self, order: &[SortableType]) -> Result<()> {
        info!("Transforming {} classes", order.len());
        let mut transformer_a = ClassTransformer::new(self.dex_a, &self.map_a);
        let mut transformer_b = ClassTransformer::new(self.dex_b, &self.map_b);

        for ty in order {
            let (dex, transformer) = match ty.source {
                InputId::A => (self.dex_a, &mut transformer_a),
                InputId::B => (self.dex_b, &mut transformer_b),
            };
            let class_def = dex.class_def_at(ty.class_def_offset)?;
            trace!("class {} from input {:?}", ty.type_idx, ty.source);
            transformer.transform(ty.type_idx, &class_def, &mut self.layout, &mut self.contents)?;
        }
        Ok(())
    }

    /// Write the map list and header, assemble the file, and patch its
    /// checksum and signature
    pub fn finish(mut self) -> Result<Vec<u8>> {
        info!("Writing map list and header");
        let version = self.dex_a.header().version.max(self.dex_b.header().version);
        self.contents.write_map_list(&mut self.layout)?;
        self.contents.write_header(&mut self.layout, version)?;

        let mut bytes = self.layout.assemble();
        hasher::write_integrity_fields(&mut bytes)?;
        Ok(bytes)
    }
}
