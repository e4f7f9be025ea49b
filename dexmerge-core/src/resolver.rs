//! Class ordering for the merged file
//!
//! The dex format requires a class definition to appear after the
//! definitions of its superclass and of every interface it implements, when
//! those are defined in the same file. This module gathers the class
//! definitions of both inputs in the merged type index space, assigns each a
//! depth in the inheritance graph, and orders them by depth.

use crate::index_map::IndexMap;
use crate::parser::{DexFile, NO_INDEX};
use crate::{Error, Result};
use log::debug;

/// Which input a class definition came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputId {
    A,
    B,
}

/// How inheritance depths are computed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClassOrdering {
    /// Repeated relaxation scans. A reference to a type with no definition
    /// in either input counts as depth 1, so the output is byte-identical to
    /// long-standing dex mergers.
    #[default]
    Legacy,
    /// Depth-first search with memoisation. References without a definition
    /// contribute nothing.
    Strict,
}

/// A class definition waiting to be ordered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortableType {
    /// Merged type index of the class
    pub type_idx: u32,
    /// Merged type index of the superclass, if any
    pub supertype_idx: Option<u32>,
    /// Merged type indices of the implemented interfaces
    pub interfaces: Vec<u32>,
    pub source: InputId,
    /// Offset of the `class_def_item` in its source file
    pub class_def_offset: u32,
    pub depth: Option<u32>,
}

impl SortableType {
    fn references(&self) -> impl Iterator<Item = u32> + '_ {
        self.supertype_idx
            .into_iter()
            .chain(self.interfaces.iter().copied())
    }
}

/// Collects class definitions from both inputs and orders them
#[derive(Debug, Default)]
pub struct ClassSorter {
    /// Indexed by merged type index
    types: Vec<Option<SortableType>>,
    dropped: usize,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    Unvisited,
    InProgress,
    Done(u32),
}

impl ClassSorter {
    /// Create a sorter for a merged type table of `type_count` entries
    pub fn new(type_count: usize) -> Self {
        Self {
            types: vec![None; type_count],
            dropped: 0,
        }
    }

    /// Register a class definition. The first definition of a type wins;
    /// returns `false` when `ty` was dropped because one already exists.
    pub fn add(&mut self, ty: SortableType) -> Result<bool> {
        let len = self.types.len();
        let slot = self.types.get_mut(ty.type_idx as usize).ok_or_else(|| {
            Error::InvalidDex(format!(
                "class type index {} outside merged type table ({len} entries)",
                ty.type_idx
            ))
        })?;
        if slot.is_some() {
            self.dropped += 1;
            return Ok(false);
        }
        *slot = Some(ty);
        Ok(true)
    }

    /// Register every class definition of one input, translating its type
    /// references through the input's index map
    pub fn add_input(&mut self, dex: &DexFile, map: &IndexMap, source: InputId) -> Result<()> {
        let mut added = 0usize;
        for class_def in dex.class_defs()? {
            let supertype_idx = match map.remap_type_or_none(class_def.superclass_idx)? {
                NO_INDEX => None,
                idx => Some(idx),
            };
            let interfaces = dex
                .type_list(class_def.interfaces_off)?
                .into_iter()
                .map(|ty| map.remap_type(ty))
                .collect::<Result<Vec<_>>>()?;
            let ty = SortableType {
                type_idx: map.remap_type(class_def.class_idx)?,
                supertype_idx,
                interfaces,
                source,
                class_def_offset: class_def.offset,
                depth: None,
            };
            if self.add(ty)? {
                added += 1;
            }
        }
        debug!("input {source:?}: {added} class definitions queued");
        Ok(())
    }

    /// Number of definitions dropped as duplicates
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Assign depths and return the definitions ordered by
    /// (depth, type index)
    pub fn sort(mut self, ordering: ClassOrdering) -> Result<Vec<SortableType>> {
        match ordering {
            ClassOrdering::Legacy => self.assign_depths_legacy()?,
            ClassOrdering::Strict => self.assign_depths_strict()?,
        }
        if self.dropped > 0 {
            debug!("{} duplicate class definitions dropped", self.dropped);
        }

        let mut sorted: Vec<SortableType> = self.types.into_iter().flatten().collect();
        sorted.sort_by_key(|ty| (ty.depth, ty.type_idx));
        Ok(sorted)
    }

    fn assign_depths_legacy(&mut self) -> Result<()> {
        let mut scans = 0usize;
        loop {
            scans += 1;
            let mut progress = false;
            let mut first_pending = None;

            for idx in 0..self.types.len() {
                let Some(ty) = &self.types[idx] else {
                    continue;
                };
                if ty.depth.is_some() {
                    continue;
                }

                // A class without a superclass starts from 0 but still waits
                // for its interfaces.
                let mut max = 0u32;
                let mut ready = true;
                for reference in ty.references() {
                    match self.types.get(reference as usize) {
                        Some(Some(known)) => match known.depth {
                            Some(d) => max = max.max(d),
                            None => {
                                ready = false;
                                break;
                            }
                        },
                        // Not defined in either input
                        _ => max = max.max(1),
                    }
                }
                let depth = ready.then_some(max + 1);

                match depth {
                    Some(depth) => {
                        if let Some(ty) = self.types[idx].as_mut() {
                            ty.depth = Some(depth);
                        }
                        progress = true;
                    }
                    None => {
                        first_pending.get_or_insert(idx as u32);
                    }
                }
            }

            match first_pending {
                None => break,
                Some(type_idx) if !progress => {
                    return Err(Error::CyclicInheritance { type_idx });
                }
                Some(_) => {}
            }
        }
        debug!("class depths settled after {scans} scans");
        Ok(())
    }

    fn assign_depths_strict(&mut self) -> Result<()> {
        let mut visits = vec![Visit::Unvisited; self.types.len()];
        for idx in 0..self.types.len() {
            if self.types[idx].is_some() {
                self.visit(idx as u32, &mut visits)?;
            }
        }
        for (ty, visit) in self.types.iter_mut().zip(&visits) {
            if let (Some(ty), Visit::Done(depth)) = (ty, visit) {
                ty.depth = Some(*depth);
            }
        }
        Ok(())
    }

    fn visit(&self, idx: u32, visits: &mut [Visit]) -> Result<Option<u32>> {
        let Some(Some(ty)) = self.types.get(idx as usize) else {
            return Ok(None);
        };
        match visits[idx as usize] {
            Visit::Done(depth) => return Ok(Some(depth)),
            Visit::InProgress => return Err(Error::CyclicInheritance { type_idx: idx }),
            Visit::Unvisited => {}
        }

        visits[idx as usize] = Visit::InProgress;
        let mut depth = 0;
        for reference in ty.references() {
            if let Some(d) = self.visit(reference, visits)? {
                depth = depth.max(d + 1);
            }
        }
        visits[idx as usize] = Visit::Done(depth);
        Ok(Some(depth))
    }
}
