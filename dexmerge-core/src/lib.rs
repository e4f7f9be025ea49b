//! # Dexmerge Core
//!
//! Core library for merging two Dalvik executable (dex) files into one.
//!
//! Each input is already sorted and deduplicated the way the dex format
//! requires. The merge combines their id tables into one sorted,
//! duplicate-free set, rewrites every index reference (in class definitions,
//! bytecode and static initializers) into the merged index space, and
//! recomputes the header's signature and checksum.
//!
//! ## Pipeline
//!
//! ```text
//! dex A ┐                                                         ┌ map list
//!       ├→ Parser → Merger (ids) → Resolver → ClassTransformer → ─┤ header
//! dex B ┘                                                         └ hasher
//! ```
//!
//! 1. **Parser**: Validates both inputs and reads their map lists
//! 2. **Merger**: Merges strings, types, type lists, protos, fields, methods
//! 3. **Resolver**: Orders classes so supertypes precede subtypes
//! 4. **ClassTransformer**: Copies class data, code and static values,
//!    patching indices through the rewriter and value transcoder
//! 5. **Hasher**: Writes the SHA-1 signature and Adler-32 checksum
//!
//! ## Example
//!
//! ```ignore
//! use dexmerge_core::{DexMerger, MergerConfig};
//!
//! let merger = DexMerger::new(MergerConfig::default());
//! let merged = merger.merge_bytes(classes_a, classes_b)?;
//! ```
//!
//! When both inputs define the same class, the definition from the first
//! input wins.

mod error;
pub mod classes;
pub mod hasher;
pub mod index_map;
pub mod io;
pub mod layout;
pub mod merger;
pub mod opcodes;
pub mod parser;
pub mod resolver;
pub mod rewriter;
pub mod values;

pub use error::{Error, Result};
pub use index_map::IndexMap;
pub use layout::GrowthFactors;
pub use merger::{merge_sorted, MergeOutcome, Merger};
pub use parser::DexFile;
pub use resolver::{ClassOrdering, InputId};

use parser::ItemType;
use std::path::Path;

/// Configuration for a merge
#[derive(Debug, Clone, Default)]
pub struct MergerConfig {
    /// How class definitions are ordered in the output
    pub class_ordering: ClassOrdering,

    /// Over-allocation applied to sections whose size can grow
    pub growth: GrowthFactors,
}

/// Statistics about one merge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Entries in each merged id table
    pub strings: u32,
    pub types: u32,
    pub protos: u32,
    pub fields: u32,
    pub methods: u32,

    /// Class definitions written
    pub classes: u32,

    /// Code items written
    pub code_items: u32,

    /// Size of both inputs (bytes)
    pub input_size: usize,

    /// Size of the merged output (bytes)
    pub output_size: usize,
}

/// Main interface for merging two dex files
pub struct DexMerger {
    config: MergerConfig,
}

impl DexMerger {
    /// Create a merger with the given configuration
    pub fn new(config: MergerConfig) -> Self {
        Self { config }
    }

    /// Create a merger with default configuration
    pub fn with_defaults() -> Self {
        Self::new(MergerConfig::default())
    }

    pub fn config(&self) -> &MergerConfig {
        &self.config
    }

    /// Merge two parsed files and return the merged file's bytes
    pub fn merge(&self, a: &DexFile, b: &DexFile) -> Result<Vec<u8>> {
        let (bytes, _stats) = self.merge_with_stats(a, b)?;
        Ok(bytes)
    }

    /// Merge two parsed files and return both the bytes and statistics
    pub fn merge_with_stats(&self, a: &DexFile, b: &DexFile) -> Result<(Vec<u8>, MergeStats)> {
        let mut merger = Merger::new(a, b, &self.config.growth);

        // Step 1: Merge id tables
        merger.merge_ids()?;

        // Step 2: Order classes
        let order = merger.sorted_classes(self.config.class_ordering)?;

        // Step 3: Copy classes
        merger.transform_classes(&order)?;

        let contents = merger.contents();
        let mut stats = MergeStats {
            strings: contents.section(ItemType::StringId).count,
            types: contents.section(ItemType::TypeId).count,
            protos: contents.section(ItemType::ProtoId).count,
            fields: contents.section(ItemType::FieldId).count,
            methods: contents.section(ItemType::MethodId).count,
            classes: contents.section(ItemType::ClassDef).count,
            code_items: contents.section(ItemType::Code).count,
            input_size: a.bytes().len() + b.bytes().len(),
            output_size: 0,
        };

        // Step 4: Map list, header, integrity fields
        let output = merger.finish()?;
        stats.output_size = output.len();

        log::info!(
            "Merge complete: {} classes, {} strings → {} bytes ({}% of input)",
            stats.classes,
            stats.strings,
            stats.output_size,
            if stats.input_size > 0 {
                (stats.output_size * 100) / stats.input_size
            } else {
                100
            }
        );

        Ok((output, stats))
    }

    /// Parse two byte buffers and merge them
    pub fn merge_bytes(&self, a: Vec<u8>, b: Vec<u8>) -> Result<Vec<u8>> {
        let a = DexFile::parse(a)?;
        let b = DexFile::parse(b)?;
        self.merge(&a, &b)
    }

    /// Merge the files at `input_a` and `input_b` into `output`
    ///
    /// Both inputs are checked before `output` is created, so a missing input
    /// never leaves a file behind.
    pub fn merge_files(
        &self,
        output: impl AsRef<Path>,
        input_a: impl AsRef<Path>,
        input_b: impl AsRef<Path>,
    ) -> Result<MergeStats> {
        for input in [input_a.as_ref(), input_b.as_ref()] {
            if !input.exists() {
                return Err(Error::MissingInput(input.to_path_buf()));
            }
        }

        let a = DexFile::parse(std::fs::read(input_a.as_ref())?)?;
        let b = DexFile::parse(std::fs::read(input_b.as_ref())?)?;
        let (bytes, stats) = self.merge_with_stats(&a, &b)?;
        std::fs::write(output.as_ref(), &bytes)?;
        Ok(stats)
    }
}

impl Default for DexMerger {
    fn default() -> Self {
        Self::with_defaults()
    }
}
