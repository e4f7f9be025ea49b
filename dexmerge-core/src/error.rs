//! Error types for dexmerge-core

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the dexmerge Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while merging two dex files
///
/// Every variant is fatal: a merge that fails leaves no usable output.
#[derive(Debug, Error)]
pub enum Error {
    /// A required input file does not exist
    #[error("input file not found: {}", .0.display())]
    MissingInput(PathBuf),

    /// Input is not a well-formed dex file
    #[error("invalid dex file: {0}")]
    InvalidDex(String),

    /// A read ran past the end of the input
    #[error("unexpected end of data at offset {offset:#x} (needed {needed} bytes)")]
    UnexpectedEof { offset: usize, needed: usize },

    /// Instruction stream contains an opcode outside the known table
    #[error("unknown opcode {opcode:#04x} at code unit {address}")]
    UnknownOpcode { opcode: u8, address: usize },

    /// A merged index no longer fits the operand that has to hold it
    #[error("index overflow: {kind} index {index} exceeds {max}")]
    IndexOverflow {
        kind: &'static str,
        index: u32,
        max: u32,
    },

    /// A switch or array payload does not start with the expected signature
    #[error("payload at code unit {address} has signature {found:#06x}, expected {expected:#06x}")]
    PayloadSignatureMismatch {
        address: usize,
        expected: u16,
        found: u16,
    },

    /// Encoded value type that cannot be carried across a merge
    #[error("unsupported encoded value type {0:#04x}")]
    UnsupportedValue(u8),

    /// Inheritance graph contains a cycle
    #[error("cyclic inheritance involving type index {type_idx}")]
    CyclicInheritance { type_idx: u32 },

    /// An output region received more bytes than were reserved for it
    #[error("output section '{section}' overflowed its reserved {capacity} bytes")]
    SectionOverflow {
        section: &'static str,
        capacity: usize,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error describes malformed or unrepresentable content,
    /// as opposed to an I/O or precondition failure
    pub fn is_format_error(&self) -> bool {
        !matches!(self, Error::MissingInput(_) | Error::Io(_))
    }
}
