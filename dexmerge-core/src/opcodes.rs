//! Dalvik opcode table
//!
//! Maps each opcode byte `0x00..=0xe2` to its instruction format, the kind of
//! pool index it carries (if any), and for the three payload-referencing
//! instructions the signature their payload must start with. Unused opcodes
//! are one code unit long and carry nothing. Anything above `0xe2` is unknown.

/// Instruction formats, named as in the Dalvik bytecode documentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    F10x,
    F12x,
    F11n,
    F11x,
    F10t,
    F20t,
    F22x,
    F21t,
    F21s,
    F21h,
    F21c,
    F23x,
    F22b,
    F22t,
    F22s,
    F22c,
    F32x,
    F30t,
    F31t,
    F31i,
    F31c,
    F35c,
    F3rc,
    F51l,
}

impl Format {
    /// Instruction length in 16-bit code units
    pub fn units(self) -> usize {
        use Format::*;
        match self {
            F10x | F12x | F11n | F11x | F10t => 1,
            F20t | F22x | F21t | F21s | F21h | F21c | F23x | F22b | F22t | F22s | F22c => 2,
            F32x | F30t | F31t | F31i | F31c | F35c | F3rc => 3,
            F51l => 5,
        }
    }
}

/// Pool an instruction's index operand refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    None,
    String,
    Type,
    Field,
    Method,
}

impl IndexKind {
    pub fn name(self) -> &'static str {
        match self {
            IndexKind::None => "none",
            IndexKind::String => "string",
            IndexKind::Type => "type",
            IndexKind::Field => "field",
            IndexKind::Method => "method",
        }
    }
}

pub const PACKED_SWITCH_SIGNATURE: u16 = 0x0100;
pub const SPARSE_SWITCH_SIGNATURE: u16 = 0x0200;
pub const FILL_ARRAY_DATA_SIGNATURE: u16 = 0x0300;

/// Highest opcode byte the table describes
pub const MAX_OPCODE: u8 = 0xe2;

/// One row of the opcode table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opcode {
    pub code: u8,
    pub name: &'static str,
    pub format: Format,
    pub index: IndexKind,
    /// Expected payload signature for instructions pointing at a payload
    pub payload: Option<u16>,
}

impl Opcode {
    const fn new(code: u8, name: &'static str, format: Format, index: IndexKind) -> Self {
        Self {
            code,
            name,
            format,
            index,
            payload: None,
        }
    }

    pub fn units(&self) -> usize {
        self.format.units()
    }

    /// Whether the index operand spans two code units
    pub fn has_wide_index(&self) -> bool {
        self.format == Format::F31c
    }
}

const CMP: [&str; 5] = ["cmpl-float", "cmpg-float", "cmpl-double", "cmpg-double", "cmp-long"];
const IF_TEST: [&str; 6] = ["if-eq", "if-ne", "if-lt", "if-ge", "if-gt", "if-le"];
const IF_TESTZ: [&str; 6] = ["if-eqz", "if-nez", "if-ltz", "if-gez", "if-gtz", "if-lez"];
const ARRAY_OP: [&str; 14] = [
    "aget",
    "aget-wide",
    "aget-object",
    "aget-boolean",
    "aget-byte",
    "aget-char",
    "aget-short",
    "aput",
    "aput-wide",
    "aput-object",
    "aput-boolean",
    "aput-byte",
    "aput-char",
    "aput-short",
];
const INSTANCE_OP: [&str; 14] = [
    "iget",
    "iget-wide",
    "iget-object",
    "iget-boolean",
    "iget-byte",
    "iget-char",
    "iget-short",
    "iput",
    "iput-wide",
    "iput-object",
    "iput-boolean",
    "iput-byte",
    "iput-char",
    "iput-short",
];
const STATIC_OP: [&str; 14] = [
    "sget",
    "sget-wide",
    "sget-object",
    "sget-boolean",
    "sget-byte",
    "sget-char",
    "sget-short",
    "sput",
    "sput-wide",
    "sput-object",
    "sput-boolean",
    "sput-byte",
    "sput-char",
    "sput-short",
];
const INVOKE: [&str; 5] = [
    "invoke-virtual",
    "invoke-super",
    "invoke-direct",
    "invoke-static",
    "invoke-interface",
];
const INVOKE_RANGE: [&str; 5] = [
    "invoke-virtual/range",
    "invoke-super/range",
    "invoke-direct/range",
    "invoke-static/range",
    "invoke-interface/range",
];
const UNOP: [&str; 21] = [
    "neg-int",
    "not-int",
    "neg-long",
    "not-long",
    "neg-float",
    "neg-double",
    "int-to-long",
    "int-to-float",
    "int-to-double",
    "long-to-int",
    "long-to-float",
    "long-to-double",
    "float-to-int",
    "float-to-long",
    "float-to-double",
    "double-to-int",
    "double-to-long",
    "double-to-float",
    "int-to-byte",
    "int-to-char",
    "int-to-short",
];
const BINOP: [&str; 32] = [
    "add-int",
    "sub-int",
    "mul-int",
    "div-int",
    "rem-int",
    "and-int",
    "or-int",
    "xor-int",
    "shl-int",
    "shr-int",
    "ushr-int",
    "add-long",
    "sub-long",
    "mul-long",
    "div-long",
    "rem-long",
    "and-long",
    "or-long",
    "xor-long",
    "shl-long",
    "shr-long",
    "ushr-long",
    "add-float",
    "sub-float",
    "mul-float",
    "div-float",
    "rem-float",
    "add-double",
    "sub-double",
    "mul-double",
    "div-double",
    "rem-double",
];
const BINOP_2ADDR: [&str; 32] = [
    "add-int/2addr",
    "sub-int/2addr",
    "mul-int/2addr",
    "div-int/2addr",
    "rem-int/2addr",
    "and-int/2addr",
    "or-int/2addr",
    "xor-int/2addr",
    "shl-int/2addr",
    "shr-int/2addr",
    "ushr-int/2addr",
    "add-long/2addr",
    "sub-long/2addr",
    "mul-long/2addr",
    "div-long/2addr",
    "rem-long/2addr",
    "and-long/2addr",
    "or-long/2addr",
    "xor-long/2addr",
    "shl-long/2addr",
    "shr-long/2addr",
    "ushr-long/2addr",
    "add-float/2addr",
    "sub-float/2addr",
    "mul-float/2addr",
    "div-float/2addr",
    "rem-float/2addr",
    "add-double/2addr",
    "sub-double/2addr",
    "mul-double/2addr",
    "div-double/2addr",
    "rem-double/2addr",
];
const BINOP_LIT16: [&str; 8] = [
    "add-int/lit16",
    "rsub-int",
    "mul-int/lit16",
    "div-int/lit16",
    "rem-int/lit16",
    "and-int/lit16",
    "or-int/lit16",
    "xor-int/lit16",
];
const BINOP_LIT8: [&str; 11] = [
    "add-int/lit8",
    "rsub-int/lit8",
    "mul-int/lit8",
    "div-int/lit8",
    "rem-int/lit8",
    "and-int/lit8",
    "or-int/lit8",
    "xor-int/lit8",
    "shl-int/lit8",
    "shr-int/lit8",
    "ushr-int/lit8",
];

/// Look up an opcode byte; `None` for bytes past [`MAX_OPCODE`]
pub fn lookup(code: u8) -> Option<Opcode> {
    use Format::*;
    use IndexKind as K;

    let op = |name, format| Opcode::new(code, name, format, K::None);
    let indexed = |name, format, kind| Opcode::new(code, name, format, kind);
    let with_payload = |name, signature| Opcode {
        payload: Some(signature),
        ..Opcode::new(code, name, F31t, K::None)
    };
    let grouped = |names: &[&'static str], first: u8| names[usize::from(code - first)];

    let opcode = match code {
        0x00 => op("nop", F10x),
        0x01 => op("move", F12x),
        0x02 => op("move/from16", F22x),
        0x03 => op("move/16", F32x),
        0x04 => op("move-wide", F12x),
        0x05 => op("move-wide/from16", F22x),
        0x06 => op("move-wide/16", F32x),
        0x07 => op("move-object", F12x),
        0x08 => op("move-object/from16", F22x),
        0x09 => op("move-object/16", F32x),
        0x0a => op("move-result", F11x),
        0x0b => op("move-result-wide", F11x),
        0x0c => op("move-result-object", F11x),
        0x0d => op("move-exception", F11x),
        0x0e => op("return-void", F10x),
        0x0f => op("return", F11x),
        0x10 => op("return-wide", F11x),
        0x11 => op("return-object", F11x),
        0x12 => op("const/4", F11n),
        0x13 => op("const/16", F21s),
        0x14 => op("const", F31i),
        0x15 => op("const/high16", F21h),
        0x16 => op("const-wide/16", F21s),
        0x17 => op("const-wide/32", F31i),
        0x18 => op("const-wide", F51l),
        0x19 => op("const-wide/high16", F21h),
        0x1a => indexed("const-string", F21c, K::String),
        0x1b => indexed("const-string/jumbo", F31c, K::String),
        0x1c => indexed("const-class", F21c, K::Type),
        0x1d => op("monitor-enter", F11x),
        0x1e => op("monitor-exit", F11x),
        0x1f => indexed("check-cast", F21c, K::Type),
        0x20 => indexed("instance-of", F22c, K::Type),
        0x21 => op("array-length", F12x),
        0x22 => indexed("new-instance", F21c, K::Type),
        0x23 => indexed("new-array", F22c, K::Type),
        0x24 => indexed("filled-new-array", F35c, K::Type),
        0x25 => indexed("filled-new-array/range", F3rc, K::Type),
        0x26 => with_payload("fill-array-data", FILL_ARRAY_DATA_SIGNATURE),
        0x27 => op("throw", F11x),
        0x28 => op("goto", F10t),
        0x29 => op("goto/16", F20t),
        0x2a => op("goto/32", F30t),
        0x2b => with_payload("packed-switch", PACKED_SWITCH_SIGNATURE),
        0x2c => with_payload("sparse-switch", SPARSE_SWITCH_SIGNATURE),
        0x2d..=0x31 => op(grouped(&CMP, 0x2d), F23x),
        0x32..=0x37 => op(grouped(&IF_TEST, 0x32), F22t),
        0x38..=0x3d => op(grouped(&IF_TESTZ, 0x38), F21t),
        0x3e..=0x43 => op("unused", F10x),
        0x44..=0x51 => op(grouped(&ARRAY_OP, 0x44), F23x),
        0x52..=0x5f => indexed(grouped(&INSTANCE_OP, 0x52), F22c, K::Field),
        0x60..=0x6d => indexed(grouped(&STATIC_OP, 0x60), F21c, K::Field),
        0x6e..=0x72 => indexed(grouped(&INVOKE, 0x6e), F35c, K::Method),
        0x73 => op("unused", F10x),
        0x74..=0x78 => indexed(grouped(&INVOKE_RANGE, 0x74), F3rc, K::Method),
        0x79 | 0x7a => op("unused", F10x),
        0x7b..=0x8f => op(grouped(&UNOP, 0x7b), F12x),
        0x90..=0xaf => op(grouped(&BINOP, 0x90), F23x),
        0xb0..=0xcf => op(grouped(&BINOP_2ADDR, 0xb0), F12x),
        0xd0..=0xd7 => op(grouped(&BINOP_LIT16, 0xd0), F22s),
        0xd8..=0xe2 => op(grouped(&BINOP_LIT8, 0xd8), F22b),
        _ => return None,
    };
    Some(opcode)
}
