//! Instruction stream rewriting for index remapping
//!
//! This module walks a method's code units and translates every embedded
//! string, type, field and method index into the merged index space. Opcodes,
//! registers, branch offsets and literals are left untouched, so the stream
//! keeps its exact length and every relative offset stays valid.
//!
//! Switch tables and array data live inline in the stream as payloads. They
//! are located through the instruction that references them and then skipped
//! by the main scan.

use crate::index_map::{narrow_u16, IndexMap};
use crate::opcodes::{
    self, IndexKind, Opcode, FILL_ARRAY_DATA_SIGNATURE, PACKED_SWITCH_SIGNATURE,
    SPARSE_SWITCH_SIGNATURE,
};
use crate::{Error, Result};
use log::trace;
use std::collections::BTreeMap;

/// Translates the indices embedded in code units through one input's map
pub struct InstructionPatcher<'a> {
    map: &'a IndexMap,
}

impl<'a> InstructionPatcher<'a> {
    pub fn new(map: &'a IndexMap) -> Self {
        Self { map }
    }

    /// Rewrite a copy of `insns`, returning the patched code units
    pub fn patch(&self, insns: &[u16]) -> Result<Vec<u16>> {
        let mut out = insns.to_vec();
        // start -> end of every payload reached so far
        let mut payloads: BTreeMap<usize, usize> = BTreeMap::new();
        let mut pc = 0;

        while pc < out.len() {
            if let Some(&end) = payloads.get(&pc) {
                pc = end;
                continue;
            }

            let unit = out[pc];
            if is_payload_signature(unit) {
                // A payload placed before (or without) its referencing
                // instruction still has to be stepped over as data.
                let end = pc + payload_units(&out, pc)?;
                payloads.insert(pc, end);
                pc = end;
                continue;
            }

            let code = (unit & 0xff) as u8;
            let op = opcodes::lookup(code).ok_or(Error::UnknownOpcode {
                opcode: code,
                address: pc,
            })?;
            let len = op.units();
            if pc + len > out.len() {
                return Err(Error::InvalidDex(format!(
                    "{} at code unit {pc} runs past the end of the method",
                    op.name
                )));
            }

            self.patch_index(&mut out, pc, &op)?;

            if let Some(signature) = op.payload {
                let start = payload_target(&out, pc)?;
                let found = out[start];
                if found != signature {
                    return Err(Error::PayloadSignatureMismatch {
                        address: start,
                        expected: signature,
                        found,
                    });
                }
                let end = start + payload_units(&out, start)?;
                trace!("{} at {pc} -> payload {start}..{end}", op.name);
                payloads.insert(start, end);
            }

            pc += len;
        }

        Ok(out)
    }

    fn patch_index(&self, out: &mut [u16], pc: usize, op: &Opcode) -> Result<()> {
        match op.index {
            IndexKind::None => {}
            IndexKind::String if op.has_wide_index() => {
                let old = u32::from(out[pc + 1]) | (u32::from(out[pc + 2]) << 16);
                let new = self.map.remap_string(old)?;
                out[pc + 1] = new as u16;
                out[pc + 2] = (new >> 16) as u16;
            }
            kind => {
                let old = u32::from(out[pc + 1]);
                let new = match kind {
                    IndexKind::String => self.map.remap_string(old)?,
                    IndexKind::Type => self.map.remap_type(old)?,
                    IndexKind::Field => self.map.remap_field(old)?,
                    _ => self.map.remap_method(old)?,
                };
                // const-string cannot be widened in place to its jumbo form
                out[pc + 1] = narrow_u16(kind.name(), new)?;
            }
        }
        Ok(())
    }
}

fn is_payload_signature(unit: u16) -> bool {
    matches!(
        unit,
        PACKED_SWITCH_SIGNATURE | SPARSE_SWITCH_SIGNATURE | FILL_ARRAY_DATA_SIGNATURE
    )
}

/// Absolute code unit a 31t instruction at `pc` points at
fn payload_target(insns: &[u16], pc: usize) -> Result<usize> {
    let offset = (u32::from(insns[pc + 1]) | (u32::from(insns[pc + 2]) << 16)) as i32;
    let target = pc as i64 + i64::from(offset);
    usize::try_from(target)
        .ok()
        .filter(|&t| t < insns.len())
        .ok_or_else(|| {
            Error::InvalidDex(format!(
                "payload offset {offset} at code unit {pc} leaves the method"
            ))
        })
}

/// Length in code units of the payload starting at `start`
pub fn payload_units(insns: &[u16], start: usize) -> Result<usize> {
    let unit = |i: usize| {
        insns.get(start + i).copied().ok_or_else(|| {
            Error::InvalidDex(format!("payload at code unit {start} is truncated"))
        })
    };

    let len = match unit(0)? {
        PACKED_SWITCH_SIGNATURE => 4 + usize::from(unit(1)?) * 2,
        SPARSE_SWITCH_SIGNATURE => 2 + usize::from(unit(1)?) * 4,
        FILL_ARRAY_DATA_SIGNATURE => {
            let width = usize::from(unit(1)?);
            let size = (u32::from(unit(2)?) | (u32::from(unit(3)?) << 16)) as usize;
            4 + (size * width + 1) / 2
        }
        other => {
            return Err(Error::InvalidDex(format!(
                "code unit {start} ({other:#06x}) is not a payload"
            )))
        }
    };

    if start + len > insns.len() {
        return Err(Error::InvalidDex(format!(
            "payload at code unit {start} is truncated"
        )));
    }
    Ok(len)
}
