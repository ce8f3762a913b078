//! MIPS32-flavoured branch encodings.
//!
//! Branch displacements are PC-relative to the instruction *after* the
//! branch (the classic delay-slot anchoring, bias 4) and are counted in
//! words, giving the 16-bit short forms a byte range of ±128 KiB.
//!
//! ## Encodings
//!
//! ```text
//! short unconditional   b      off16      = beq  $zero, $zero, off16
//! short conditional     beq/bne rs, rt, off16
//! short compare-to-zero bltz/bgez (REGIMM), blez/bgtz, beqz/bnez
//!
//! long unconditional (8 B):
//!     auipc  $at, hi16        ; $at = pc + (hi16 << 16)
//!     jic    $at, lo16        ; jump to $at + sext(lo16)
//! long conditional / compare-to-zero (12 B):
//!     b<!cond> ..., +8        ; inverted guard over the pair
//!     auipc  $at, hi16
//!     jic    $at, lo16
//! ```
//!
//! The pair must use `auipc` (PCREL minor 0b11110), which adds to the
//! full PC; `aluipc` clears the low 16 PC bits of the result and would
//! misplace any pair not sitting on a 64 KiB boundary.
//!
//! The `auipc`/`jic` pair reaches any 32-bit displacement, so one
//! promotion per branch always suffices. Raw jumps use the region-absolute
//! `j target26` (256 MiB segment of the delay-slot PC).
//!
//! The instruction stream is expected to stay 4-byte aligned; interleaved
//! data of non-word size will misalign subsequent branches.

use crate::buffer::CodeBuffer;
use crate::error::RelaxError;
use crate::fixup::{BranchKind, BranchSize, Condition, ZeroCondition};
use crate::isa::InstructionSet;

// ── Opcodes ─────────────────────────────────────────────────────────────

const OP_REGIMM: u32 = 0b000001;
const OP_J: u32 = 0b000010;
const OP_BEQ: u32 = 0b000100;
const OP_BNE: u32 = 0b000101;
const OP_BLEZ: u32 = 0b000110;
const OP_BGTZ: u32 = 0b000111;
const OP_JIC: u32 = 0b110110;
const OP_PCREL: u32 = 0b111011;

const RT_BLTZ: u32 = 0b00000;
const RT_BGEZ: u32 = 0b00001;
const RS_AUIPC: u32 = 0b11110;

/// The assembler temporary, reserved for long-branch sequences.
pub const AT: u8 = 1;

/// Byte range reachable by a 16-bit word-counted short offset.
const SHORT_MIN: i32 = -(1 << 17);
const SHORT_MAX: i32 = (1 << 17) - 4;

/// 256 MiB region mask for `j`.
const REGION_MASK: u64 = !0x0FFF_FFFF;

// ── Word builders ───────────────────────────────────────────────────────

fn i_type(op: u32, rs: u32, rt: u32, imm16: u32) -> u32 {
    (op << 26) | (rs << 21) | (rt << 16) | (imm16 & 0xFFFF)
}

fn auipc(rt: u32, imm16: u32) -> u32 {
    (OP_PCREL << 26) | (rt << 21) | (RS_AUIPC << 16) | (imm16 & 0xFFFF)
}

fn jic(rt: u32, imm16: u32) -> u32 {
    (OP_JIC << 26) | (rt << 16) | (imm16 & 0xFFFF)
}

/// Split a 32-bit PC-relative offset into the `auipc`/`jic` pair
/// immediates. `hi` is rounded so that the sign-extended `lo` composes
/// back exactly.
fn hi_lo_split(offset: i32) -> (u32, u32) {
    let hi = (((i64::from(offset) + 0x8000) >> 16) as u32) & 0xFFFF;
    let lo = (offset as u32).wrapping_sub(hi << 16) & 0xFFFF;
    debug_assert_eq!(
        ((hi << 16) as i32).wrapping_add(i32::from(lo as u16 as i16)),
        offset,
        "hi/lo split must compose back to the offset"
    );
    (hi, lo)
}

fn sext16(imm16: u32) -> i32 {
    i32::from(imm16 as u16 as i16)
}

/// Encode one short branch word for `kind` with a pre-shifted word
/// immediate.
fn short_word(kind: BranchKind, imm16: u32) -> u32 {
    match kind {
        BranchKind::Unconditional => i_type(OP_BEQ, 0, 0, imm16),
        BranchKind::Conditional { cond, rs, rt } => {
            let op = match cond {
                Condition::Eq => OP_BEQ,
                Condition::Ne => OP_BNE,
            };
            i_type(op, u32::from(rs), u32::from(rt), imm16)
        }
        BranchKind::ConditionalZero { cond, rs } => {
            let rs = u32::from(rs);
            match cond {
                ZeroCondition::Ltz => i_type(OP_REGIMM, rs, RT_BLTZ, imm16),
                ZeroCondition::Gez => i_type(OP_REGIMM, rs, RT_BGEZ, imm16),
                ZeroCondition::Lez => i_type(OP_BLEZ, rs, 0, imm16),
                ZeroCondition::Gtz => i_type(OP_BGTZ, rs, 0, imm16),
                ZeroCondition::Eqz => i_type(OP_BEQ, rs, 0, imm16),
                ZeroCondition::Nez => i_type(OP_BNE, rs, 0, imm16),
            }
        }
    }
}

/// The same branch with its condition inverted, for guarding long forms.
fn inverted(kind: BranchKind) -> BranchKind {
    match kind {
        BranchKind::Unconditional => kind,
        BranchKind::Conditional { cond, rs, rt } => BranchKind::Conditional {
            cond: cond.inverted(),
            rs,
            rt,
        },
        BranchKind::ConditionalZero { cond, rs } => BranchKind::ConditionalZero {
            cond: cond.inverted(),
            rs,
        },
    }
}

// ── The backend ─────────────────────────────────────────────────────────

/// MIPS32-flavoured [`InstructionSet`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Mips32;

impl InstructionSet for Mips32 {
    fn size_in_bytes(&self, kind: BranchKind, size: BranchSize) -> u32 {
        match (size, kind) {
            (BranchSize::Short, _) => 4,
            (BranchSize::Long, BranchKind::Unconditional) => 8,
            (BranchSize::Long, _) => 12,
        }
    }

    fn pc_offset(&self, kind: BranchKind, size: BranchSize) -> i32 {
        match (size, kind) {
            // Delay-slot anchoring: short offsets are relative to the
            // instruction after the branch.
            (BranchSize::Short, _) => 4,
            // The auipc is the first instruction of the sequence.
            (BranchSize::Long, BranchKind::Unconditional) => 0,
            // The inverted guard branch precedes the auipc.
            (BranchSize::Long, _) => 4,
        }
    }

    fn fits(&self, _kind: BranchKind, size: BranchSize, offset: i32) -> bool {
        match size {
            BranchSize::Short => offset % 4 == 0 && (SHORT_MIN..=SHORT_MAX).contains(&offset),
            BranchSize::Long => true,
        }
    }

    fn emit_branch(
        &self,
        buffer: &mut CodeBuffer,
        location: u32,
        kind: BranchKind,
        size: BranchSize,
        offset: i32,
    ) {
        debug_assert_eq!(location % 4, 0, "misaligned branch at {:#x}", location);
        match size {
            BranchSize::Short => {
                assert!(
                    self.fits(kind, size, offset),
                    "short branch at {:#x} cannot encode offset {}",
                    location,
                    offset
                );
                let imm16 = ((offset >> 2) as u32) & 0xFFFF;
                buffer.store_u32(location, short_word(kind, imm16));
            }
            BranchSize::Long => {
                let (hi, lo) = hi_lo_split(offset);
                let pair_at = match kind {
                    BranchKind::Unconditional => location,
                    _ => {
                        // Guard skips the 8-byte pair: +8 from the guard's
                        // own delay-slot PC, i.e. a word immediate of 2.
                        buffer.store_u32(location, short_word(inverted(kind), 2));
                        location + 4
                    }
                };
                buffer.store_u32(pair_at, auipc(u32::from(AT), hi));
                buffer.store_u32(pair_at + 4, jic(u32::from(AT), lo));
            }
        }
    }

    fn raw_jump_size(&self) -> u32 {
        4
    }

    fn emit_raw_jump(
        &self,
        buffer: &mut CodeBuffer,
        location: u32,
        pc_address: u64,
        target_address: u64,
    ) -> Result<(), RelaxError> {
        if (pc_address + 4) & REGION_MASK != target_address & REGION_MASK {
            return Err(RelaxError::JumpOutOfRange {
                location,
                address: target_address,
            });
        }
        debug_assert_eq!(target_address % 4, 0, "misaligned jump target");
        let target26 = ((target_address >> 2) as u32) & 0x03FF_FFFF;
        buffer.store_u32(location, (OP_J << 26) | target26);
        Ok(())
    }

    fn raw_jump_target(&self, buffer: &CodeBuffer, location: u32, pc_address: u64) -> u64 {
        let word = buffer.load_u32(location);
        debug_assert_eq!(word >> 26, OP_J, "not a raw jump at {:#x}", location);
        ((pc_address + 4) & REGION_MASK) | (u64::from(word & 0x03FF_FFFF) << 2)
    }
}

// ── Decode helpers ──────────────────────────────────────────────────────

fn load_word(code: &[u8], offset: u32) -> u32 {
    let offset = offset as usize;
    u32::from_le_bytes([
        code[offset],
        code[offset + 1],
        code[offset + 2],
        code[offset + 3],
    ])
}

/// Recompute the target byte offset of a finalized branch from its
/// emitted bytes. Used by tests and disassembly-style tooling to verify
/// that the relaxation engine laid the branch out correctly.
#[must_use]
pub fn decode_branch_target(code: &[u8], location: u32, kind: BranchKind, size: BranchSize) -> u32 {
    match size {
        BranchSize::Short => {
            let word = load_word(code, location);
            let off = sext16(word & 0xFFFF) << 2;
            (i64::from(location) + 4 + i64::from(off)) as u32
        }
        BranchSize::Long => {
            let pair_at = match kind {
                BranchKind::Unconditional => location,
                _ => location + 4,
            };
            let hi = load_word(code, pair_at) & 0xFFFF;
            let lo = load_word(code, pair_at + 4) & 0xFFFF;
            let off = ((hi << 16) as i32).wrapping_add(sext16(lo));
            (i64::from(pair_at) + i64::from(off)) as u32
        }
    }
}
