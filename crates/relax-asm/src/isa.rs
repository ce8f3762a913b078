//! Architecture seam for the generic relaxation engine.
//!
//! The engine itself knows nothing about instruction encodings: every
//! architecture-specific fact — size tables, PC origins, reachable
//! ranges, the actual bit patterns — comes through [`InstructionSet`].
//! The constants behind `pc_offset` are ISA folklore (delay-slot
//! anchoring, guard instructions before a PC-relative pair) and must be
//! checked against the target manual, not inferred from another backend.

use crate::buffer::CodeBuffer;
use crate::error::RelaxError;
use crate::fixup::{BranchKind, BranchSize};

/// Everything the relaxation engine needs to know about one target
/// architecture's branch encodings.
pub trait InstructionSet {
    /// Byte size of the encoding for `kind` at size class `size`.
    fn size_in_bytes(&self, kind: BranchKind, size: BranchSize) -> u32;

    /// Byte distance from the fixup's first instruction to the PC value
    /// its displacement is relative to.
    ///
    /// For short forms this is the architecture PC bias; for long forms
    /// it additionally covers the instructions preceding the PC-relative
    /// use within the sequence.
    fn pc_offset(&self, kind: BranchKind, size: BranchSize) -> i32;

    /// Whether `offset` is representable by the encoding for `kind` at
    /// `size`. Must return `true` for every 32-bit offset when `size` is
    /// [`BranchSize::Long`] — the long class is the engine's guarantee
    /// of forward progress.
    fn fits(&self, kind: BranchKind, size: BranchSize, offset: i32) -> bool;

    /// Write the resolved instruction bytes for a branch at `location`.
    /// `offset` is the displacement produced by the engine, already
    /// relative to this kind/size's PC origin.
    fn emit_branch(
        &self,
        buffer: &mut CodeBuffer,
        location: u32,
        kind: BranchKind,
        size: BranchSize,
        offset: i32,
    );

    /// Byte size of a raw absolute jump instruction.
    fn raw_jump_size(&self) -> u32;

    /// Patch a raw absolute jump at `location` (whose own address is
    /// `pc_address`) to reach `target_address`.
    ///
    /// # Errors
    ///
    /// [`RelaxError::JumpOutOfRange`] when the target lies outside the
    /// region reachable from `pc_address`.
    fn emit_raw_jump(
        &self,
        buffer: &mut CodeBuffer,
        location: u32,
        pc_address: u64,
        target_address: u64,
    ) -> Result<(), RelaxError>;

    /// Decode the absolute target of a previously patched raw jump at
    /// `location`, given the jump's own address `pc_address`.
    fn raw_jump_target(&self, buffer: &CodeBuffer, location: u32, pc_address: u64) -> u64;
}
