//! The assembler front-end: instruction emission, labels, and
//! finalization.
//!
//! An [`Assembler`] collects raw instruction words and relaxable branches
//! against an architecture backend, then [`Assembler::finalize`] runs the
//! relaxation engine and produces an immutable [`FinalizedCode`] with
//! every branch resolved at its final size.
//!
//! Offsets recorded before finalization ("original" offsets) are
//! positions in the pre-relaxation buffer; the finalize step translates
//! them all into final-buffer positions in one pass.

use alloc::vec::Vec;

use crate::buffer::CodeBuffer;
use crate::error::RelaxError;
use crate::fixup::{BranchKind, BranchSize, Condition, Fixup, FixupId, Label, LabelState, ZeroCondition};
use crate::isa::InstructionSet;
use crate::relax::{adjust_fixups, emit_fixups, prepare_dependents, RelocationMap};

/// Sentinel terminating a raw-jump placeholder chain.
const RAW_CHAIN_END: u32 = u32::MAX;

/// A single-pass assembler with relaxable branches.
///
/// Branches to not-yet-bound labels are emitted at their short size and
/// recorded as fixups; [`finalize`](Assembler::finalize) grows any that
/// turn out to be out of range and rewrites the buffer accordingly.
#[derive(Debug)]
pub struct Assembler<I: InstructionSet> {
    isa: I,
    buffer: CodeBuffer,
    labels: Vec<LabelState>,
    fixups: Vec<Fixup>,
    /// Original-buffer offsets of every raw jump, in emission order.
    raw_jumps: Vec<u32>,
    base_address: u64,
}

impl<I: InstructionSet> Assembler<I> {
    /// Create an assembler that loads its code at address zero.
    #[must_use]
    pub fn new(isa: I) -> Self {
        Self::with_base_address(isa, 0)
    }

    /// Create an assembler whose output will be loaded at `base_address`.
    ///
    /// The base only matters for raw absolute jumps and for the label
    /// addresses reported by [`FinalizedCode`]; relaxable branches are
    /// PC-relative and do not depend on it.
    #[must_use]
    pub fn with_base_address(isa: I, base_address: u64) -> Self {
        Self {
            isa,
            buffer: CodeBuffer::new(),
            labels: Vec::new(),
            fixups: Vec::new(),
            raw_jumps: Vec::new(),
            base_address,
        }
    }

    /// The load address the assembler was created with.
    #[must_use]
    pub fn base_address(&self) -> u64 {
        self.base_address
    }

    /// Current emission position in the pre-relaxation buffer.
    ///
    /// Relaxation may move this position; use a bound label to refer to
    /// it across [`finalize`](Assembler::finalize).
    #[must_use]
    pub fn current_offset(&self) -> u32 {
        self.buffer.size()
    }

    /// Append one instruction word.
    pub fn emit_u32(&mut self, word: u32) {
        self.buffer.push_u32(word);
    }

    /// Append raw bytes verbatim.
    ///
    /// Byte counts that are not a multiple of the architecture's
    /// instruction size will misalign every subsequent branch.
    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Allocate a fresh, unbound label.
    pub fn new_label(&mut self) -> Label {
        let index = self.labels.len() as u32;
        self.labels.push(LabelState::Unused);
        Label::from_index(index)
    }

    /// Bind `label` to the current position, resolving every pending
    /// reference to it.
    ///
    /// # Errors
    ///
    /// [`RelaxError::BoundTwice`] if the label is already bound (the
    /// existing binding is left intact), and [`RelaxError::JumpOutOfRange`]
    /// if a pending raw jump cannot reach the binding position. On the
    /// latter the label stays unbound with all its pending references
    /// intact, so a later `finalize` reports it as
    /// [`RelaxError::UnboundLabel`] rather than emitting garbage.
    pub fn bind(&mut self, label: Label) -> Result<(), RelaxError> {
        let position = self.buffer.size();
        let (mut fixup_head, raw_head) = match self.labels[label.index() as usize] {
            LabelState::Bound(existing) => {
                return Err(RelaxError::BoundTwice {
                    label,
                    position: existing,
                });
            }
            LabelState::Unused => (None, None),
            LabelState::Linked { fixups, raw_jumps } => (fixups, raw_jumps),
        };

        // Raw-jump chains live in the placeholder words themselves:
        // each word holds the offset of the previous pending jump, and
        // patching a word with the real instruction consumes the link.
        // Collect the chain before patching so that a failure can
        // re-thread the links already consumed.
        let mut raw_locations = Vec::new();
        let mut cursor = raw_head;
        while let Some(location) = cursor {
            let next = self.buffer.load_u32(location);
            cursor = (next != RAW_CHAIN_END).then_some(next);
            raw_locations.push(location);
        }
        for (patched, &location) in raw_locations.iter().enumerate() {
            let result = self.isa.emit_raw_jump(
                &mut self.buffer,
                location,
                self.base_address + u64::from(location),
                self.base_address + u64::from(position),
            );
            if let Err(err) = result {
                for i in 0..patched {
                    self.buffer.store_u32(raw_locations[i], raw_locations[i + 1]);
                }
                return Err(err);
            }
        }

        self.labels[label.index() as usize] = LabelState::Bound(position);
        while let Some(id) = fixup_head {
            let fixup = &mut self.fixups[id.index()];
            fixup.target = Some(position);
            fixup_head = fixup.label_link.take();
        }
        Ok(())
    }

    fn emit_fixup(&mut self, label: Label, kind: BranchKind) {
        let location = self.buffer.size();
        let mut fixup = Fixup::new(location, kind, BranchSize::Short);
        let id = FixupId(self.fixups.len() as u32);
        match &mut self.labels[label.index() as usize] {
            LabelState::Bound(position) => fixup.target = Some(*position),
            LabelState::Linked { fixups, .. } => {
                fixup.label_link = fixups.replace(id);
            }
            state @ LabelState::Unused => {
                *state = LabelState::Linked {
                    fixups: Some(id),
                    raw_jumps: None,
                };
            }
        }
        self.fixups.push(fixup);
        self.buffer
            .push_zeros(self.isa.size_in_bytes(kind, BranchSize::Short));
    }

    /// Emit an unconditional branch to `label`.
    pub fn branch(&mut self, label: Label) {
        self.emit_fixup(label, BranchKind::Unconditional);
    }

    /// Emit a branch to `label` taken when `rs` and `rt` satisfy `cond`.
    pub fn branch_if(&mut self, cond: Condition, rs: u8, rt: u8, label: Label) {
        self.emit_fixup(label, BranchKind::Conditional { cond, rs, rt });
    }

    /// Emit a branch to `label` taken when `rs` compared against zero
    /// satisfies `cond`.
    pub fn branch_if_zero(&mut self, cond: ZeroCondition, rs: u8, label: Label) {
        self.emit_fixup(label, BranchKind::ConditionalZero { cond, rs });
    }

    /// Emit a raw absolute jump to `label`.
    ///
    /// Unlike relaxable branches, raw jumps have one fixed size and are
    /// patched with absolute addresses: once at bind time, and again
    /// after relaxation has settled the final layout.
    ///
    /// # Errors
    ///
    /// [`RelaxError::JumpOutOfRange`] when `label` is already bound at a
    /// position outside the jump's reachable region.
    pub fn jump(&mut self, label: Label) -> Result<(), RelaxError> {
        let location = self.buffer.size();
        self.buffer.push_zeros(self.isa.raw_jump_size());
        self.raw_jumps.push(location);
        match &mut self.labels[label.index() as usize] {
            LabelState::Bound(position) => {
                let position = *position;
                self.isa.emit_raw_jump(
                    &mut self.buffer,
                    location,
                    self.base_address + u64::from(location),
                    self.base_address + u64::from(position),
                )?;
            }
            LabelState::Linked { raw_jumps, .. } => {
                let previous = raw_jumps.replace(location).unwrap_or(RAW_CHAIN_END);
                self.buffer.store_u32(location, previous);
            }
            state @ LabelState::Unused => {
                *state = LabelState::Linked {
                    fixups: None,
                    raw_jumps: Some(location),
                };
                self.buffer.store_u32(location, RAW_CHAIN_END);
            }
        }
        Ok(())
    }

    /// Run relaxation and produce the final code.
    ///
    /// # Errors
    ///
    /// [`RelaxError::UnboundLabel`] if any referenced label was never
    /// bound, and [`RelaxError::JumpOutOfRange`] if relaxation pushed a
    /// raw jump's target out of its reachable region.
    pub fn finalize(mut self) -> Result<FinalizedCode, RelaxError> {
        for (index, state) in self.labels.iter().enumerate() {
            if matches!(state, LabelState::Linked { .. }) {
                return Err(RelaxError::UnboundLabel {
                    label: Label::from_index(index as u32),
                });
            }
        }

        // Raw-jump targets must be read back before the emitter moves
        // any bytes; the words were patched against original addresses.
        let raw_targets: Vec<u32> = self
            .raw_jumps
            .iter()
            .map(|&location| {
                let address = self.isa.raw_jump_target(
                    &self.buffer,
                    location,
                    self.base_address + u64::from(location),
                );
                (address - self.base_address) as u32
            })
            .collect();

        let dependents = prepare_dependents(&mut self.fixups);
        let total_delta = adjust_fixups(&self.isa, &mut self.fixups, &dependents);
        let final_locations = emit_fixups(&self.isa, &mut self.buffer, &self.fixups, total_delta);
        let relocation = RelocationMap::new(&self.isa, &self.fixups);

        for (&location, &target) in self.raw_jumps.iter().zip(&raw_targets) {
            let final_location = relocation.relocate(location);
            self.isa.emit_raw_jump(
                &mut self.buffer,
                final_location,
                self.base_address + u64::from(final_location),
                self.base_address + u64::from(relocation.relocate(target)),
            )?;
        }

        let labels = self
            .labels
            .iter()
            .map(|state| match state {
                LabelState::Bound(position) => {
                    Some(self.base_address + u64::from(relocation.relocate(*position)))
                }
                LabelState::Unused => None,
                LabelState::Linked { .. } => unreachable!("checked above"),
            })
            .collect();

        let branches = self
            .fixups
            .iter()
            .zip(&final_locations)
            .map(|(fixup, &location)| AppliedBranch {
                location,
                target: relocation.relocate(fixup.resolved_target()),
                kind: fixup.kind,
                size: fixup.size,
            })
            .collect();

        Ok(FinalizedCode {
            bytes: self.buffer.into_bytes(),
            labels,
            branches,
            base_address: self.base_address,
        })
    }
}

/// Record of one relaxed branch in the final buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AppliedBranch {
    /// Final-buffer offset of the branch's first instruction.
    pub location: u32,
    /// Final-buffer offset of the branch target.
    pub target: u32,
    /// Branch family.
    pub kind: BranchKind,
    /// The size class the branch settled at.
    pub size: BranchSize,
}

/// The output of [`Assembler::finalize`]: machine code with every branch
/// at its final size, plus the resolved label and branch tables.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FinalizedCode {
    bytes: Vec<u8>,
    labels: Vec<Option<u64>>,
    branches: Vec<AppliedBranch>,
    base_address: u64,
}

impl FinalizedCode {
    /// The assembled machine code.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the result, returning the machine code.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Size of the assembled code in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether any code was assembled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The load address the code was assembled for.
    #[must_use]
    pub fn base_address(&self) -> u64 {
        self.base_address
    }

    /// Final absolute address of every label, indexed by label index.
    /// `None` for labels that were allocated but never bound.
    #[must_use]
    pub fn labels(&self) -> &[Option<u64>] {
        &self.labels
    }

    /// Final absolute address of one label, or `None` if it was never
    /// bound.
    #[must_use]
    pub fn label_address(&self, label: Label) -> Option<u64> {
        self.labels.get(label.index() as usize).copied().flatten()
    }

    /// Every relaxed branch, in emission order.
    #[must_use]
    pub fn branches(&self) -> &[AppliedBranch] {
        &self.branches
    }
}
