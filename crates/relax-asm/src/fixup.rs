//! Labels, branch fixups, and the offset arithmetic between them.
//!
//! A [`Fixup`] is the deferred-encoding record for one branch whose final
//! size and target are not known at emission time. Fixups are created in
//! emission order, so the fixup table is always sorted by `location`, and
//! their size class only ever grows — the two facts the relaxation engine
//! in [`crate::relax`] relies on for termination.

use core::fmt;

use crate::isa::InstructionSet;

/// Opaque handle to a label owned by an assembler.
///
/// Handles are plain indices; they are only meaningful to the assembler
/// that created them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Label(u32);

impl Label {
    pub(crate) fn from_index(index: u32) -> Self {
        Self(index)
    }

    /// The label's index in its assembler's label table.
    #[must_use]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Internal label state.
///
/// A label starts `Unused`, collects pending references while unbound,
/// and is `Bound` exactly once. Forward references through the fixup
/// table are chained through [`Fixup::label_link`]; forward references
/// from raw jumps are chained through the placeholder words themselves
/// (see [`crate::assembler::Assembler::jump`]).
#[derive(Debug, Clone)]
pub(crate) enum LabelState {
    /// Never referenced, never bound.
    Unused,
    /// Referenced before binding; heads of the two pending chains.
    Linked {
        /// Most recently emitted fixup referencing this label.
        fixups: Option<FixupId>,
        /// Buffer offset of the most recently emitted raw-jump placeholder.
        raw_jumps: Option<u32>,
    },
    /// Bound at this original-buffer byte offset. Set once.
    Bound(u32),
}

/// Opaque index of a [`Fixup`] in its assembler's fixup table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FixupId(pub(crate) u32);

impl FixupId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Register-comparison condition for two-register conditional branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Condition {
    /// Branch if `rs == rt`.
    Eq,
    /// Branch if `rs != rt`.
    Ne,
}

impl Condition {
    /// The opposite condition, used to guard long encodings.
    #[must_use]
    pub fn inverted(self) -> Self {
        match self {
            Condition::Eq => Condition::Ne,
            Condition::Ne => Condition::Eq,
        }
    }
}

/// Compare-to-zero condition for single-register conditional branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ZeroCondition {
    /// Branch if `rs < 0`.
    Ltz,
    /// Branch if `rs >= 0`.
    Gez,
    /// Branch if `rs <= 0`.
    Lez,
    /// Branch if `rs > 0`.
    Gtz,
    /// Branch if `rs == 0`.
    Eqz,
    /// Branch if `rs != 0`.
    Nez,
}

impl ZeroCondition {
    /// The opposite condition, used to guard long encodings.
    #[must_use]
    pub fn inverted(self) -> Self {
        match self {
            ZeroCondition::Ltz => ZeroCondition::Gez,
            ZeroCondition::Gez => ZeroCondition::Ltz,
            ZeroCondition::Lez => ZeroCondition::Gtz,
            ZeroCondition::Gtz => ZeroCondition::Lez,
            ZeroCondition::Eqz => ZeroCondition::Nez,
            ZeroCondition::Nez => ZeroCondition::Eqz,
        }
    }
}

/// The semantic family of a relaxable branch.
///
/// Each kind has exactly two size classes: a short single-instruction
/// form and a long form whose range covers any 32-bit displacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BranchKind {
    /// Always taken.
    Unconditional,
    /// Taken when `rs` and `rt` satisfy `cond`.
    Conditional {
        /// The register comparison.
        cond: Condition,
        /// Left-hand source register.
        rs: u8,
        /// Right-hand source register.
        rt: u8,
    },
    /// Taken when `rs` compared against zero satisfies `cond`.
    ConditionalZero {
        /// The zero comparison.
        cond: ZeroCondition,
        /// Source register.
        rs: u8,
    },
}

/// Encoding-size class of a branch. Monotonically non-decreasing during
/// relaxation: `Short < Long`, and `Long` must represent any 32-bit
/// displacement so a single promotion always suffices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BranchSize {
    /// Single-instruction short-offset encoding.
    Short,
    /// Multi-instruction sequence covering any 32-bit offset.
    Long,
}

/// Deferred-encoding record for one branch instruction.
#[derive(Debug, Clone)]
pub(crate) struct Fixup {
    /// Byte offset of the first instruction in the original,
    /// pre-relaxation buffer. Immutable once emitted.
    pub(crate) location: u32,
    /// Original-buffer byte offset of the target; `None` until the
    /// referenced label is bound. Set at most once.
    pub(crate) target: Option<u32>,
    /// Branch family.
    pub(crate) kind: BranchKind,
    /// Current size class; grows monotonically.
    pub(crate) size: BranchSize,
    /// Size class reserved at emission time.
    pub(crate) original_size: BranchSize,
    /// Cumulative byte growth injected between this fixup and its target
    /// by other fixups' promotions.
    pub(crate) adjustment: u32,
    /// Next fixup in the owning label's pending chain, while unbound.
    pub(crate) label_link: Option<FixupId>,
    /// Start of this fixup's slice in the shared dependents array.
    pub(crate) dependents_start: u32,
    /// End of this fixup's slice in the shared dependents array.
    pub(crate) dependents_end: u32,
}

impl Fixup {
    pub(crate) fn new(location: u32, kind: BranchKind, size: BranchSize) -> Self {
        Self {
            location,
            target: None,
            kind,
            size,
            original_size: size,
            adjustment: 0,
            label_link: None,
            dependents_start: 0,
            dependents_end: 0,
        }
    }

    /// The resolved target offset. Panics if the label was never bound —
    /// finalization checks bindings up front, so a miss here is an
    /// internal bug.
    pub(crate) fn resolved_target(&self) -> u32 {
        match self.target {
            Some(target) => target,
            None => panic!(
                "branch at offset {:#x} has no resolved target",
                self.location
            ),
        }
    }

    /// The branch displacement under the current size class.
    ///
    /// This is the only place offset arithmetic happens. The displacement
    /// is relative to the architecture's PC origin for this kind/size
    /// (see [`InstructionSet::pc_offset`]) and accounts for all code
    /// growth between the branch and its target:
    ///
    /// - forward: other fixups between location and target push the
    ///   target away, and so does this fixup's own growth (its bytes sit
    ///   entirely before the target);
    /// - backward: only the fixups between the target and the location
    ///   matter — this fixup grows away from its own start, which leaves
    ///   the backward distance unchanged.
    pub(crate) fn offset_to_target<I: InstructionSet>(&self, isa: &I) -> i32 {
        let target = self.resolved_target();
        let mut diff = i64::from(target) - i64::from(self.location);
        if target > self.location {
            diff += i64::from(self.adjustment);
            diff += i64::from(isa.size_in_bytes(self.kind, self.size))
                - i64::from(isa.size_in_bytes(self.kind, self.original_size));
        } else {
            diff -= i64::from(self.adjustment);
        }
        diff -= i64::from(isa.pc_offset(self.kind, self.size));
        match i32::try_from(diff) {
            Ok(offset) => offset,
            Err(_) => panic!(
                "branch displacement {} at offset {:#x} does not fit 32 bits",
                diff, self.location
            ),
        }
    }
}
