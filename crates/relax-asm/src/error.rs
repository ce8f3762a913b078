//! Error type for the caller-misuse surface.
//!
//! The relaxation engine itself has exactly one failure class — internal
//! invariant violation — and reports it by panicking (see the crate docs).
//! [`RelaxError`] covers the conditions a library must still report in
//! release builds when the *caller* holds up its side of the contract
//! incorrectly: rebinding a label, finalizing with a dangling forward
//! reference, or placing an absolute jump outside its reachable region.

use core::fmt;

use crate::fixup::Label;

/// Assembly error raised by `bind`/`jump`/`finalize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RelaxError {
    /// A label was bound a second time. Binding is set-once.
    BoundTwice {
        /// The offending label.
        label: Label,
        /// The position of the first (and only valid) binding.
        position: u32,
    },

    /// `finalize` was called while a referenced label was still unbound.
    UnboundLabel {
        /// The label with dangling forward references.
        label: Label,
    },

    /// An absolute jump's target lies outside the region reachable from
    /// the jump instruction (a base-address/layout problem, not a defect
    /// in the size-class table).
    JumpOutOfRange {
        /// Buffer offset of the jump instruction.
        location: u32,
        /// The unreachable absolute target address.
        address: u64,
    },
}

impl fmt::Display for RelaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelaxError::BoundTwice { label, position } => {
                write!(
                    f,
                    "label {} already bound at offset {:#x}",
                    label.index(),
                    position
                )
            }
            RelaxError::UnboundLabel { label } => {
                write!(
                    f,
                    "label {} has pending references but was never bound",
                    label.index()
                )
            }
            RelaxError::JumpOutOfRange { location, address } => {
                write!(
                    f,
                    "jump at offset {:#x} cannot reach absolute address {:#x}",
                    location, address
                )
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for RelaxError {}
