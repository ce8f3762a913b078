//! # relax-asm — Branch-Relaxing Runtime Assembler
//!
//! `relax-asm` is a pure Rust, zero-C-dependency runtime assembler core
//! built around *branch relaxation*: every branch is emitted at its short
//! encoding, and a fixed-point pass at finalization grows exactly the
//! branches whose targets turn out to be out of range, shifting the rest
//! of the code accordingly.
//!
//! ## Quick Start
//!
//! ```rust
//! use relax_asm::{Assembler, BranchSize, Mips32};
//!
//! let mut asm = Assembler::new(Mips32);
//! let top = asm.new_label();
//! asm.bind(top).unwrap();
//! asm.emit_u32(0); // nop
//! asm.branch(top);
//! let code = asm.finalize().unwrap();
//!
//! assert_eq!(code.len(), 8);
//! assert_eq!(code.branches()[0].size, BranchSize::Short);
//! assert_eq!(code.label_address(top), Some(0));
//! ```
//!
//! ## Features
//!
//! - **Pure Rust** — no C/C++ FFI, no LLVM, no system assembler at runtime.
//! - **Worst-case-linear relaxation** — a dependency index lets the
//!   fixed-point pass re-examine only the branches a promotion actually
//!   affects, instead of rescanning the whole program per iteration.
//! - **Single rewrite** — after sizes settle, the buffer is laid out in
//!   one reverse-order pass that moves every untouched gap exactly once.
//! - **`no_std` + `alloc`** — embeddable in firmware, kernels, WASM.
//! - **Pluggable backends** — architecture encodings live behind the
//!   [`InstructionSet`] trait (MIPS32-flavoured backend included,
//!   feature-gated).
//!
//! ## Error policy
//!
//! Caller misuse (rebinding a label, finalizing with dangling forward
//! references, unreachable absolute jumps) is reported through
//! [`RelaxError`]. Violations of the engine's internal invariants panic:
//! they indicate a bug in this crate or in a backend, not in the caller.

#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]
// ── Pedantic lint policy ─────────────────────────────────────────────────
// An assembler intentionally performs many narrowing / sign-changing
// casts between integer widths and uses dense hex literals without
// separators. The lints below are expected and acceptable in this
// context.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_lossless,
    clippy::cast_possible_wrap,
    clippy::unreadable_literal,
    clippy::match_same_arms,
    clippy::must_use_candidate,
    clippy::module_name_repetitions,
    clippy::uninlined_format_args,
    clippy::doc_markdown,
    clippy::similar_names,
    clippy::missing_errors_doc
)]

extern crate alloc;

/// Public assembler API — emission, labels, and `FinalizedCode`.
pub mod assembler;
/// Growable little-endian code buffer.
pub mod buffer;
/// Error type for caller-misuse conditions.
pub mod error;
/// Labels, branch fixups, and displacement arithmetic.
pub mod fixup;
/// The [`InstructionSet`] architecture seam.
pub mod isa;
/// MIPS32-flavoured branch encodings.
#[cfg(feature = "mips")]
pub mod mips;
mod relax;

// Re-exports
pub use assembler::{AppliedBranch, Assembler, FinalizedCode};
pub use buffer::CodeBuffer;
pub use error::RelaxError;
pub use fixup::{BranchKind, BranchSize, Condition, Label, ZeroCondition};
pub use isa::InstructionSet;
#[cfg(feature = "mips")]
pub use mips::Mips32;
