//! The relaxation engine: dependency index, fixed-point sizing, final
//! layout.
//!
//! Sizing branches is circular: a branch's required encoding depends on
//! its byte distance to the target, which depends on the encodings chosen
//! for the branches in between. The engine resolves the circle with a
//! worklist that only ever *grows* encodings — each fixup has finitely
//! many size classes and the largest covers any 32-bit displacement, so
//! total promotions are bounded by the fixup count and the fixed point is
//! reached regardless of processing order.
//!
//! The dependency index is built exactly once, after all labels are
//! bound: the *set* of fixups lying between two buffer positions never
//! changes afterwards, only their cumulative byte cost does, and that
//! cost is carried per-fixup in `adjustment`.

use alloc::collections::VecDeque;
use alloc::vec;
use alloc::vec::Vec;
use core::ops::Range;

use crate::buffer::CodeBuffer;
use crate::fixup::{BranchSize, Fixup, FixupId};
use crate::isa::InstructionSet;

/// Index range (into the sorted fixup table) of the fixups whose
/// displacement is affected when `fixups[j]` changes size: those whose
/// span contains `fixups[j].location`.
///
/// Inverted, for the builder's scan direction: the fixups inside
/// `fixups[j]`'s own span are exactly the ones that must list `j` as a
/// dependent. A forward span is open on both ends — a fixup sitting
/// exactly at the target starts at the target, so growing `j` moves it
/// and the target together. A backward span is closed at the target for
/// the same reason: a fixup whose first byte *is* the target still grows
/// into the distance back to `j`.
fn span_of(j: usize, fixups: &[Fixup]) -> Range<usize> {
    let fixup = &fixups[j];
    let target = fixup.resolved_target();
    if target > fixup.location {
        let hi = fixups.partition_point(|g| g.location < target);
        j + 1..hi
    } else {
        let lo = fixups.partition_point(|g| g.location < target);
        lo..j
    }
}

/// Build the dependency index: for every fixup, the slice of fixups
/// whose growth invalidates its displacement.
///
/// Two passes over the location-sorted table: the first counts each
/// fixup's dependents, the second fills per-fixup contiguous slices of
/// one shared array. Built once, consulted (never rebuilt) during
/// relaxation.
pub(crate) fn prepare_dependents(fixups: &mut [Fixup]) -> Vec<FixupId> {
    let mut counts = vec![0u32; fixups.len()];
    for j in 0..fixups.len() {
        for i in span_of(j, fixups) {
            counts[i] += 1;
        }
    }

    let total: u32 = counts.iter().sum();
    let mut start = 0u32;
    for (fixup, &count) in fixups.iter_mut().zip(&counts) {
        fixup.dependents_start = start;
        // `dependents_end` doubles as the fill cursor below.
        fixup.dependents_end = start;
        start += count;
    }

    let mut dependents = vec![FixupId(0); total as usize];
    for j in 0..fixups.len() {
        let span = span_of(j, fixups);
        for i in span {
            let slot = fixups[i].dependents_end;
            fixups[i].dependents_end += 1;
            dependents[slot as usize] = FixupId(j as u32);
        }
    }
    dependents
}

/// Grow one fixup's size class if its current displacement no longer
/// fits. Returns the byte delta (0 when nothing changed).
fn adjust_fixup_if_needed<I: InstructionSet>(isa: &I, fixup: &mut Fixup) -> u32 {
    let offset = fixup.offset_to_target(isa);
    match fixup.size {
        BranchSize::Short if !isa.fits(fixup.kind, BranchSize::Short, offset) => {
            let old_bytes = isa.size_in_bytes(fixup.kind, BranchSize::Short);
            fixup.size = BranchSize::Long;
            let new_bytes = isa.size_in_bytes(fixup.kind, BranchSize::Long);
            // The long class is architected to hold any 32-bit offset;
            // failing here means the size-class table is defective.
            let grown = fixup.offset_to_target(isa);
            assert!(
                isa.fits(fixup.kind, BranchSize::Long, grown),
                "offset {} at {:#x} does not fit the long encoding",
                grown,
                fixup.location
            );
            new_bytes - old_bytes
        }
        BranchSize::Short => 0,
        BranchSize::Long => {
            assert!(
                isa.fits(fixup.kind, BranchSize::Long, offset),
                "offset {} at {:#x} does not fit the long encoding",
                offset,
                fixup.location
            );
            0
        }
    }
}

/// Run the sizing fixed point. Returns the total byte growth.
///
/// Every fixup is examined at least once, in location order; a promotion
/// propagates its delta into the dependents' `adjustment` and re-enqueues
/// any dependent not already pending. Reprocessing converges to the same
/// sizes in any order because promotion is monotonic and displacements
/// are recomputed from the cumulative adjustment, never from a snapshot.
pub(crate) fn adjust_fixups<I: InstructionSet>(
    isa: &I,
    fixups: &mut [Fixup],
    dependents: &[FixupId],
) -> u32 {
    let mut worklist: VecDeque<u32> = (0..fixups.len() as u32).collect();
    let mut pending = vec![true; fixups.len()];
    let mut total_delta = 0u32;

    while let Some(id) = worklist.pop_front() {
        pending[id as usize] = false;
        let delta = adjust_fixup_if_needed(isa, &mut fixups[id as usize]);
        if delta == 0 {
            continue;
        }
        total_delta += delta;

        let range =
            fixups[id as usize].dependents_start as usize..fixups[id as usize].dependents_end as usize;
        for &dep in &dependents[range] {
            fixups[dep.index()].adjustment += delta;
            if !pending[dep.index()] {
                pending[dep.index()] = true;
                worklist.push_back(dep.0);
            }
        }
    }
    total_delta
}

/// Lay out the final buffer: walk fixups in reverse location order with
/// one cursor into the original bytes and one into the final bytes,
/// moving each untouched gap as a single block and writing resolved
/// branch bytes just before it. Back-to-front order guarantees no byte
/// range is overwritten before it has been read.
///
/// Returns each fixup's final location, index-aligned with `fixups`.
pub(crate) fn emit_fixups<I: InstructionSet>(
    isa: &I,
    buffer: &mut CodeBuffer,
    fixups: &[Fixup],
    total_delta: u32,
) -> Vec<u32> {
    let old_size = buffer.size();
    buffer.resize(old_size + total_delta);

    let mut final_locations = vec![0u32; fixups.len()];
    let mut src_end = old_size;
    let mut dst_end = old_size + total_delta;

    for (i, fixup) in fixups.iter().enumerate().rev() {
        let old_bytes = isa.size_in_bytes(fixup.kind, fixup.original_size);
        let new_bytes = isa.size_in_bytes(fixup.kind, fixup.size);

        let gap_src = fixup.location + old_bytes;
        let gap_len = src_end - gap_src;
        let gap_dst = dst_end - gap_len;
        buffer.move_bytes(gap_dst, gap_src, gap_len);

        let final_location = gap_dst - new_bytes;
        isa.emit_branch(
            buffer,
            final_location,
            fixup.kind,
            fixup.size,
            fixup.offset_to_target(isa),
        );
        final_locations[i] = final_location;
        src_end = fixup.location;
        dst_end = final_location;
    }
    debug_assert_eq!(
        src_end, dst_end,
        "all relaxation growth must be accounted for by fixup deltas"
    );
    final_locations
}

/// Maps original-buffer offsets to final-buffer offsets after
/// relaxation: each offset shifts by the summed growth of all fixups
/// located strictly before it.
pub(crate) struct RelocationMap {
    locations: Vec<u32>,
    // prefix_deltas[i] = summed growth of fixups[..i]; one extra entry
    // holds the total.
    prefix_deltas: Vec<u32>,
}

impl RelocationMap {
    pub(crate) fn new<I: InstructionSet>(isa: &I, fixups: &[Fixup]) -> Self {
        let mut locations = Vec::with_capacity(fixups.len());
        let mut prefix_deltas = Vec::with_capacity(fixups.len() + 1);
        let mut total = 0u32;
        for fixup in fixups {
            locations.push(fixup.location);
            prefix_deltas.push(total);
            total += isa.size_in_bytes(fixup.kind, fixup.size)
                - isa.size_in_bytes(fixup.kind, fixup.original_size);
        }
        prefix_deltas.push(total);
        Self {
            locations,
            prefix_deltas,
        }
    }

    /// Final-buffer offset of an original-buffer offset. A position at a
    /// fixup's first byte does not move with that fixup's own growth.
    pub(crate) fn relocate(&self, offset: u32) -> u32 {
        let idx = self.locations.partition_point(|&loc| loc < offset);
        offset + self.prefix_deltas[idx]
    }
}
