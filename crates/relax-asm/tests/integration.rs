//! End-to-end assembly scenarios against the MIPS32-flavoured backend.

#![cfg(feature = "mips")]

use relax_asm::mips::decode_branch_target;
use relax_asm::{
    Assembler, BranchKind, BranchSize, Condition, Mips32, RelaxError, ZeroCondition,
};

fn emit_nops(asm: &mut Assembler<Mips32>, bytes: u32) {
    assert_eq!(bytes % 4, 0);
    for _ in 0..bytes / 4 {
        asm.emit_u32(0);
    }
}

/// Check that every recorded branch decodes back to its recorded target.
fn assert_branches_decode(code: &relax_asm::FinalizedCode) {
    for branch in code.branches() {
        assert_eq!(
            decode_branch_target(code.bytes(), branch.location, branch.kind, branch.size),
            branch.target,
            "branch at final offset {:#x}",
            branch.location
        );
    }
}

#[test]
fn near_forward_branch_stays_short() {
    let mut asm = Assembler::new(Mips32);
    let out = asm.new_label();
    asm.branch(out);
    emit_nops(&mut asm, 48);
    asm.bind(out).unwrap();
    let code = asm.finalize().unwrap();
    assert_eq!(code.len(), 52);
    assert_eq!(code.branches()[0].size, BranchSize::Short);
    assert_branches_decode(&code);
}

#[test]
fn far_forward_branch_promotes_to_long() {
    let mut asm = Assembler::new(Mips32);
    let out = asm.new_label();
    asm.branch(out);
    emit_nops(&mut asm, 200_000);
    asm.bind(out).unwrap();
    let code = asm.finalize().unwrap();
    let branch = code.branches()[0];
    assert_eq!(branch.size, BranchSize::Long);
    assert_eq!(code.len(), 200_008);
    assert_eq!(branch.target, 200_008);
    assert_branches_decode(&code);
}

#[test]
fn far_backward_branch_promotes_to_long() {
    let mut asm = Assembler::new(Mips32);
    let top = asm.new_label();
    asm.bind(top).unwrap();
    emit_nops(&mut asm, 200_000);
    asm.branch(top);
    let code = asm.finalize().unwrap();
    let branch = code.branches()[0];
    assert_eq!(branch.size, BranchSize::Long);
    assert_eq!(branch.target, 0);
    assert_branches_decode(&code);
}

#[test]
fn short_range_boundary_is_exact() {
    // Forward distance from the delay-slot PC: target - (location + 4).
    // 4 + 0x1FFFC nops puts the target exactly at the +128 KiB edge.
    let mut asm = Assembler::new(Mips32);
    let out = asm.new_label();
    asm.branch(out);
    emit_nops(&mut asm, (1 << 17) - 4);
    asm.bind(out).unwrap();
    let code = asm.finalize().unwrap();
    assert_eq!(code.branches()[0].size, BranchSize::Short);
    assert_branches_decode(&code);

    // One word further is out of range.
    let mut asm = Assembler::new(Mips32);
    let out = asm.new_label();
    asm.branch(out);
    emit_nops(&mut asm, 1 << 17);
    asm.bind(out).unwrap();
    let code = asm.finalize().unwrap();
    assert_eq!(code.branches()[0].size, BranchSize::Long);
    assert_branches_decode(&code);
}

#[test]
fn promotion_cascade_settles_in_one_finalize() {
    // Branches at 0, 4, and 8. The innermost (at 8) is far out of
    // range on its own; the two enclosing ones sit exactly at the
    // short-range edge and are pushed over only by the growth of the
    // branches inside their windows.
    let edge = (1 << 17) - 4;
    let mut asm = Assembler::new(Mips32);
    let outer = asm.new_label();
    let middle = asm.new_label();
    let inner = asm.new_label();
    asm.branch(outer);
    asm.branch(middle);
    asm.branch(inner);
    emit_nops(&mut asm, edge - 8);
    asm.bind(outer).unwrap(); // displacement exactly `edge`
    emit_nops(&mut asm, 4);
    asm.bind(middle).unwrap(); // displacement exactly `edge`
    emit_nops(&mut asm, 200_012 - (edge + 8));
    asm.bind(inner).unwrap(); // displacement 200_000

    let code = asm.finalize().unwrap();
    for branch in code.branches() {
        assert_eq!(branch.size, BranchSize::Long, "{:?}", branch);
    }
    assert_branches_decode(&code);
}

#[test]
fn adjacent_conditional_absorbs_neighbor_growth() {
    // A short conditional branch whose window contains one promoting
    // branch: its displacement grows by the 4-byte delta but stays in
    // range, so it keeps its size while its encoding changes.
    let mut asm = Assembler::new(Mips32);
    let out = asm.new_label();
    let far = asm.new_label();
    asm.branch_if(Condition::Ne, 2, 3, out);
    asm.branch(far);
    emit_nops(&mut asm, 40);
    asm.bind(out).unwrap();
    emit_nops(&mut asm, 200_000);
    asm.bind(far).unwrap();

    let code = asm.finalize().unwrap();
    let cond = code.branches()[0];
    assert_eq!(cond.size, BranchSize::Short);
    // Original target 48, shifted by the neighbor's 4-byte growth.
    assert_eq!(cond.target, 52);
    assert_eq!(code.branches()[1].size, BranchSize::Long);
    assert_branches_decode(&code);
}

#[test]
fn zero_conditional_long_form_keeps_register() {
    let mut asm = Assembler::new(Mips32);
    let top = asm.new_label();
    asm.bind(top).unwrap();
    emit_nops(&mut asm, 200_000);
    asm.branch_if_zero(ZeroCondition::Ltz, 9, top);
    let code = asm.finalize().unwrap();
    let branch = code.branches()[0];
    assert_eq!(branch.size, BranchSize::Long);
    assert!(matches!(
        branch.kind,
        BranchKind::ConditionalZero {
            cond: ZeroCondition::Ltz,
            rs: 9
        }
    ));
    assert_branches_decode(&code);
}

#[test]
fn interleaved_branch_kinds_and_directions() {
    let mut asm = Assembler::new(Mips32);
    let top = asm.new_label();
    let out = asm.new_label();
    asm.bind(top).unwrap();
    emit_nops(&mut asm, 8);
    asm.branch_if(Condition::Eq, 4, 5, out);
    emit_nops(&mut asm, 100_000);
    asm.branch_if_zero(ZeroCondition::Gtz, 6, top);
    emit_nops(&mut asm, 100_000);
    asm.branch(top);
    asm.bind(out).unwrap();

    let code = asm.finalize().unwrap();
    assert_eq!(code.branches().len(), 3);
    // The forward conditional spans ~200 KiB plus growth: long. The
    // mid-stream backward branch is ~100 KiB back: short. The final
    // backward branch spans everything: long.
    assert_eq!(code.branches()[0].size, BranchSize::Long);
    assert_eq!(code.branches()[1].size, BranchSize::Short);
    assert_eq!(code.branches()[2].size, BranchSize::Long);
    assert_branches_decode(&code);
}

#[test]
fn misaligned_distance_from_raw_data_promotes_to_long() {
    // Odd-length raw data between a branch and its target makes the
    // displacement unrepresentable by the word-counted short form even
    // though it is tiny; the auipc/jic pair has byte granularity and
    // must absorb it.
    let mut asm = Assembler::new(Mips32);
    let out = asm.new_label();
    asm.branch(out);
    asm.emit_bytes(&[0xAA; 6]);
    asm.bind(out).unwrap();
    let code = asm.finalize().unwrap();
    let branch = code.branches()[0];
    assert_eq!(branch.size, BranchSize::Long);
    // Original target 10, shifted by the branch's own 4-byte growth.
    assert_eq!(branch.target, 14);
    assert_eq!(code.len(), 14);
    assert_eq!(&code.bytes()[8..14], &[0xAA; 6]);
    assert_branches_decode(&code);
}

#[test]
fn branch_to_own_end_is_in_range() {
    // Target immediately after the branch: displacement 0 from the
    // delay-slot PC.
    let mut asm = Assembler::new(Mips32);
    let next = asm.new_label();
    asm.branch(next);
    asm.bind(next).unwrap();
    let code = asm.finalize().unwrap();
    assert_eq!(code.branches()[0].size, BranchSize::Short);
    assert_branches_decode(&code);
}

#[test]
fn rebinding_is_rejected() {
    let mut asm = Assembler::new(Mips32);
    let label = asm.new_label();
    asm.bind(label).unwrap();
    emit_nops(&mut asm, 16);
    assert_eq!(
        asm.bind(label),
        Err(RelaxError::BoundTwice { label, position: 0 })
    );
}

#[test]
fn unbound_reference_is_rejected_at_finalize() {
    let mut asm = Assembler::new(Mips32);
    let bound = asm.new_label();
    let dangling = asm.new_label();
    asm.bind(bound).unwrap();
    asm.branch(bound);
    asm.branch(dangling);
    assert_eq!(
        asm.finalize(),
        Err(RelaxError::UnboundLabel { label: dangling })
    );
}

#[test]
fn raw_jumps_survive_relaxation() {
    let mut asm = Assembler::with_base_address(Mips32, 0x0040_0000);
    let far = asm.new_label();
    let entry = asm.new_label();
    asm.branch(far);
    asm.jump(entry).unwrap();
    asm.bind(entry).unwrap();
    emit_nops(&mut asm, 200_000);
    asm.bind(far).unwrap();
    asm.jump(entry).unwrap();

    let code = asm.finalize().unwrap();
    assert_eq!(code.branches()[0].size, BranchSize::Long);
    let entry_addr = code.label_address(entry).unwrap();
    assert_eq!(entry_addr, 0x0040_0000 + 12);
    for at in [8usize, code.len() - 4] {
        let word = u32::from_le_bytes(code.bytes()[at..at + 4].try_into().unwrap());
        assert_eq!(word >> 26, 0b000010, "jump at {}", at);
        assert_eq!(u64::from(word & 0x03FF_FFFF) << 2, entry_addr, "jump at {}", at);
    }
    assert_branches_decode(&code);
}

#[test]
fn label_addresses_reflect_base_and_growth() {
    let mut asm = Assembler::with_base_address(Mips32, 0x1000_0000);
    let a = asm.new_label();
    let b = asm.new_label();
    let far = asm.new_label();
    asm.bind(a).unwrap();
    asm.branch(far);
    asm.bind(b).unwrap();
    emit_nops(&mut asm, 200_000);
    asm.bind(far).unwrap();

    let code = asm.finalize().unwrap();
    assert_eq!(code.label_address(a), Some(0x1000_0000));
    assert_eq!(code.label_address(b), Some(0x1000_0008));
    assert_eq!(code.label_address(far), Some(0x1000_0008 + 200_000));
    assert_branches_decode(&code);
}

#[test]
fn surrounding_code_is_preserved_across_relaxation() {
    let mut asm = Assembler::new(Mips32);
    let far = asm.new_label();
    asm.emit_u32(0x1111_1111);
    asm.branch(far);
    asm.emit_u32(0x2222_2222);
    emit_nops(&mut asm, 200_000);
    asm.emit_u32(0x3333_3333);
    asm.bind(far).unwrap();

    let code = asm.finalize().unwrap();
    assert_eq!(code.branches()[0].size, BranchSize::Long);
    let word = |at: usize| u32::from_le_bytes(code.bytes()[at..at + 4].try_into().unwrap());
    assert_eq!(word(0), 0x1111_1111);
    // The branch grew from 4 to 8 bytes, shifting everything after it.
    assert_eq!(word(12), 0x2222_2222);
    assert_eq!(word(code.len() - 4), 0x3333_3333);
    assert_branches_decode(&code);
}
