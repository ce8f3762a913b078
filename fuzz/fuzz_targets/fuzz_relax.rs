#![no_main]
use libfuzzer_sys::fuzz_target;

use relax_asm::{Assembler, Condition, Label, Mips32, RelaxError, ZeroCondition};

const NUM_LABELS: usize = 8;
const FILLER_BUDGET: u32 = 1 << 21;

// Interpret the input as an instruction stream for the assembler. Any
// sequence of calls must either succeed or return Err, never panic; after
// the first Err the assembler is abandoned, as the API requires.
fn run(data: &[u8]) -> Result<(), RelaxError> {
    let mut asm = Assembler::with_base_address(Mips32, 0x0040_0000);
    let labels: Vec<Label> = (0..NUM_LABELS).map(|_| asm.new_label()).collect();
    let mut bound = [false; NUM_LABELS];
    let mut filler_left = FILLER_BUDGET;

    let mut bytes = data.iter().copied();
    let mut next = || bytes.next();

    while let Some(op) = next() {
        let index = usize::from(op >> 5) % NUM_LABELS;
        let label = labels[index];
        match op % 7 {
            0 => {
                let Some(count) = next() else { break };
                let words = u32::from(count).min(filler_left / 4);
                filler_left -= words * 4;
                for _ in 0..words {
                    asm.emit_u32(u32::from(count) * 0x0101_0101);
                }
            }
            1 => {
                if bound[index] {
                    // Rebinding must report cleanly, not panic.
                    assert!(asm.bind(label).is_err());
                } else {
                    asm.bind(label)?;
                    bound[index] = true;
                }
            }
            2 => asm.branch(label),
            3 => {
                let (Some(rs), Some(rt)) = (next(), next()) else {
                    break;
                };
                let cond = if rs % 2 == 0 {
                    Condition::Eq
                } else {
                    Condition::Ne
                };
                asm.branch_if(cond, rs % 32, rt % 32, label);
            }
            4 => {
                let Some(rs) = next() else { break };
                let cond = match rs % 6 {
                    0 => ZeroCondition::Ltz,
                    1 => ZeroCondition::Gez,
                    2 => ZeroCondition::Lez,
                    3 => ZeroCondition::Gtz,
                    4 => ZeroCondition::Eqz,
                    _ => ZeroCondition::Nez,
                };
                asm.branch_if_zero(cond, rs % 32, label);
            }
            5 => asm.jump(label)?,
            _ => {
                let Some(count) = next() else { break };
                // Big filler blocks so some branches leave short range.
                let words = (u32::from(count) * 128).min(filler_left / 4);
                filler_left -= words * 4;
                for _ in 0..words {
                    asm.emit_u32(0);
                }
            }
        }
    }

    for (label, bound) in labels.into_iter().zip(bound) {
        if !bound {
            asm.bind(label)?;
        }
    }
    let code = asm.finalize()?;
    assert!(code.len() >= code.branches().len() * 4);
    Ok(())
}

fuzz_target!(|data: &[u8]| {
    let _ = run(data);
});
