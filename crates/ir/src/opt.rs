use std::collections::HashMap;

use crate::{BasicBlock, Function, Module, Op, ValueId};

/// Constant folding followed by dead-code elimination to a fixpoint.
/// Folding is idempotent, so the two passes do not need to alternate.
pub fn optimize(m: &mut Module) {
    for f in &mut m.funcs {
        const_fold_func(f);
        dce_func(f);
    }
}

fn fold(op: Op, a: i64, b: i64) -> Option<i64> {
    Some(match op {
        Op::Add => a.wrapping_add(b),
        Op::Sub => a.wrapping_sub(b),
        Op::Mul => a.wrapping_mul(b),
        Op::Div => {
            // division by zero is left for the hardware to trap
            if b == 0 {
                return None;
            }
            a.wrapping_div(b)
        }
        Op::And => a & b,
        Op::Or => a | b,
        Op::Xor => a ^ b,
        // shift counts are unsigned
        Op::Shl => a.wrapping_shl(b as u32 & 63),
        Op::Shr => a.wrapping_shr(b as u32 & 63),
        _ => return None,
    })
}

fn const_fold_func(f: &mut Function) {
    for b in &mut f.blocks {
        for i in 0..b.instrs.len() {
            let op = b.instrs[i].val.op;
            if !matches!(
                op,
                Op::Add | Op::Sub | Op::Mul | Op::Div | Op::And | Op::Or | Op::Xor | Op::Shl | Op::Shr
            ) {
                continue;
            }
            if b.instrs[i].val.args.len() != 2 {
                continue;
            }
            let (Some(a), Some(c)) = (
                find_const(b, b.instrs[i].val.args[0]),
                find_const(b, b.instrs[i].val.args[1]),
            ) else {
                continue;
            };
            let Some(k) = fold(op, a, c) else { continue };
            let ins = &mut b.instrs[i];
            ins.val.op = Op::Iconst;
            ins.val.args.clear();
            ins.val.konst = k;
        }
    }
}

/// The id's constant value when it is defined by an `iconst` in the same
/// block.
fn find_const(b: &BasicBlock, id: ValueId) -> Option<i64> {
    for ins in &b.instrs {
        if ins.res == id && ins.val.op == Op::Iconst {
            return Some(ins.val.konst);
        }
    }
    None
}

fn build_uses(f: &Function) -> HashMap<ValueId, usize> {
    let mut uses: HashMap<ValueId, usize> = HashMap::new();
    for b in &f.blocks {
        for ins in &b.instrs {
            for &a in ins.val.value_operands() {
                *uses.entry(a).or_insert(0) += 1;
            }
        }
    }
    uses
}

fn dce_func(f: &mut Function) {
    // Removal can cascade, so iterate to a fixpoint.
    let mut changed = true;
    while changed {
        changed = false;
        let uses = build_uses(f);
        for b in &mut f.blocks {
            let before = b.instrs.len();
            b.instrs.retain(|ins| {
                if ins.res < 0 {
                    return true;
                }
                if matches!(ins.val.op, Op::Param | Op::Call | Op::Store | Op::Store8 | Op::Ret) {
                    return true;
                }
                uses.get(&ins.res).copied().unwrap_or(0) > 0
            });
            if b.instrs.len() != before {
                changed = true;
            }
        }
    }
}
