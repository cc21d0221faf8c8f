use crate::{Function, Instr, Module, Op, Value, ValueId, NO_RESULT};

/// Lower every phi in the module to copies on incoming edges.
pub fn destruct_module(m: &mut Module) {
    for f in &mut m.funcs {
        eliminate_phis(f);
    }
}

/// Replace the leading phis of each block with `copy` instructions placed
/// in the predecessors. A critical edge (pred with several successors
/// into a block with several predecessors) gets a fresh edge block first,
/// and the predecessor's terminator is rewritten to target it.
pub fn eliminate_phis(f: &mut Function) {
    for b in 0..f.blocks.len() {
        let phis: Vec<Instr> = f.blocks[b]
            .instrs
            .iter()
            .take_while(|i| i.val.op == Op::Phi)
            .cloned()
            .collect();
        if phis.is_empty() || f.blocks[b].preds.is_empty() {
            continue;
        }
        // Operands are aligned with the predecessor list as it was when
        // the phis were sealed; splitting reorders it, so iterate a
        // snapshot.
        let preds = f.blocks[b].preds.clone();
        for (pi, &pred) in preds.iter().enumerate() {
            let ip = if is_critical(f, pred, b) {
                split_critical_edge(f, pred, b)
            } else {
                pred
            };
            for phi in &phis {
                if pi >= phi.val.args.len() {
                    continue;
                }
                let src = phi.val.args[pi];
                let dst = phi.res;
                insert_before_terminator(
                    f,
                    ip,
                    Instr {
                        res: dst,
                        val: Value { op: Op::Copy, args: vec![src], konst: 0, sym: None },
                    },
                );
            }
            if ip != pred {
                // fresh edge block needs its own jump to the successor
                f.blocks[ip].instrs.push(Instr {
                    res: NO_RESULT,
                    val: Value { op: Op::Jmp, args: vec![b as ValueId], konst: 0, sym: None },
                });
            }
        }
        let nphis = phis.len();
        f.blocks[b].instrs.drain(..nphis);
    }
}

fn is_critical(f: &Function, p: usize, s: usize) -> bool {
    f.blocks[p].succs.len() > 1 && f.blocks[s].preds.len() > 1
}

fn split_critical_edge(f: &mut Function, p: usize, s: usize) -> usize {
    let base = format!("{}_to_{}", f.blocks[p].label, f.blocks[s].label);
    let nb = f.new_block(&base);
    f.remove_edge(p, s);
    f.add_edge(p, nb);
    f.add_edge(nb, s);

    // Rewrite p's terminator so any reference to s becomes nb; skipping
    // this would jump past the inserted copies.
    if let Some(last) = f.blocks[p].instrs.last_mut() {
        let (si, ni) = (s as ValueId, nb as ValueId);
        match last.val.op {
            Op::Jmp => {
                if last.val.args.len() == 1 && last.val.args[0] == si {
                    last.val.args[0] = ni;
                }
            }
            Op::Jnz => {
                if last.val.args.len() == 3 {
                    if last.val.args[1] == si {
                        last.val.args[1] = ni;
                    }
                    if last.val.args[2] == si {
                        last.val.args[2] = ni;
                    }
                }
            }
            _ => {}
        }
    }
    nb
}

fn insert_before_terminator(f: &mut Function, b: usize, ins: Instr) {
    let instrs = &mut f.blocks[b].instrs;
    match instrs.last() {
        Some(last) if last.is_terminator() => {
            let at = instrs.len() - 1;
            instrs.insert(at, ins);
        }
        _ => instrs.push(ins),
    }
}
