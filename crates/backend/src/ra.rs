use std::collections::{HashMap, HashSet};

use ir::{Function, Op, ValueId};

/// Registers handed out by linear scan. `%rax` and `%rcx` stay reserved
/// as emitter scratch; the six argument registers overlap with this pool,
/// which is safe because call operands are always marshaled from their
/// frame slots.
pub const ALLOCABLE_REGS: [&str; 7] = ["%rdx", "%r8", "%r9", "%r10", "%r11", "%rsi", "%rdi"];

#[derive(Debug, Default)]
pub struct Allocation {
    pub reg_of: HashMap<ValueId, &'static str>,
}

#[derive(Debug, Clone, Copy)]
struct Interval {
    id: ValueId,
    start: usize,
    end: usize,
}

/// Linear scan over the global instruction numbering (all blocks
/// concatenated in list order).
///
/// An interval [first def, last use] is a candidate unless:
/// - a `call` lies in its range: the value then lives in its frame slot,
///   removing any need for save/restore sequences around calls;
/// - its address is taken via `addr`: the slot is the value's home, and
///   memory through the pointer must observe it;
/// - it is a `param`: the prologue must be able to drain the incoming
///   argument registers without ordering concerns.
pub fn allocate_registers(f: &Function) -> Allocation {
    let mut def_at: HashMap<ValueId, usize> = HashMap::new();
    let mut last_def: HashMap<ValueId, usize> = HashMap::new();
    let mut last_use: HashMap<ValueId, usize> = HashMap::new();
    let mut calls: Vec<usize> = Vec::new();
    let mut slot_bound: HashSet<ValueId> = HashSet::new();

    let mut idx = 0usize;
    for b in &f.blocks {
        for ins in &b.instrs {
            if ins.res >= 0 {
                def_at.entry(ins.res).or_insert(idx);
                last_def.insert(ins.res, idx);
            }
            for &a in ins.val.value_operands() {
                last_use.insert(a, idx);
            }
            match ins.val.op {
                Op::Call => calls.push(idx),
                Op::Addr => {
                    slot_bound.insert(ins.val.args[0]);
                }
                // Parameters stay in their slots: giving one a pool
                // register could clobber a later incoming argument
                // register before the prologue reads it.
                Op::Param => {
                    slot_bound.insert(ins.res);
                }
                _ => {}
            }
            idx += 1;
        }
    }

    let mut intervals: Vec<Interval> = Vec::new();
    for (&id, &start) in &def_at {
        let Some(&use_at) = last_use.get(&id) else { continue };
        // Former phi targets are written again by edge copies; the range
        // must cover every def or a later interval could reuse the
        // register the back-edge copy still writes.
        let end = use_at.max(last_def[&id]);
        if end <= start {
            continue;
        }
        if slot_bound.contains(&id) {
            continue;
        }
        if calls.iter().any(|&c| start < c && c <= end) {
            continue;
        }
        intervals.push(Interval { id, start, end });
    }
    intervals.sort_by_key(|iv| (iv.start, iv.id));

    let mut active: Vec<(Interval, &'static str)> = Vec::new();
    let mut alloc = Allocation::default();

    for iv in intervals {
        active.retain(|(a, _)| a.end >= iv.start);

        let used: HashSet<&str> = active.iter().map(|&(_, r)| r).collect();
        if let Some(&reg) = ALLOCABLE_REGS.iter().find(|r| !used.contains(*r)) {
            alloc.reg_of.insert(iv.id, reg);
            active.push((iv, reg));
            continue;
        }
        // Pool exhausted: evict the active interval with the latest end
        // when it outlives the current one, else leave current spilled.
        let Some(victim_at) = active
            .iter()
            .enumerate()
            .max_by_key(|(_, entry)| entry.0.end)
            .map(|(i, _)| i)
        else {
            continue;
        };
        if active[victim_at].0.end > iv.end {
            let (victim, reg) = active.swap_remove(victim_at);
            alloc.reg_of.remove(&victim.id);
            alloc.reg_of.insert(iv.id, reg);
            active.push((iv, reg));
        }
    }
    alloc
}
