use anyhow::{bail, Result};
use std::fmt::Write as _;

use ir::{BasicBlock, Function, Instr, Module, Op, ValueId};

mod ra;

pub use ra::{allocate_registers, Allocation, ALLOCABLE_REGS};

/// Integer argument registers of the System V AMD64 ABI, in order.
pub const ARG_REGS: [&str; 6] = ["%rdi", "%rsi", "%rdx", "%rcx", "%r8", "%r9"];

/// Emit AT&T-syntax x86_64 assembly for the whole module. Expects the
/// IR to be past SSA destruction; register allocation happens here, per
/// function, over the post-destruction instruction stream.
pub fn emit_module(m: &Module) -> Result<String> {
    let mut b = String::new();
    b.push_str(".text\n");
    for f in &m.funcs {
        emit_func(&mut b, f)?;
    }
    if !m.globals.is_empty() {
        b.push_str(".data\n");
        for g in &m.globals {
            let _ = writeln!(b, ".globl {}\n{}:", g.name, g.name);
            if g.array {
                let esz = if g.elem_size == 0 { 8 } else { g.elem_size };
                let _ = writeln!(b, "  .zero {}", g.len * esz);
            } else {
                let _ = writeln!(b, "  .quad {}", g.init);
            }
        }
    }
    if !m.str_lits.is_empty() {
        b.push_str(".section .rodata\n");
        for s in &m.str_lits {
            let _ = writeln!(b, "{}:\n  .asciz \"{}\"", s.label, escape_asm_string(s.data.as_bytes()));
        }
    }
    Ok(b)
}

/// Frame slot of a ValueId, relative to `%rbp`. Every value owns the
/// slot whether or not it also has a register home.
fn slot_offset(id: ValueId) -> i64 {
    -8 * (id as i64 + 1)
}

fn align(n: i64, a: i64) -> i64 {
    (n + (a - 1)) & !(a - 1)
}

/// Where an operand can be read from at this point: its register home,
/// an immediate when it is an `iconst` of the same block, or its slot.
#[derive(Clone)]
enum Loc {
    Reg(&'static str),
    Imm(i64),
    Slot(i64),
}

impl std::fmt::Display for Loc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Loc::Reg(r) => write!(f, "{}", r),
            Loc::Imm(k) => write!(f, "${}", k),
            Loc::Slot(off) => write!(f, "{}(%rbp)", off),
        }
    }
}

fn find_const(bb: &BasicBlock, id: ValueId) -> Option<i64> {
    for ins in &bb.instrs {
        if ins.res == id && ins.val.op == Op::Iconst {
            return Some(ins.val.konst);
        }
    }
    None
}

fn loc_of(alloc: &Allocation, bb: &BasicBlock, id: ValueId) -> Loc {
    if let Some(k) = find_const(bb, id) {
        // immediate operands must fit in 32 bits; wider constants are
        // read back from the home the iconst wrote
        if i32::try_from(k).is_ok() {
            return Loc::Imm(k);
        }
    }
    if let Some(r) = alloc.reg_of.get(&id) {
        return Loc::Reg(r);
    }
    Loc::Slot(slot_offset(id))
}

fn mov_to_reg(b: &mut String, src: &Loc, reg: &str) {
    if matches!(src, Loc::Reg(r) if *r == reg) {
        return;
    }
    let _ = writeln!(b, "  movq {}, {}", src, reg);
}

/// Move `%rax` to the result's home: its register, or its frame slot.
fn store_result(b: &mut String, alloc: &Allocation, res: ValueId) {
    if let Some(r) = alloc.reg_of.get(&res) {
        let _ = writeln!(b, "  movq %rax, {}", r);
    } else {
        let _ = writeln!(b, "  movq %rax, {}(%rbp)", slot_offset(res));
    }
}

fn emit_func(b: &mut String, f: &Function) -> Result<()> {
    let _ = writeln!(b, ".globl {}\n{}:", f.name, f.name);
    b.push_str("  push %rbp\n");
    b.push_str("  mov %rsp, %rbp\n");

    let alloc = allocate_registers(f);

    let max_id = f.max_value_id();
    let frame_size = align(8 * (max_id as i64 + 1), 16);
    if frame_size > 0 {
        let _ = writeln!(b, "  sub ${}, %rsp", frame_size);
    }

    // Materialize parameters into their homes in declared order.
    let param_ids: Vec<ValueId> = f.blocks[f.entry]
        .instrs
        .iter()
        .filter(|i| i.val.op == Op::Param)
        .map(|i| i.res)
        .collect();
    if param_ids.len() > ARG_REGS.len() {
        bail!("{}: more than 6 integer parameters are not supported", f.name);
    }
    for (i, &id) in param_ids.iter().enumerate() {
        if let Some(r) = alloc.reg_of.get(&id) {
            let _ = writeln!(b, "  movq {}, {}", ARG_REGS[i], r);
        } else {
            let _ = writeln!(b, "  movq {}, {}(%rbp)", ARG_REGS[i], slot_offset(id));
        }
    }

    for (bi, bb) in f.blocks.iter().enumerate() {
        if bi != f.entry {
            let _ = writeln!(b, "{}:", bb.label);
        }
        for ins in &bb.instrs {
            emit_instr(b, f, &alloc, bb, ins, frame_size)?;
        }
    }

    // Safety tail for fall-through paths without a return.
    b.push_str("  mov $0, %eax\n");
    if frame_size > 0 {
        let _ = writeln!(b, "  add ${}, %rsp", frame_size);
    }
    b.push_str("  pop %rbp\n");
    b.push_str("  ret\n");
    Ok(())
}

fn emit_instr(
    b: &mut String,
    f: &Function,
    alloc: &Allocation,
    bb: &BasicBlock,
    ins: &Instr,
    frame_size: i64,
) -> Result<()> {
    match ins.val.op {
        Op::Iconst => {
            let mnem = if i32::try_from(ins.val.konst).is_ok() { "movq" } else { "movabsq" };
            if let Some(r) = alloc.reg_of.get(&ins.res) {
                let _ = writeln!(b, "  {} ${}, {}", mnem, ins.val.konst, r);
            } else {
                let _ = writeln!(b, "  {} ${}, %rax", mnem, ins.val.konst);
                store_result(b, alloc, ins.res);
            }
        }
        Op::Copy => {
            let src = loc_of(alloc, bb, ins.val.args[0]);
            if let Some(r) = alloc.reg_of.get(&ins.res) {
                mov_to_reg(b, &src, r);
            } else {
                mov_to_reg(b, &src, "%rax");
                store_result(b, alloc, ins.res);
            }
        }
        Op::Add => emit_binop(b, alloc, bb, ins, "addq"),
        Op::Sub => emit_binop(b, alloc, bb, ins, "subq"),
        Op::Mul => emit_binop(b, alloc, bb, ins, "imulq"),
        Op::And => emit_binop(b, alloc, bb, ins, "andq"),
        Op::Or => emit_binop(b, alloc, bb, ins, "orq"),
        Op::Xor => emit_binop(b, alloc, bb, ins, "xorq"),
        Op::Shl => emit_shift(b, alloc, bb, ins, "shlq"),
        Op::Shr => emit_shift(b, alloc, bb, ins, "sarq"),
        Op::Not => {
            let src = loc_of(alloc, bb, ins.val.args[0]);
            if let Some(r) = alloc.reg_of.get(&ins.res) {
                mov_to_reg(b, &src, r);
                let _ = writeln!(b, "  notq {}", r);
            } else {
                mov_to_reg(b, &src, "%rax");
                b.push_str("  notq %rax\n");
                store_result(b, alloc, ins.res);
            }
        }
        Op::Div => {
            // signed division: %rdx:%rax / %rcx -> %rax. cqo and idivq
            // clobber %rdx, which is allocable, so preserve it unless the
            // destination owns it.
            let lhs = loc_of(alloc, bb, ins.val.args[0]);
            let rhs = loc_of(alloc, bb, ins.val.args[1]);
            let save_rdx = alloc.reg_of.get(&ins.res) != Some(&"%rdx");
            if save_rdx {
                b.push_str("  push %rdx\n");
            }
            mov_to_reg(b, &lhs, "%rax");
            mov_to_reg(b, &rhs, "%rcx");
            b.push_str("  cqo\n");
            b.push_str("  idivq %rcx\n");
            if save_rdx {
                b.push_str("  pop %rdx\n");
            }
            store_result(b, alloc, ins.res);
        }
        Op::Eq | Op::Ne | Op::Lt | Op::Le | Op::Gt | Op::Ge => {
            let lhs = loc_of(alloc, bb, ins.val.args[0]);
            let rhs = loc_of(alloc, bb, ins.val.args[1]);
            mov_to_reg(b, &lhs, "%rax");
            let _ = writeln!(b, "  cmpq {}, %rax", rhs);
            let cc = match ins.val.op {
                Op::Eq => "e",
                Op::Ne => "ne",
                Op::Lt => "l",
                Op::Le => "le",
                Op::Gt => "g",
                _ => "ge",
            };
            let _ = writeln!(b, "  set{} %al", cc);
            b.push_str("  movzbq %al, %rax\n");
            store_result(b, alloc, ins.res);
        }
        Op::Param => {
            // moved to its home in the prologue
        }
        Op::Addr => {
            // Taking the address makes the slot the value's home, so the
            // current value must be in the slot first.
            let base = ins.val.args[0];
            let off = slot_offset(base);
            match loc_of(alloc, bb, base) {
                Loc::Imm(k) => {
                    let _ = writeln!(b, "  movq ${}, %rax", k);
                    let _ = writeln!(b, "  movq %rax, {}(%rbp)", off);
                }
                Loc::Reg(r) => {
                    let _ = writeln!(b, "  movq {}, {}(%rbp)", r, off);
                }
                Loc::Slot(_) => {}
            }
            if let Some(r) = alloc.reg_of.get(&ins.res) {
                let _ = writeln!(b, "  leaq {}(%rbp), {}", off, r);
            } else {
                let _ = writeln!(b, "  leaq {}(%rbp), %rax", off);
                store_result(b, alloc, ins.res);
            }
        }
        Op::SlotAddr => {
            let off = slot_offset(ins.val.args[0]);
            if let Some(r) = alloc.reg_of.get(&ins.res) {
                let _ = writeln!(b, "  leaq {}(%rbp), {}", off, r);
            } else {
                let _ = writeln!(b, "  leaq {}(%rbp), %rax", off);
                store_result(b, alloc, ins.res);
            }
        }
        Op::GlobalAddr => {
            let sym = ins.val.sym.as_deref().unwrap_or_default();
            if let Some(r) = alloc.reg_of.get(&ins.res) {
                let _ = writeln!(b, "  leaq {}(%rip), {}", sym, r);
            } else {
                let _ = writeln!(b, "  leaq {}(%rip), %rax", sym);
                store_result(b, alloc, ins.res);
            }
        }
        Op::Load | Op::Load8 => {
            let ptr = loc_of(alloc, bb, ins.val.args[0]);
            mov_to_reg(b, &ptr, "%rcx");
            let mnem = if ins.val.op == Op::Load { "movq" } else { "movzbq" };
            if let Some(r) = alloc.reg_of.get(&ins.res) {
                let _ = writeln!(b, "  {} (%rcx), {}", mnem, r);
            } else {
                let _ = writeln!(b, "  {} (%rcx), %rax", mnem);
                store_result(b, alloc, ins.res);
            }
        }
        Op::Store | Op::Store8 => {
            let ptr = loc_of(alloc, bb, ins.val.args[0]);
            let val = loc_of(alloc, bb, ins.val.args[1]);
            mov_to_reg(b, &ptr, "%rcx");
            mov_to_reg(b, &val, "%rax");
            if ins.val.op == Op::Store {
                b.push_str("  movq %rax, (%rcx)\n");
            } else {
                b.push_str("  movb %al, (%rcx)\n");
            }
        }
        Op::Call => {
            if ins.val.args.len() > ARG_REGS.len() {
                bail!("{}: more than 6 integer arguments are not supported", f.name);
            }
            for (i, &a) in ins.val.args.iter().enumerate() {
                let src = loc_of(alloc, bb, a);
                mov_to_reg(b, &src, ARG_REGS[i]);
            }
            // keep the stack 16-byte aligned across the call
            b.push_str("  sub $8, %rsp\n");
            let _ = writeln!(b, "  call {}", ins.val.sym.as_deref().unwrap_or_default());
            b.push_str("  add $8, %rsp\n");
            if ins.res >= 0 {
                store_result(b, alloc, ins.res);
            }
        }
        Op::Ret => {
            let src = loc_of(alloc, bb, ins.val.args[0]);
            mov_to_reg(b, &src, "%rax");
            if frame_size > 0 {
                let _ = writeln!(b, "  add ${}, %rsp", frame_size);
            }
            b.push_str("  pop %rbp\n");
            b.push_str("  ret\n");
        }
        Op::Jmp => {
            let t = ins.val.args[0] as usize;
            if t < f.blocks.len() {
                let _ = writeln!(b, "  jmp {}", f.blocks[t].label);
            }
        }
        Op::Jnz => {
            match loc_of(alloc, bb, ins.val.args[0]) {
                Loc::Reg(r) => {
                    let _ = writeln!(b, "  testq {}, {}", r, r);
                }
                Loc::Imm(k) => {
                    let _ = writeln!(b, "  movq ${}, %rax", k);
                    b.push_str("  testq %rax, %rax\n");
                }
                Loc::Slot(off) => {
                    let _ = writeln!(b, "  cmpq $0, {}(%rbp)", off);
                }
            }
            let t = ins.val.args[1] as usize;
            let e = ins.val.args[2] as usize;
            if t < f.blocks.len() {
                let _ = writeln!(b, "  jne {}", f.blocks[t].label);
            }
            if e < f.blocks.len() {
                let _ = writeln!(b, "  jmp {}", f.blocks[e].label);
            }
        }
        Op::Phi => {
            bail!("{}: phi reached emission; SSA destruction must run first", f.name);
        }
    }
    Ok(())
}

/// Two-operand integer op: prefer computing in the destination register,
/// falling back to `%rax` for spilled destinations. The right operand
/// uses an immediate form when it is a same-block constant.
fn emit_binop(b: &mut String, alloc: &Allocation, bb: &BasicBlock, ins: &Instr, mnem: &str) {
    let lhs = loc_of(alloc, bb, ins.val.args[0]);
    let rhs = loc_of(alloc, bb, ins.val.args[1]);
    if let Some(dest) = alloc.reg_of.get(&ins.res) {
        mov_to_reg(b, &lhs, dest);
        let _ = writeln!(b, "  {} {}, {}", mnem, rhs, dest);
        return;
    }
    mov_to_reg(b, &lhs, "%rax");
    let _ = writeln!(b, "  {} {}, %rax", mnem, rhs);
    store_result(b, alloc, ins.res);
}

/// Shift count lives in an immediate or in `%cl`.
fn emit_shift(b: &mut String, alloc: &Allocation, bb: &BasicBlock, ins: &Instr, mnem: &str) {
    let lhs = loc_of(alloc, bb, ins.val.args[0]);
    let rhs = loc_of(alloc, bb, ins.val.args[1]);
    let dest: String;
    let spilled = match alloc.reg_of.get(&ins.res) {
        Some(r) => {
            dest = r.to_string();
            false
        }
        None => {
            dest = "%rax".to_string();
            true
        }
    };
    mov_to_reg(b, &lhs, &dest);
    match rhs {
        Loc::Imm(k) => {
            let _ = writeln!(b, "  {} ${}, {}", mnem, k, dest);
        }
        other => {
            mov_to_reg(b, &other, "%rcx");
            let _ = writeln!(b, "  {} %cl, {}", mnem, dest);
        }
    }
    if spilled {
        store_result(b, alloc, ins.res);
    }
}

fn escape_asm_string(data: &[u8]) -> String {
    let mut out = String::new();
    for &c in data {
        match c {
            b'\\' => out.push_str("\\\\"),
            b'"' => out.push_str("\\\""),
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            b'\r' => out.push_str("\\r"),
            0x20..=0x7E => out.push(c as char),
            other => {
                let _ = write!(out, "\\{:03o}", other);
            }
        }
    }
    out
}
