use anyhow::{bail, Result};
use parse::ast::{
    BinaryOp, CaseClause, Decl, Expr, File, FuncDecl, Span, Stmt, StructField, UnaryOp,
};
use std::collections::HashMap;

use crate::types::Type;
use crate::{Function, Global, Instr, Module, Op, StrLit, Value, ValueId, NO_RESULT};

/// Build SSA IR for every function in `file` into `m`. Globals are
/// collected in a first pass so function bodies can reference them.
pub fn build_module(file: &File, m: &mut Module) -> Result<()> {
    for d in &file.decls {
        match d {
            Decl::Global(gd) => {
                let esz = Type::from_basic(gd.ty, gd.ptr).size();
                m.globals.push(Global {
                    name: gd.name.clone(),
                    init: gd.init.unwrap_or(0),
                    array: false,
                    len: 0,
                    elem_size: esz,
                });
            }
            Decl::GlobalArray(gd) => {
                let esz = Type::from_basic(gd.elem, false).size();
                m.globals.push(Global {
                    name: gd.name.clone(),
                    init: 0,
                    array: true,
                    len: gd.size,
                    elem_size: esz,
                });
            }
            _ => {}
        }
    }

    let mut struct_defs: HashMap<String, Vec<StructField>> = HashMap::new();
    for d in &file.decls {
        if let Decl::Struct(sd) = d {
            struct_defs.insert(sd.name.clone(), sd.fields.clone());
        }
    }

    for d in &file.decls {
        if let Decl::Func(fd) = d {
            let f = FuncBuilder::run(m, &struct_defs, fd)?;
            m.funcs.push(f);
        }
    }
    Ok(())
}

#[derive(Clone, Copy)]
struct ArrayInfo {
    /// ValueId whose frame slot is the lowest address of the reserved
    /// group; element addresses grow upward from it.
    anchor: ValueId,
    elem_size: usize,
}

#[derive(Clone)]
struct StructInfo {
    anchor: ValueId,
    type_name: String,
}

struct FuncBuilder<'a> {
    m: &'a mut Module,
    struct_defs: &'a HashMap<String, Vec<StructField>>,
    f: Function,
    /// Current block index.
    cur: usize,
    next_id: ValueId,
    /// Braun-style per-block current definitions: block -> name -> value.
    cur_def: HashMap<usize, HashMap<String, ValueId>>,
    /// Placeholder phis awaiting operands, filled when the block is sealed.
    pending: HashMap<usize, Vec<(String, ValueId)>>,
    break_targets: Vec<usize>,
    cont_targets: Vec<usize>,
    arrays: HashMap<String, ArrayInfo>,
    structs: HashMap<String, StructInfo>,
    var_types: HashMap<String, Type>,
    str_labels: HashMap<String, String>,
    ret_type: Type,
}

impl<'a> FuncBuilder<'a> {
    fn run(
        m: &'a mut Module,
        struct_defs: &'a HashMap<String, Vec<StructField>>,
        fd: &FuncDecl,
    ) -> Result<Function> {
        let mut f = Function::new(&fd.name);
        for p in &fd.params {
            f.params.push(p.name.clone());
        }
        let entry = f.new_block("entry");
        let mut b = FuncBuilder {
            m,
            struct_defs,
            f,
            cur: entry,
            next_id: 0,
            cur_def: HashMap::new(),
            pending: HashMap::new(),
            break_targets: Vec::new(),
            cont_targets: Vec::new(),
            arrays: HashMap::new(),
            structs: HashMap::new(),
            var_types: HashMap::new(),
            str_labels: HashMap::new(),
            ret_type: Type::from_basic(fd.ret, false),
        };
        for p in &fd.params {
            let id = b.add(Op::Param, &[]);
            b.write_var(&p.name, entry, id);
            b.var_types.insert(p.name.clone(), Type::from_basic(p.ty, p.ptr));
        }
        b.build_block(&fd.body)?;
        Ok(b.f)
    }

    // ===== Value construction =====

    fn new_value(&mut self, op: Op, args: Vec<ValueId>, konst: i64, sym: Option<String>) -> ValueId {
        let id = self.next_id;
        self.next_id += 1;
        self.f.blocks[self.cur]
            .instrs
            .push(Instr { res: id, val: Value { op, args, konst, sym } });
        id
    }

    fn add(&mut self, op: Op, args: &[ValueId]) -> ValueId {
        self.new_value(op, args.to_vec(), 0, None)
    }

    fn iconst(&mut self, v: i64) -> ValueId {
        self.new_value(Op::Iconst, Vec::new(), v, None)
    }

    fn global_addr(&mut self, sym: &str) -> ValueId {
        self.new_value(Op::GlobalAddr, Vec::new(), 0, Some(sym.to_string()))
    }

    fn call(&mut self, name: &str, args: Vec<ValueId>) -> ValueId {
        self.new_value(Op::Call, args, 0, Some(name.to_string()))
    }

    fn append_jmp(&mut self, block: usize, target: usize) {
        self.f.blocks[block].instrs.push(Instr {
            res: NO_RESULT,
            val: Value { op: Op::Jmp, args: vec![target as ValueId], konst: 0, sym: None },
        });
    }

    fn append_jnz(&mut self, block: usize, cond: ValueId, t: usize, e: usize) {
        self.f.blocks[block].instrs.push(Instr {
            res: NO_RESULT,
            val: Value {
                op: Op::Jnz,
                args: vec![cond, t as ValueId, e as ValueId],
                konst: 0,
                sym: None,
            },
        });
    }

    fn terminated(&self, block: usize) -> bool {
        self.f.blocks[block].is_terminated()
    }

    // ===== Variable versioning (Braun-style) =====

    fn write_var(&mut self, name: &str, block: usize, id: ValueId) {
        self.cur_def.entry(block).or_default().insert(name.to_string(), id);
    }

    fn read_var(&mut self, name: &str, block: usize) -> Result<ValueId> {
        if let Some(&v) = self.cur_def.get(&block).and_then(|m| m.get(name)) {
            return Ok(v);
        }
        let preds = self.f.blocks[block].preds.clone();
        if !self.f.blocks[block].sealed {
            return match preds.len() {
                0 => bail!("{}: undefined variable {}", self.f.name, name),
                1 => self.read_var(name, preds[0]),
                _ => {
                    let phi = self.new_phi(block);
                    self.write_var(name, block, phi);
                    self.pending.entry(block).or_default().push((name.to_string(), phi));
                    Ok(phi)
                }
            };
        }
        match preds.len() {
            0 => bail!("{}: undefined variable {}", self.f.name, name),
            1 => self.read_var(name, preds[0]),
            _ => {
                let phi = self.new_phi(block);
                self.write_var(name, block, phi);
                self.add_phi_operands(block, phi, name)?;
                Ok(phi)
            }
        }
    }

    fn new_phi(&mut self, block: usize) -> ValueId {
        let id = self.next_id;
        self.next_id += 1;
        self.f.blocks[block].instrs.insert(
            0,
            Instr { res: id, val: Value { op: Op::Phi, args: Vec::new(), konst: 0, sym: None } },
        );
        id
    }

    fn add_phi_operands(&mut self, block: usize, phi: ValueId, name: &str) -> Result<()> {
        let preds = self.f.blocks[block].preds.clone();
        let mut args = Vec::with_capacity(preds.len());
        for p in preds {
            args.push(self.read_var(name, p)?);
        }
        for ins in &mut self.f.blocks[block].instrs {
            if ins.res == phi && ins.val.op == Op::Phi {
                ins.val.args = args;
                return Ok(());
            }
        }
        Ok(())
    }

    /// Mark `block` as having its final predecessor set and fill any
    /// pending placeholder phis. Loop headers are sealed only after their
    /// back-edge exists.
    fn seal_block(&mut self, block: usize) -> Result<()> {
        if self.f.blocks[block].sealed {
            return Ok(());
        }
        self.f.blocks[block].sealed = true;
        if let Some(pend) = self.pending.remove(&block) {
            for (name, phi) in pend {
                self.add_phi_operands(block, phi, &name)?;
            }
        }
        Ok(())
    }

    // ===== Statements =====

    fn build_block(&mut self, stmts: &[Stmt]) -> Result<()> {
        for s in stmts {
            // Statements after break/continue/return are unreachable;
            // skipping them keeps terminators last in their blocks.
            if self.terminated(self.cur) {
                break;
            }
            self.build_stmt(s)?;
        }
        Ok(())
    }

    fn build_stmt(&mut self, s: &Stmt) -> Result<()> {
        match s {
            Stmt::Block(stmts) => self.build_block(stmts),
            Stmt::Return { expr, pos } => {
                let (v, t) = self.build_expr(expr)?;
                if t.is_pointer() && !self.ret_type.is_pointer() {
                    bail!(
                        "{}:{}:{}: type error: returning pointer from integer function",
                        self.f.name,
                        pos.line,
                        pos.col
                    );
                }
                self.add(Op::Ret, &[v]);
                Ok(())
            }
            Stmt::ExprStmt(e) => {
                self.build_expr(e)?;
                Ok(())
            }
            Stmt::Decl { name, ty, ptr, init, .. } => {
                match init {
                    Some(e) => {
                        let (v, t) = self.build_expr(e)?;
                        self.write_var(name, self.cur, v);
                        self.var_types.insert(name.clone(), t);
                    }
                    None => {
                        let v = self.iconst(0);
                        self.write_var(name, self.cur, v);
                        self.var_types.insert(name.clone(), Type::from_basic(*ty, *ptr));
                    }
                }
                Ok(())
            }
            Stmt::ArrayDecl { name, size, elem } => {
                if *size == 0 {
                    bail!("{}: zero-size array {}", self.f.name, name);
                }
                // Reserve `size` consecutive frame slots; the last id's
                // slot is the lowest address of the group.
                let mut anchor = NO_RESULT;
                for _ in 0..*size {
                    anchor = self.iconst(0);
                }
                let elem_size = Type::from_basic(*elem, false).size();
                self.arrays.insert(name.clone(), ArrayInfo { anchor, elem_size });
                Ok(())
            }
            Stmt::StructVar { name, struct_name, pos } => {
                let nfields = match self.struct_defs.get(struct_name) {
                    Some(fields) => fields.len(),
                    None => bail!(
                        "{}:{}:{}: unknown struct {}",
                        self.f.name,
                        pos.line,
                        pos.col,
                        struct_name
                    ),
                };
                let mut anchor = NO_RESULT;
                for _ in 0..nfields.max(1) {
                    anchor = self.iconst(0);
                }
                self.structs
                    .insert(name.clone(), StructInfo { anchor, type_name: struct_name.clone() });
                Ok(())
            }
            Stmt::Assign { name, value, pos } => {
                self.build_assign_named(name, value, *pos)?;
                Ok(())
            }
            Stmt::ArrayAssign { name, index, value, pos } => self.build_array_assign(name, index, value, *pos),
            Stmt::FieldAssign { base, field, value, pos } => {
                let ptr = self.field_addr(base, field, *pos)?;
                let (v, _) = self.build_expr(value)?;
                self.add(Op::Store, &[ptr, v]);
                Ok(())
            }
            Stmt::If { cond, then_body, else_body } => self.build_if(cond, then_body, else_body.as_deref()),
            Stmt::While { cond, body } => self.build_while(cond, body),
            Stmt::DoWhile { body, cond } => self.build_do_while(body, cond),
            Stmt::For { init, cond, post, body } => {
                self.build_for(init.as_deref(), cond.as_ref(), post.as_deref(), body)
            }
            Stmt::Break { pos } => {
                let Some(&target) = self.break_targets.last() else {
                    bail!("{}:{}:{}: break outside loop or switch", self.f.name, pos.line, pos.col);
                };
                self.append_jmp(self.cur, target);
                self.f.add_edge(self.cur, target);
                Ok(())
            }
            Stmt::Continue { pos } => {
                let Some(&target) = self.cont_targets.last() else {
                    bail!("{}:{}:{}: continue outside loop", self.f.name, pos.line, pos.col);
                };
                self.append_jmp(self.cur, target);
                self.f.add_edge(self.cur, target);
                Ok(())
            }
            Stmt::Switch { tag, cases, default } => self.build_switch(tag, cases, default.as_deref()),
        }
    }

    /// Assignment to a bare name: a store when the name is a global and
    /// no local shadows it, an SSA rebind otherwise.
    fn build_assign_named(&mut self, name: &str, value: &Expr, pos: Span) -> Result<ValueId> {
        if !self.var_types.contains_key(name) {
            if let Some(g) = self.lookup_global(name) {
                let (v, _) = self.build_expr(value)?;
                let addr = self.global_addr(&g.name);
                if g.elem_size == 1 {
                    self.add(Op::Store8, &[addr, v]);
                } else {
                    self.add(Op::Store, &[addr, v]);
                }
                return Ok(v);
            }
        }
        let (v, t) = self.build_expr(value)?;
        if let Some(vt) = self.var_types.get(name) {
            if vt.is_pointer() != t.is_pointer() {
                bail!(
                    "{}:{}:{}: type error: cannot assign {} to {}",
                    self.f.name,
                    pos.line,
                    pos.col,
                    t,
                    vt
                );
            }
        }
        self.write_var(name, self.cur, v);
        self.var_types.insert(name.to_string(), t);
        Ok(v)
    }

    fn build_array_assign(&mut self, name: &str, index: &Expr, value: &Expr, pos: Span) -> Result<()> {
        if let Some(arr) = self.arrays.get(name).copied() {
            let base = self.add(Op::SlotAddr, &[arr.anchor]);
            let (idx, _) = self.build_expr(index)?;
            let scale = self.iconst(arr.elem_size as i64);
            let off = self.add(Op::Mul, &[idx, scale]);
            let ptr = self.add(Op::Add, &[base, off]);
            let (v, _) = self.build_expr(value)?;
            if arr.elem_size == 1 {
                self.add(Op::Store8, &[ptr, v]);
            } else {
                self.add(Op::Store, &[ptr, v]);
            }
            return Ok(());
        }
        if let Some(g) = self.lookup_global(name) {
            if g.array {
                let esz = if g.elem_size == 0 { 8 } else { g.elem_size };
                let base = self.global_addr(&g.name);
                let (idx, _) = self.build_expr(index)?;
                let scale = self.iconst(esz as i64);
                let off = self.add(Op::Mul, &[idx, scale]);
                let ptr = self.add(Op::Add, &[base, off]);
                let (v, _) = self.build_expr(value)?;
                if esz == 1 {
                    self.add(Op::Store8, &[ptr, v]);
                } else {
                    self.add(Op::Store, &[ptr, v]);
                }
                return Ok(());
            }
        }
        bail!("{}:{}:{}: unknown array {}", self.f.name, pos.line, pos.col, name)
    }

    fn field_addr(&mut self, base: &str, field: &str, pos: Span) -> Result<ValueId> {
        let Some(si) = self.structs.get(base).cloned() else {
            bail!("{}:{}:{}: unknown struct variable {}", self.f.name, pos.line, pos.col, base);
        };
        let fields = &self.struct_defs[&si.type_name];
        let Some(idx) = fields.iter().position(|f| f.name == field) else {
            bail!(
                "{}:{}:{}: struct {} has no field {}",
                self.f.name,
                pos.line,
                pos.col,
                si.type_name,
                field
            );
        };
        let addr = self.add(Op::SlotAddr, &[si.anchor]);
        let off = self.iconst((idx * 8) as i64);
        Ok(self.add(Op::Add, &[addr, off]))
    }

    fn field_type(&self, base: &str, field: &str) -> Type {
        self.structs
            .get(base)
            .and_then(|si| self.struct_defs.get(&si.type_name))
            .and_then(|fs| fs.iter().find(|f| f.name == field))
            .map(|f| {
                if f.ptr {
                    Type::pointer_to(Type::from_basic(f.ty, false))
                } else {
                    Type::int()
                }
            })
            .unwrap_or_else(Type::int)
    }

    fn lookup_global(&self, name: &str) -> Option<Global> {
        self.m.globals.iter().find(|g| g.name == name).cloned()
    }

    // ===== Control flow =====

    fn build_if(&mut self, cond: &Expr, then_body: &[Stmt], else_body: Option<&[Stmt]>) -> Result<()> {
        let (c, _) = self.build_expr(cond)?;
        let then_b = self.f.new_block("then");
        let else_b = self.f.new_block("else");
        let join_b = self.f.new_block("endif");
        self.append_jnz(self.cur, c, then_b, else_b);
        self.f.add_edge(self.cur, then_b);
        self.f.add_edge(self.cur, else_b);

        self.cur = then_b;
        self.build_block(then_body)?;
        if !self.terminated(self.cur) {
            self.append_jmp(self.cur, join_b);
            self.f.add_edge(self.cur, join_b);
        }

        self.cur = else_b;
        if let Some(eb) = else_body {
            self.build_block(eb)?;
        }
        if !self.terminated(self.cur) {
            self.append_jmp(self.cur, join_b);
            self.f.add_edge(self.cur, join_b);
        }

        self.seal_block(join_b)?;
        self.cur = join_b;
        Ok(())
    }

    /// Reconcile the pre-declared `declared -> header` back-edge with
    /// where the loop body actually ended. The body may close in a
    /// different block (a join from an inner if) or not fall through at
    /// all (body always breaks or returns).
    fn fix_backedge(&mut self, declared: usize, end: usize, fell_through: bool, header: usize) {
        if fell_through && end == declared {
            return;
        }
        self.f.remove_edge(declared, header);
        if fell_through {
            self.f.add_edge(end, header);
        }
    }

    fn build_while(&mut self, cond: &Expr, body: &[Stmt]) -> Result<()> {
        let cond_b = self.f.new_block("while.cond");
        let body_b = self.f.new_block("while.body");
        let exit_b = self.f.new_block("while.end");
        self.append_jmp(self.cur, cond_b);
        self.f.add_edge(self.cur, cond_b);
        // Pre-declare the back-edge so reads in the condition against
        // loop-modified variables synthesize placeholder phis.
        self.f.add_edge(body_b, cond_b);

        self.cur = cond_b;
        let (c, _) = self.build_expr(cond)?;
        let cend = self.cur;
        self.append_jnz(cend, c, body_b, exit_b);
        self.f.add_edge(cend, body_b);
        self.f.add_edge(cend, exit_b);

        self.cur = body_b;
        self.break_targets.push(exit_b);
        self.cont_targets.push(cond_b);
        self.build_block(body)?;
        self.break_targets.pop();
        self.cont_targets.pop();

        let end = self.cur;
        let fell = !self.terminated(end);
        if fell {
            self.append_jmp(end, cond_b);
        }
        self.fix_backedge(body_b, end, fell, cond_b);

        self.cur = exit_b;
        self.seal_block(cond_b)?;
        self.seal_block(exit_b)?;
        Ok(())
    }

    fn build_for(
        &mut self,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        post: Option<&Stmt>,
        body: &[Stmt],
    ) -> Result<()> {
        if let Some(s) = init {
            self.build_stmt(s)?;
        }
        let cond_b = self.f.new_block("for.cond");
        let body_b = self.f.new_block("for.body");
        let post_b = post.map(|_| self.f.new_block("for.post"));
        let exit_b = self.f.new_block("for.end");
        self.append_jmp(self.cur, cond_b);
        self.f.add_edge(self.cur, cond_b);
        // The back-edge source is the post block when there is one.
        let declared = post_b.unwrap_or(body_b);
        self.f.add_edge(declared, cond_b);

        self.cur = cond_b;
        match cond {
            Some(c) => {
                let (cv, _) = self.build_expr(c)?;
                let cend = self.cur;
                self.append_jnz(cend, cv, body_b, exit_b);
                self.f.add_edge(cend, body_b);
                self.f.add_edge(cend, exit_b);
            }
            None => {
                self.append_jmp(self.cur, body_b);
                self.f.add_edge(self.cur, body_b);
            }
        }

        self.cur = body_b;
        self.break_targets.push(exit_b);
        self.cont_targets.push(post_b.unwrap_or(cond_b));
        self.build_block(body)?;
        self.break_targets.pop();
        self.cont_targets.pop();

        match post_b {
            Some(pb) => {
                let end = self.cur;
                if !self.terminated(end) {
                    self.append_jmp(end, pb);
                    self.f.add_edge(end, pb);
                }
                // continue edges and the fall-through are all in place
                self.seal_block(pb)?;
                self.cur = pb;
                self.build_stmt(post.unwrap())?;
                let pend = self.cur;
                let fell = !self.terminated(pend);
                if fell {
                    self.append_jmp(pend, cond_b);
                }
                self.fix_backedge(pb, pend, fell, cond_b);
            }
            None => {
                let end = self.cur;
                let fell = !self.terminated(end);
                if fell {
                    self.append_jmp(end, cond_b);
                }
                self.fix_backedge(body_b, end, fell, cond_b);
            }
        }

        self.cur = exit_b;
        self.seal_block(cond_b)?;
        self.seal_block(exit_b)?;
        Ok(())
    }

    fn build_do_while(&mut self, body: &[Stmt], cond: &Expr) -> Result<()> {
        let head_b = self.f.new_block("do.head");
        let body_b = self.f.new_block("do.body");
        let cond_b = self.f.new_block("do.cond");
        let exit_b = self.f.new_block("do.end");
        self.append_jmp(self.cur, head_b);
        self.f.add_edge(self.cur, head_b);
        // Pre-declare the back-edge so reads in the header create phis.
        self.f.add_edge(cond_b, head_b);

        self.cur = head_b;
        self.append_jmp(head_b, body_b);
        self.f.add_edge(head_b, body_b);

        self.cur = body_b;
        self.break_targets.push(exit_b);
        self.cont_targets.push(cond_b);
        self.build_block(body)?;
        self.break_targets.pop();
        self.cont_targets.pop();
        if !self.terminated(self.cur) {
            let end = self.cur;
            self.append_jmp(end, cond_b);
            self.f.add_edge(end, cond_b);
        }

        self.cur = cond_b;
        let (c, _) = self.build_expr(cond)?;
        let cend = self.cur;
        self.append_jnz(cend, c, head_b, exit_b);
        if cend != cond_b {
            // The condition grew blocks; move the pre-declared back-edge.
            self.f.remove_edge(cond_b, head_b);
            self.f.add_edge(cend, head_b);
        }
        self.f.add_edge(cend, exit_b);

        self.seal_block(head_b)?;
        self.cur = exit_b;
        self.seal_block(cond_b)?;
        self.seal_block(exit_b)?;
        Ok(())
    }

    /// Lower a switch to a chain of equality-comparison blocks built in
    /// reverse so each miss edge targets the next comparison, then the
    /// default, then the exit. Case bodies fall through by omission.
    fn build_switch(&mut self, tag: &Expr, cases: &[CaseClause], default: Option<&[Stmt]>) -> Result<()> {
        let (tag_v, _) = self.build_expr(tag)?;
        let dispatch = self.cur;
        let exit_b = self.f.new_block("switch.end");
        let case_blocks: Vec<usize> = (0..cases.len())
            .map(|i| self.f.new_block(&format!("case.{}", i)))
            .collect();
        let default_b = default.map(|_| self.f.new_block("default"));

        let mut next = default_b.unwrap_or(exit_b);
        for i in (0..cases.len()).rev() {
            let cmp_b = self.f.new_block(&format!("sw.cmp.{}", i));
            self.cur = cmp_b;
            let miss = next;
            let nvals = cases[i].values.len();
            for (vi, &v) in cases[i].values.iter().enumerate() {
                let target = case_blocks[i];
                let cv = self.iconst(v);
                let cond = self.add(Op::Eq, &[tag_v, cv]);
                let fail = if vi == nvals - 1 {
                    miss
                } else {
                    self.f.new_block(&format!("sw.cmp.{}.{}", i, vi))
                };
                self.append_jnz(self.cur, cond, target, fail);
                self.f.add_edge(self.cur, target);
                self.f.add_edge(self.cur, fail);
                if vi < nvals - 1 {
                    self.cur = fail;
                }
            }
            next = cmp_b;
        }
        self.append_jmp(dispatch, next);
        self.f.add_edge(dispatch, next);

        self.break_targets.push(exit_b);
        for (i, cc) in cases.iter().enumerate() {
            // All predecessors are known now: the comparison edges plus
            // the previous case's fall-through.
            self.seal_block(case_blocks[i])?;
            self.cur = case_blocks[i];
            self.build_block(&cc.body)?;
            if !self.terminated(self.cur) {
                let ft = if i + 1 < case_blocks.len() {
                    case_blocks[i + 1]
                } else if let Some(db) = default_b {
                    db
                } else {
                    exit_b
                };
                self.append_jmp(self.cur, ft);
                self.f.add_edge(self.cur, ft);
            }
        }
        if let Some(db) = default_b {
            self.seal_block(db)?;
            self.cur = db;
            self.build_block(default.unwrap())?;
            if !self.terminated(self.cur) {
                self.append_jmp(self.cur, exit_b);
                self.f.add_edge(self.cur, exit_b);
            }
        }
        self.break_targets.pop();

        self.cur = exit_b;
        self.seal_block(exit_b)?;
        Ok(())
    }

    /// Short-circuit `&&` / `||` via a virtual result variable whose phi
    /// at the join is synthesized naturally by `read_var`.
    fn build_logical(&mut self, is_and: bool, left: &Expr, right: &Expr) -> Result<ValueId> {
        let (l, _) = self.build_expr(left)?;
        let right_b = self.f.new_block("log.right");
        let end_b = self.f.new_block("log.end");
        let tmp = format!("$t{}", self.next_id);
        if is_and {
            let z = self.iconst(0);
            self.write_var(&tmp, self.cur, z);
            self.append_jnz(self.cur, l, right_b, end_b);
            self.f.add_edge(self.cur, right_b);
            self.f.add_edge(self.cur, end_b);
        } else {
            let one = self.iconst(1);
            self.write_var(&tmp, self.cur, one);
            self.append_jnz(self.cur, l, end_b, right_b);
            self.f.add_edge(self.cur, end_b);
            self.f.add_edge(self.cur, right_b);
        }

        self.cur = right_b;
        let (r, _) = self.build_expr(right)?;
        let z = self.iconst(0);
        let norm = self.add(Op::Ne, &[r, z]);
        self.write_var(&tmp, self.cur, norm);
        self.append_jmp(self.cur, end_b);
        self.f.add_edge(self.cur, end_b);

        self.seal_block(end_b)?;
        self.cur = end_b;
        self.read_var(&tmp, end_b)
    }

    // ===== Expressions =====

    fn build_expr(&mut self, e: &Expr) -> Result<(ValueId, Type)> {
        match e {
            Expr::IntLit(v) => Ok((self.iconst(*v), Type::int())),
            Expr::StrLit(s) => {
                let label = self.intern_string(s);
                let id = self.global_addr(&label);
                Ok((id, Type::pointer_to(Type::byte())))
            }
            Expr::Ident(name) => {
                if !self.var_types.contains_key(name) {
                    if let Some(g) = self.lookup_global(name) {
                        let addr = self.global_addr(&g.name);
                        let v = if g.elem_size == 1 {
                            self.add(Op::Load8, &[addr])
                        } else {
                            self.add(Op::Load, &[addr])
                        };
                        return Ok((v, Type::int()));
                    }
                }
                let v = self.read_var(name, self.cur)?;
                let t = self.var_types.get(name).cloned().unwrap_or_else(Type::int);
                Ok((v, t))
            }
            Expr::Binary { op, lhs, rhs } => self.build_binary(*op, lhs, rhs),
            Expr::Call { name, args } => {
                let mut argv = Vec::with_capacity(args.len());
                for a in args {
                    let (v, _) = self.build_expr(a)?;
                    argv.push(v);
                }
                Ok((self.call(name, argv), Type::int()))
            }
            Expr::Index { base, index } => self.build_index(base, index),
            Expr::Unary { op, expr } => self.build_unary(*op, expr),
            Expr::Cast { to, ptr, expr } => {
                let (v, st) = self.build_expr(expr)?;
                let tt = Type::from_basic(*to, *ptr);
                if !tt.is_pointer() && !st.is_pointer() && tt.size() == 1 {
                    // narrowing to char masks the low byte
                    let m = self.iconst(0xFF);
                    return Ok((self.add(Op::And, &[v, m]), tt));
                }
                // pointer<->int and pointer<->pointer casts are no-ops
                Ok((v, tt))
            }
            Expr::Field { base, field } => {
                let Expr::Ident(name) = &**base else {
                    bail!("{}: field access requires a struct variable", self.f.name);
                };
                let pos = Span { line: 0, col: 0 };
                let ptr = self.field_addr(name, field, pos)?;
                let v = self.add(Op::Load, &[ptr]);
                Ok((v, self.field_type(name, field)))
            }
            Expr::Assign { value, .. } => {
                // Assignment inside an expression yields the stored value;
                // the binding does not escape its branch arm.
                self.build_expr(value)
            }
        }
    }

    fn build_binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<(ValueId, Type)> {
        if matches!(op, BinaryOp::LAnd | BinaryOp::LOr) {
            let v = self.build_logical(op == BinaryOp::LAnd, lhs, rhs)?;
            return Ok((v, Type::int()));
        }
        let (mut l, lt) = self.build_expr(lhs)?;
        let (mut r, rt) = self.build_expr(rhs)?;
        match op {
            BinaryOp::Add => {
                // pointer arithmetic scales the integer by the pointee size
                if lt.is_pointer() && !rt.is_pointer() {
                    let sz = lt.elem_size();
                    if sz > 1 {
                        let s = self.iconst(sz as i64);
                        r = self.add(Op::Mul, &[r, s]);
                    }
                    return Ok((self.add(Op::Add, &[l, r]), lt));
                }
                if rt.is_pointer() && !lt.is_pointer() {
                    let sz = rt.elem_size();
                    if sz > 1 {
                        let s = self.iconst(sz as i64);
                        l = self.add(Op::Mul, &[l, s]);
                    }
                    return Ok((self.add(Op::Add, &[l, r]), rt));
                }
                Ok((self.add(Op::Add, &[l, r]), Type::int()))
            }
            BinaryOp::Sub => {
                if lt.is_pointer() && !rt.is_pointer() {
                    let sz = lt.elem_size();
                    if sz > 1 {
                        let s = self.iconst(sz as i64);
                        r = self.add(Op::Mul, &[r, s]);
                    }
                    return Ok((self.add(Op::Sub, &[l, r]), lt));
                }
                if lt.is_pointer() && rt.is_pointer() {
                    // ptr - ptr yields an element count
                    let diff = self.add(Op::Sub, &[l, r]);
                    let sz = lt.elem_size();
                    if sz > 1 {
                        let d = self.iconst(sz as i64);
                        return Ok((self.add(Op::Div, &[diff, d]), Type::int()));
                    }
                    return Ok((diff, Type::int()));
                }
                Ok((self.add(Op::Sub, &[l, r]), Type::int()))
            }
            BinaryOp::Mul => Ok((self.add(Op::Mul, &[l, r]), Type::int())),
            BinaryOp::Div => Ok((self.add(Op::Div, &[l, r]), Type::int())),
            BinaryOp::Eq => Ok((self.add(Op::Eq, &[l, r]), Type::int())),
            BinaryOp::Ne => Ok((self.add(Op::Ne, &[l, r]), Type::int())),
            BinaryOp::Lt => Ok((self.add(Op::Lt, &[l, r]), Type::int())),
            BinaryOp::Le => Ok((self.add(Op::Le, &[l, r]), Type::int())),
            BinaryOp::Gt => Ok((self.add(Op::Gt, &[l, r]), Type::int())),
            BinaryOp::Ge => Ok((self.add(Op::Ge, &[l, r]), Type::int())),
            BinaryOp::BitAnd => Ok((self.add(Op::And, &[l, r]), Type::int())),
            BinaryOp::BitOr => Ok((self.add(Op::Or, &[l, r]), Type::int())),
            BinaryOp::BitXor => Ok((self.add(Op::Xor, &[l, r]), Type::int())),
            BinaryOp::Shl => Ok((self.add(Op::Shl, &[l, r]), Type::int())),
            BinaryOp::Shr => Ok((self.add(Op::Shr, &[l, r]), Type::int())),
            BinaryOp::LAnd | BinaryOp::LOr => unreachable!(),
        }
    }

    fn build_index(&mut self, base: &Expr, index: &Expr) -> Result<(ValueId, Type)> {
        if let Expr::Ident(name) = base {
            if let Some(arr) = self.arrays.get(name).copied() {
                let b = self.add(Op::SlotAddr, &[arr.anchor]);
                let (idx, _) = self.build_expr(index)?;
                let scale = self.iconst(arr.elem_size as i64);
                let off = self.add(Op::Mul, &[idx, scale]);
                let ptr = self.add(Op::Add, &[b, off]);
                let v = if arr.elem_size == 1 {
                    self.add(Op::Load8, &[ptr])
                } else {
                    self.add(Op::Load, &[ptr])
                };
                return Ok((v, Type::int()));
            }
            if let Some(g) = self.lookup_global(name) {
                if g.array {
                    let esz = if g.elem_size == 0 { 8 } else { g.elem_size };
                    let b = self.global_addr(&g.name);
                    let (idx, _) = self.build_expr(index)?;
                    let scale = self.iconst(esz as i64);
                    let off = self.add(Op::Mul, &[idx, scale]);
                    let ptr = self.add(Op::Add, &[b, off]);
                    let v = if esz == 1 {
                        self.add(Op::Load8, &[ptr])
                    } else {
                        self.add(Op::Load, &[ptr])
                    };
                    return Ok((v, Type::int()));
                }
            }
        }
        // generic pointer indexing
        let (b, bt) = self.build_expr(base)?;
        let (idx, _) = self.build_expr(index)?;
        let sz = if bt.is_pointer() { bt.elem_size() } else { 1 };
        let scale = self.iconst(sz as i64);
        let off = self.add(Op::Mul, &[idx, scale]);
        let ptr = self.add(Op::Add, &[b, off]);
        if sz == 1 {
            Ok((self.add(Op::Load8, &[ptr]), Type::byte()))
        } else {
            Ok((self.add(Op::Load, &[ptr]), Type::int()))
        }
    }

    fn build_unary(&mut self, op: UnaryOp, expr: &Expr) -> Result<(ValueId, Type)> {
        match op {
            UnaryOp::AddrOf => {
                let Expr::Ident(name) = expr else {
                    bail!("{}: address-of unsupported operand", self.f.name);
                };
                let v = self.read_var(name, self.cur)?;
                let bt = self.var_types.get(name).cloned().unwrap_or_else(Type::int);
                Ok((self.add(Op::Addr, &[v]), Type::pointer_to(bt)))
            }
            UnaryOp::Deref => {
                let (p, pt) = self.build_expr(expr)?;
                let rt = match (&pt.kind, &pt.elem) {
                    (crate::types::Kind::Ptr, Some(e)) => (**e).clone(),
                    _ => Type::int(),
                };
                let v = if rt.size() == 1 {
                    self.add(Op::Load8, &[p])
                } else {
                    self.add(Op::Load, &[p])
                };
                Ok((v, rt))
            }
            UnaryOp::Neg => {
                let (x, _) = self.build_expr(expr)?;
                let z = self.iconst(0);
                Ok((self.add(Op::Sub, &[z, x]), Type::int()))
            }
            UnaryOp::BitNot => {
                let (x, _) = self.build_expr(expr)?;
                Ok((self.add(Op::Not, &[x]), Type::int()))
            }
            UnaryOp::LogicalNot => {
                let (x, _) = self.build_expr(expr)?;
                let z = self.iconst(0);
                Ok((self.add(Op::Eq, &[x, z]), Type::int()))
            }
        }
    }

    fn intern_string(&mut self, s: &str) -> String {
        if let Some(lbl) = self.str_labels.get(s) {
            return lbl.clone();
        }
        let lbl = format!(".Lstr{}", self.m.str_lits.len());
        self.str_labels.insert(s.to_string(), lbl.clone());
        self.m.str_lits.push(StrLit { label: lbl.clone(), data: s.to_string() });
        lbl
    }
}
