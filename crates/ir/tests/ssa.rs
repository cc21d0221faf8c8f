use ir::{build_module, Function, Module, Op};
use parse::parse_file;

fn build(src: &str) -> Module {
    let file = parse_file(src).unwrap();
    let mut m = Module::new("test");
    build_module(&file, &mut m).unwrap();
    m
}

fn build_err(src: &str) -> String {
    let file = parse_file(src).unwrap();
    let mut m = Module::new("test");
    build_module(&file, &mut m).unwrap_err().to_string()
}

fn check_edge_symmetry(f: &Function) {
    for (bi, b) in f.blocks.iter().enumerate() {
        for &s in &b.succs {
            let fwd = b.succs.iter().filter(|&&x| x == s).count();
            let bwd = f.blocks[s].preds.iter().filter(|&&p| p == bi).count();
            assert_eq!(fwd, bwd, "{}: edge {} -> {} asymmetric", f.name, b.label, f.blocks[s].label);
        }
        for &p in &b.preds {
            let bwd = b.preds.iter().filter(|&&x| x == p).count();
            let fwd = f.blocks[p].succs.iter().filter(|&&s| s == bi).count();
            assert_eq!(fwd, bwd, "{}: edge {} -> {} asymmetric", f.name, f.blocks[p].label, b.label);
        }
    }
}

fn check_terminators_last(f: &Function) {
    for b in &f.blocks {
        for ins in b.instrs.iter().take(b.instrs.len().saturating_sub(1)) {
            assert!(!ins.is_terminator(), "{}: terminator not last in {}", f.name, b.label);
        }
    }
}

fn check_phi_shape(f: &Function) {
    for b in &f.blocks {
        let mut seen_non_phi = false;
        for ins in &b.instrs {
            if ins.val.op == Op::Phi {
                assert!(!seen_non_phi, "{}: phi after non-phi in {}", f.name, b.label);
                assert_eq!(
                    ins.val.args.len(),
                    b.preds.len(),
                    "{}: phi operand count mismatch in {}",
                    f.name,
                    b.label
                );
            } else {
                seen_non_phi = true;
            }
        }
    }
}

#[test]
fn straight_line_function_builds_single_block() {
    let m = build("int main() { int x = 1; return x; }");
    assert_eq!(m.funcs.len(), 1);
    let f = &m.funcs[0];
    assert_eq!(f.blocks.len(), 1);
    assert!(f.blocks[0].is_terminated());
    check_edge_symmetry(f);
}

#[test]
fn if_else_creates_join_block() {
    let m = build("int main() { int x = 0; if (x) x = 1; else x = 2; return x; }");
    let f = &m.funcs[0];
    assert!(f.blocks.iter().any(|b| b.label.starts_with("then")));
    assert!(f.blocks.iter().any(|b| b.label.starts_with("else")));
    let join = f.blocks.iter().find(|b| b.label.starts_with("endif")).unwrap();
    assert_eq!(join.preds.len(), 2);
    // x merges at the join
    assert!(join.instrs.iter().any(|i| i.val.op == Op::Phi));
    check_edge_symmetry(f);
    check_terminators_last(f);
    check_phi_shape(f);
}

#[test]
fn while_loop_header_gets_phi_and_is_sealed() {
    let m = build("int main() { int i = 0; while (i < 10) i = i + 1; return i; }");
    let f = &m.funcs[0];
    let cond = f.blocks.iter().find(|b| b.label.starts_with("while.cond")).unwrap();
    assert!(cond.sealed);
    assert_eq!(cond.preds.len(), 2, "entry and back-edge");
    let phi = cond.instrs.iter().find(|i| i.val.op == Op::Phi).unwrap();
    assert_eq!(phi.val.args.len(), 2);
    check_edge_symmetry(f);
    check_terminators_last(f);
    check_phi_shape(f);
}

#[test]
fn while_body_ending_in_inner_join_rewires_backedge() {
    let m = build(
        "int main() { int i = 0; while (i < 10) { if (i > 4) i = i + 2; else i = i + 1; } return i; }",
    );
    let f = &m.funcs[0];
    let cond_idx = f.blocks.iter().position(|b| b.label.starts_with("while.cond")).unwrap();
    let body_idx = f.blocks.iter().position(|b| b.label.starts_with("while.body")).unwrap();
    // The pre-declared body -> cond edge must have moved to the inner join.
    assert!(!f.blocks[body_idx].succs.contains(&cond_idx));
    let join_idx = f.blocks.iter().position(|b| b.label.starts_with("endif")).unwrap();
    assert!(f.blocks[join_idx].succs.contains(&cond_idx));
    check_edge_symmetry(f);
    check_terminators_last(f);
    check_phi_shape(f);
}

#[test]
fn loop_body_that_always_breaks_leaves_no_backedge() {
    let m = build("int main() { int n = 0; while (1) { n = n + 1; break; } return n; }");
    let f = &m.funcs[0];
    let cond = f.blocks.iter().find(|b| b.label.starts_with("while.cond")).unwrap();
    assert_eq!(cond.preds.len(), 1, "only the entry edge remains");
    check_edge_symmetry(f);
    check_terminators_last(f);
    check_phi_shape(f);
}

#[test]
fn for_loop_routes_backedge_through_post_block() {
    let m = build("int main() { int s = 0; for (int i = 0; i < 5; i = i + 1) s = s + i; return s; }");
    let f = &m.funcs[0];
    let cond_idx = f.blocks.iter().position(|b| b.label.starts_with("for.cond")).unwrap();
    let post_idx = f.blocks.iter().position(|b| b.label.starts_with("for.post")).unwrap();
    assert!(f.blocks[post_idx].succs.contains(&cond_idx));
    assert!(f.blocks[cond_idx].sealed);
    check_edge_symmetry(f);
    check_terminators_last(f);
    check_phi_shape(f);
}

#[test]
fn do_while_pre_declares_cond_to_head_edge() {
    let m = build("int main() { int i = 0; do { i = i + 1; } while (i < 3); return i; }");
    let f = &m.funcs[0];
    let head = f.blocks.iter().find(|b| b.label.starts_with("do.head")).unwrap();
    assert_eq!(head.preds.len(), 2, "entry and the conditional back-jump");
    assert!(head.instrs.iter().any(|i| i.val.op == Op::Phi));
    check_edge_symmetry(f);
    check_terminators_last(f);
    check_phi_shape(f);
}

#[test]
fn switch_lowered_to_comparison_cascade() {
    let m = build(
        "int main() { switch (2) { case 1: return 1; case 2: case 3: return 23; default: return 0; } }",
    );
    let f = &m.funcs[0];
    let cmps = f.blocks.iter().filter(|b| b.label.starts_with("sw.cmp")).count();
    assert!(cmps >= 3, "one block per case label, got {}", cmps);
    assert!(f.blocks.iter().any(|b| b.label.starts_with("default")));
    check_edge_symmetry(f);
    check_terminators_last(f);
    check_phi_shape(f);
}

#[test]
fn short_circuit_and_produces_branchy_form() {
    let m = build("int main() { int x = 1; int y = 2; return x && y; }");
    let f = &m.funcs[0];
    assert!(f.blocks.iter().any(|b| b.label.starts_with("log.right")));
    let end = f.blocks.iter().find(|b| b.label.starts_with("log.end")).unwrap();
    assert!(end.instrs.iter().any(|i| i.val.op == Op::Phi));
    check_edge_symmetry(f);
    check_phi_shape(f);
}

#[test]
fn params_lead_the_entry_block() {
    let m = build("int f(int a, int b) { return a + b; } int main() { return f(1, 2); }");
    let f = &m.funcs[0];
    assert_eq!(f.params, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(f.blocks[f.entry].instrs[0].val.op, Op::Param);
    assert_eq!(f.blocks[f.entry].instrs[1].val.op, Op::Param);
}

#[test]
fn pointer_arithmetic_scales_by_pointee_size() {
    let m = build("int main() { int x = 42; int *p = &x; int *r = p + 2; return r - p; }");
    let f = &m.funcs[0];
    // p + 2 multiplies the index by 8, and r - p divides the byte
    // difference back down
    let entry = &f.blocks[f.entry];
    assert!(entry.instrs.iter().any(|i| i.val.op == Op::Mul));
    assert!(entry.instrs.iter().any(|i| i.val.op == Op::Div));
    assert!(entry.instrs.iter().any(|i| i.val.op == Op::Addr));
}

#[test]
fn char_array_uses_byte_width_accesses() {
    let m = build("int main() { char b[4]; b[0] = 65; return b[0]; }");
    let f = &m.funcs[0];
    let entry = &f.blocks[f.entry];
    assert!(entry.instrs.iter().any(|i| i.val.op == Op::Store8));
    assert!(entry.instrs.iter().any(|i| i.val.op == Op::Load8));
}

#[test]
fn global_reads_and_writes_use_global_addr() {
    let m = build("int g = 3; int main() { g = g + 1; return g; }");
    assert_eq!(m.globals.len(), 1);
    assert_eq!(m.globals[0].init, 3);
    let f = &m.funcs[0];
    let entry = &f.blocks[f.entry];
    assert!(entry.instrs.iter().any(|i| i.val.op == Op::GlobalAddr));
    assert!(entry.instrs.iter().any(|i| i.val.op == Op::Store));
}

#[test]
fn string_literals_are_interned_once() {
    let m = build(r#"int main() { char *a = "hi"; char *b = "hi"; return 0; }"#);
    assert_eq!(m.str_lits.len(), 1);
    assert_eq!(m.str_lits[0].data, "hi");
}

#[test]
fn error_undefined_variable() {
    let msg = build_err("int main() { return zzz; }");
    assert!(msg.contains("undefined variable zzz"), "{}", msg);
}

#[test]
fn error_break_outside_loop() {
    let msg = build_err("int main() { break; return 0; }");
    assert!(msg.contains("break outside"), "{}", msg);
}

#[test]
fn error_continue_outside_loop() {
    let msg = build_err("int main() { continue; return 0; }");
    assert!(msg.contains("continue outside"), "{}", msg);
}

#[test]
fn error_pointer_return_from_int_function() {
    let msg = build_err("int main() { int x = 0; int *p = &x; return p; }");
    assert!(msg.contains("returning pointer"), "{}", msg);
}

#[test]
fn error_pointer_to_int_assignment() {
    let msg = build_err("int main() { int x = 0; int *p = &x; x = p; return 0; }");
    assert!(msg.contains("cannot assign"), "{}", msg);
}

#[test]
fn error_unknown_array() {
    let msg = build_err("int main() { q[0] = 1; return 0; }");
    assert!(msg.contains("unknown array"), "{}", msg);
}

#[test]
fn error_messages_carry_position() {
    let msg = build_err("int main() {\n  break;\n}");
    assert!(msg.contains("main:2:"), "{}", msg);
}
