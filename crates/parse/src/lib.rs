pub mod ast;
mod parser;

pub use ast::*;
pub use parser::parse_file;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_main() {
        let f = parse_file("int main() { return 2+3*4; }").unwrap();
        assert_eq!(f.decls.len(), 1);
        let Decl::Func(func) = &f.decls[0] else { panic!("expected function") };
        assert_eq!(func.name, "main");
        assert_eq!(func.ret, BasicType::Int);
        assert!(matches!(func.body[0], Stmt::Return { .. }));
    }

    #[test]
    fn parse_precedence_mul_before_add() {
        let f = parse_file("int main() { return 2+3*4; }").unwrap();
        let Decl::Func(func) = &f.decls[0] else { panic!() };
        let Stmt::Return { expr, .. } = &func.body[0] else { panic!() };
        let Expr::Binary { op: BinaryOp::Add, rhs, .. } = expr else {
            panic!("expected + at the top: {:?}", expr)
        };
        assert!(matches!(**rhs, Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn parse_params_and_pointers() {
        let f = parse_file("int f(int n, char *s) { return n; }").unwrap();
        let Decl::Func(func) = &f.decls[0] else { panic!() };
        assert_eq!(func.params.len(), 2);
        assert!(!func.params[0].ptr);
        assert!(func.params[1].ptr);
        assert_eq!(func.params[1].ty, BasicType::Char);
    }

    #[test]
    fn parse_globals_and_arrays() {
        let f = parse_file("int g = 5; int a[10]; char c; int main() { return g; }").unwrap();
        assert!(matches!(
            f.decls[0],
            Decl::Global(GlobalDecl { init: Some(5), ty: BasicType::Int, .. })
        ));
        assert!(matches!(
            f.decls[1],
            Decl::GlobalArray(GlobalArrayDecl { size: 10, elem: BasicType::Int, .. })
        ));
        assert!(matches!(
            f.decls[2],
            Decl::Global(GlobalDecl { init: None, ty: BasicType::Char, .. })
        ));
    }

    #[test]
    fn parse_switch_multi_label() {
        let f = parse_file(
            "int main() { switch(2){ case 1: return 1; case 2: case 3: return 23; default: return 0; } }",
        )
        .unwrap();
        let Decl::Func(func) = &f.decls[0] else { panic!() };
        let Stmt::Switch { cases, default, .. } = &func.body[0] else { panic!() };
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[1].values, vec![2, 3]);
        assert!(default.is_some());
    }

    #[test]
    fn parse_enum_constants_resolve_to_literals() {
        let f = parse_file("enum E { A, B = 5, C }; int main() { return C; }").unwrap();
        let Decl::Enum(e) = &f.decls[0] else { panic!() };
        assert_eq!(e.values, vec![("A".into(), 0), ("B".into(), 5), ("C".into(), 6)]);
        let Decl::Func(func) = &f.decls[1] else { panic!() };
        let Stmt::Return { expr, .. } = &func.body[0] else { panic!() };
        assert_eq!(*expr, Expr::IntLit(6));
    }

    #[test]
    fn parse_typedef_as_type_name() {
        let f = parse_file("typedef int word; int main() { word x = 3; return x; }").unwrap();
        let Decl::Func(func) = &f.decls[1] else { panic!() };
        assert!(matches!(
            func.body[0],
            Stmt::Decl { ty: BasicType::Int, ptr: false, .. }
        ));
    }

    #[test]
    fn parse_struct_decl_and_field_assign() {
        let f = parse_file(
            "struct P { int x; int y; }; int main() { struct P p; p.x = 1; return p.x; }",
        )
        .unwrap();
        let Decl::Struct(s) = &f.decls[0] else { panic!() };
        assert_eq!(s.fields.len(), 2);
        let Decl::Func(func) = &f.decls[1] else { panic!() };
        assert!(matches!(func.body[0], Stmt::StructVar { .. }));
        assert!(matches!(func.body[1], Stmt::FieldAssign { .. }));
    }

    #[test]
    fn parse_assignment_expression_in_condition() {
        let f = parse_file("int main() { int y = 0; if (1 && (y = 7)) return y; return y; }").unwrap();
        let Decl::Func(func) = &f.decls[0] else { panic!() };
        let Stmt::If { cond, .. } = &func.body[1] else { panic!() };
        let Expr::Binary { op: BinaryOp::LAnd, rhs, .. } = cond else { panic!() };
        assert!(matches!(**rhs, Expr::Assign { .. }));
    }

    #[test]
    fn parse_char_and_string_literals() {
        let f = parse_file(r#"int main() { char *s = "hi\n"; return 'A'; }"#).unwrap();
        let Decl::Func(func) = &f.decls[0] else { panic!() };
        let Stmt::Decl { init: Some(Expr::StrLit(s)), .. } = &func.body[0] else { panic!() };
        assert_eq!(s, "hi\n");
        let Stmt::Return { expr, .. } = &func.body[1] else { panic!() };
        assert_eq!(*expr, Expr::IntLit(65));
    }

    #[test]
    fn parse_index_rvalue_not_taken_for_assignment() {
        let f = parse_file("int main() { int a[2]; a[0] = 1; return a[0] + 1; }").unwrap();
        let Decl::Func(func) = &f.decls[0] else { panic!() };
        assert!(matches!(func.body[1], Stmt::ArrayAssign { .. }));
        let Stmt::Return { expr, .. } = &func.body[2] else { panic!() };
        assert!(matches!(expr, Expr::Binary { op: BinaryOp::Add, .. }));
    }

    #[test]
    fn parse_rejects_pointer_return_type() {
        assert!(parse_file("int *f() { return 0; }").is_err());
    }
}
