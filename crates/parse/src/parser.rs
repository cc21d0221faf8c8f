use anyhow::{bail, Result};
use lex::{IntBase, Keyword as Kw, Lexer, LiteralKind, Punctuator as P, Span, Token, TokenKind as K};
use std::collections::HashMap;

use crate::ast::*;

pub struct Parser {
    toks: Vec<Token>,
    pos: usize,
    // Parse-time name resolution: typedef-names and enum constants. Neither
    // produces IR; uses resolve to the underlying type / integer literal.
    typedefs: HashMap<String, (BasicType, bool)>,
    enum_consts: HashMap<String, i64>,
}

pub fn parse_file(src: &str) -> Result<File> {
    let mut lx = Lexer::new(src);
    let mut toks = Vec::new();
    while let Some(t) = lx.next_token() {
        toks.push(t);
    }
    let mut p = Parser {
        toks,
        pos: 0,
        typedefs: HashMap::new(),
        enum_consts: HashMap::new(),
    };
    let mut decls = Vec::new();
    while p.peek().is_some() {
        decls.push(p.parse_decl()?);
    }
    Ok(File { decls })
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.toks.get(self.pos)
    }
    fn peek_kind(&self) -> Option<K> {
        self.peek().map(|t| t.kind.clone())
    }
    fn peek_kind_n(&self, n: usize) -> Option<K> {
        self.toks.get(self.pos + n).map(|t| t.kind.clone())
    }
    fn bump(&mut self) -> Option<&Token> {
        let i = self.pos;
        self.pos += 1;
        self.toks.get(i)
    }

    fn cur_span(&self) -> Span {
        self.peek()
            .map(|t| t.span)
            .or_else(|| self.toks.last().map(|t| t.span))
            .unwrap_or(Span { line: 0, col: 0 })
    }

    fn expect_punct(&mut self, p: P) -> Result<()> {
        let span = self.cur_span();
        match self.bump().map(|t| &t.kind) {
            Some(K::Punct(pp)) if *pp == p => Ok(()),
            other => bail!("{}:{}: expected {:?}, got {:?}", span.line, span.col, p, other),
        }
    }

    fn consume_punct(&mut self, p: P) -> bool {
        if let Some(K::Punct(pp)) = self.peek_kind() {
            if pp == p {
                self.pos += 1;
                return true;
            }
        }
        false
    }

    fn expect_keyword(&mut self, kw: Kw) -> Result<()> {
        let span = self.cur_span();
        match self.bump().map(|t| &t.kind) {
            Some(K::Keyword(k)) if *k == kw => Ok(()),
            other => bail!("{}:{}: expected {:?}, got {:?}", span.line, span.col, kw, other),
        }
    }

    fn consume_keyword(&mut self, kw: Kw) -> bool {
        if let Some(K::Keyword(k)) = self.peek_kind() {
            if k == kw {
                self.pos += 1;
                return true;
            }
        }
        false
    }

    fn expect_ident(&mut self) -> Result<String> {
        let span = self.cur_span();
        match self.bump().map(|t| &t.kind) {
            Some(K::Identifier(s)) => Ok(s.clone()),
            other => bail!("{}:{}: expected identifier, got {:?}", span.line, span.col, other),
        }
    }

    fn is_typedef_name(&self, s: &str) -> bool {
        self.typedefs.contains_key(s)
    }

    /// True when the current token can begin a declaration type.
    fn peek_is_type_start(&self) -> bool {
        self.kind_is_type_start(self.peek_kind())
    }

    fn kind_is_type_start(&self, k: Option<K>) -> bool {
        match k {
            Some(K::Keyword(Kw::Int | Kw::Char)) => true,
            Some(K::Identifier(s)) => self.is_typedef_name(&s),
            _ => false,
        }
    }

    /// Parse a base type name (keyword or typedef-name). Returns the basic
    /// type and whether the typedef already carried a pointer star.
    fn parse_base_type(&mut self) -> Result<(BasicType, bool)> {
        if self.consume_keyword(Kw::Int) {
            return Ok((BasicType::Int, false));
        }
        if self.consume_keyword(Kw::Char) {
            return Ok((BasicType::Char, false));
        }
        if let Some(K::Identifier(s)) = self.peek_kind() {
            if let Some(&(bt, ptr)) = self.typedefs.get(&s) {
                self.pos += 1;
                return Ok((bt, ptr));
            }
        }
        let span = self.cur_span();
        bail!("{}:{}: expected type name, got {:?}", span.line, span.col, self.peek_kind())
    }

    /// Base type plus any pointer stars collapsed into a single flag.
    fn parse_type(&mut self) -> Result<(BasicType, bool)> {
        let (bt, mut ptr) = self.parse_base_type()?;
        while self.consume_punct(P::Star) {
            ptr = true;
        }
        Ok((bt, ptr))
    }

    // ===== Top-level declarations =====

    fn parse_decl(&mut self) -> Result<Decl> {
        if self.consume_keyword(Kw::Struct) {
            return self.parse_struct_decl();
        }
        if self.consume_keyword(Kw::Enum) {
            return self.parse_enum_decl();
        }
        if self.consume_keyword(Kw::Typedef) {
            let (ty, ptr) = self.parse_type()?;
            let name = self.expect_ident()?;
            self.expect_punct(P::Semicolon)?;
            self.typedefs.insert(name.clone(), (ty, ptr));
            return Ok(Decl::Typedef(TypedefDecl { name, ty, ptr }));
        }

        let span = self.cur_span();
        let (ty, ptr) = self.parse_type()?;
        let name = self.expect_ident()?;

        if self.consume_punct(P::LParen) {
            if ptr {
                bail!(
                    "{}:{}: pointer function return types are not supported",
                    span.line,
                    span.col
                );
            }
            let params = self.parse_params()?;
            self.expect_punct(P::RParen)?;
            let body = self.parse_block()?;
            return Ok(Decl::Func(FuncDecl { name, params, ret: ty, body }));
        }

        if self.consume_punct(P::LBracket) {
            let size = self.parse_const_int()?;
            self.expect_punct(P::RBracket)?;
            self.expect_punct(P::Semicolon)?;
            if size < 0 {
                bail!("{}:{}: negative array size", span.line, span.col);
            }
            return Ok(Decl::GlobalArray(GlobalArrayDecl { name, size: size as usize, elem: ty }));
        }

        let init = if self.consume_punct(P::Assign) {
            Some(self.parse_const_int()?)
        } else {
            None
        };
        self.expect_punct(P::Semicolon)?;
        Ok(Decl::Global(GlobalDecl { name, init, ty, ptr }))
    }

    fn parse_struct_decl(&mut self) -> Result<Decl> {
        let name = self.expect_ident()?;
        self.expect_punct(P::LBrace)?;
        let mut fields = Vec::new();
        while !self.consume_punct(P::RBrace) {
            let (ty, ptr) = self.parse_type()?;
            let fname = self.expect_ident()?;
            self.expect_punct(P::Semicolon)?;
            fields.push(StructField { name: fname, ty, ptr });
        }
        self.expect_punct(P::Semicolon)?;
        Ok(Decl::Struct(StructDecl { name, fields }))
    }

    fn parse_enum_decl(&mut self) -> Result<Decl> {
        let name = self.expect_ident()?;
        self.expect_punct(P::LBrace)?;
        let mut values = Vec::new();
        let mut next = 0i64;
        loop {
            if self.consume_punct(P::RBrace) {
                break;
            }
            let ename = self.expect_ident()?;
            let v = if self.consume_punct(P::Assign) {
                self.parse_const_int()?
            } else {
                next
            };
            next = v + 1;
            self.enum_consts.insert(ename.clone(), v);
            values.push((ename, v));
            if !self.consume_punct(P::Comma) {
                self.expect_punct(P::RBrace)?;
                break;
            }
        }
        self.expect_punct(P::Semicolon)?;
        Ok(Decl::Enum(EnumDecl { name, values }))
    }

    fn parse_params(&mut self) -> Result<Vec<Param>> {
        let mut params = Vec::new();
        if matches!(self.peek_kind(), Some(K::Punct(P::RParen))) {
            return Ok(params);
        }
        if matches!(self.peek_kind(), Some(K::Keyword(Kw::Void)))
            && matches!(self.peek_kind_n(1), Some(K::Punct(P::RParen)))
        {
            self.pos += 1;
            return Ok(params);
        }
        loop {
            let (ty, ptr) = self.parse_type()?;
            let name = self.expect_ident()?;
            params.push(Param { name, ty, ptr });
            if self.consume_punct(P::Comma) {
                continue;
            }
            break;
        }
        Ok(params)
    }

    // ===== Statements =====

    fn parse_block(&mut self) -> Result<Vec<Stmt>> {
        self.expect_punct(P::LBrace)?;
        let mut stmts = Vec::new();
        while !self.consume_punct(P::RBrace) {
            if self.peek().is_none() {
                bail!("unexpected end of input in block");
            }
            stmts.push(self.parse_stmt()?);
        }
        Ok(stmts)
    }

    /// A statement's body: either a braced block or a single statement.
    fn parse_body(&mut self) -> Result<Vec<Stmt>> {
        if matches!(self.peek_kind(), Some(K::Punct(P::LBrace))) {
            self.parse_block()
        } else {
            Ok(vec![self.parse_stmt()?])
        }
    }

    fn parse_stmt(&mut self) -> Result<Stmt> {
        let pos = self.cur_span();
        match self.peek_kind() {
            Some(K::Keyword(Kw::Return)) => {
                self.pos += 1;
                let expr = self.parse_expr()?;
                self.expect_punct(P::Semicolon)?;
                Ok(Stmt::Return { expr, pos })
            }
            Some(K::Keyword(Kw::Struct)) => {
                self.pos += 1;
                let struct_name = self.expect_ident()?;
                let name = self.expect_ident()?;
                self.expect_punct(P::Semicolon)?;
                Ok(Stmt::StructVar { name, struct_name, pos })
            }
            Some(K::Punct(P::LBrace)) => Ok(Stmt::Block(self.parse_block()?)),
            Some(K::Keyword(Kw::If)) => {
                self.pos += 1;
                self.expect_punct(P::LParen)?;
                let cond = self.parse_expr()?;
                self.expect_punct(P::RParen)?;
                let then_body = self.parse_body()?;
                let else_body = if self.consume_keyword(Kw::Else) {
                    Some(self.parse_body()?)
                } else {
                    None
                };
                Ok(Stmt::If { cond, then_body, else_body })
            }
            Some(K::Keyword(Kw::While)) => {
                self.pos += 1;
                self.expect_punct(P::LParen)?;
                let cond = self.parse_expr()?;
                self.expect_punct(P::RParen)?;
                let body = self.parse_body()?;
                Ok(Stmt::While { cond, body })
            }
            Some(K::Keyword(Kw::Do)) => {
                self.pos += 1;
                let body = self.parse_body()?;
                self.expect_keyword(Kw::While)?;
                self.expect_punct(P::LParen)?;
                let cond = self.parse_expr()?;
                self.expect_punct(P::RParen)?;
                self.expect_punct(P::Semicolon)?;
                Ok(Stmt::DoWhile { body, cond })
            }
            Some(K::Keyword(Kw::For)) => {
                self.pos += 1;
                self.expect_punct(P::LParen)?;
                let init = if matches!(self.peek_kind(), Some(K::Punct(P::Semicolon))) {
                    None
                } else {
                    Some(Box::new(self.parse_simple_stmt()?))
                };
                self.expect_punct(P::Semicolon)?;
                let cond = if matches!(self.peek_kind(), Some(K::Punct(P::Semicolon))) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect_punct(P::Semicolon)?;
                let post = if matches!(self.peek_kind(), Some(K::Punct(P::RParen))) {
                    None
                } else {
                    Some(Box::new(self.parse_simple_stmt()?))
                };
                self.expect_punct(P::RParen)?;
                let body = self.parse_body()?;
                Ok(Stmt::For { init, cond, post, body })
            }
            Some(K::Keyword(Kw::Break)) => {
                self.pos += 1;
                self.expect_punct(P::Semicolon)?;
                Ok(Stmt::Break { pos })
            }
            Some(K::Keyword(Kw::Continue)) => {
                self.pos += 1;
                self.expect_punct(P::Semicolon)?;
                Ok(Stmt::Continue { pos })
            }
            Some(K::Keyword(Kw::Switch)) => self.parse_switch(),
            _ if self.peek_is_type_start() => self.parse_local_decl(pos),
            Some(K::Identifier(_)) => self.parse_ident_stmt(pos),
            _ => {
                let e = self.parse_expr()?;
                self.expect_punct(P::Semicolon)?;
                Ok(Stmt::ExprStmt(e))
            }
        }
    }

    fn parse_local_decl(&mut self, pos: Span) -> Result<Stmt> {
        let (ty, ptr) = self.parse_type()?;
        let name = self.expect_ident()?;
        if self.consume_punct(P::LBracket) {
            let size = self.parse_const_int()?;
            self.expect_punct(P::RBracket)?;
            self.expect_punct(P::Semicolon)?;
            if size < 0 {
                bail!("{}:{}: negative array size", pos.line, pos.col);
            }
            return Ok(Stmt::ArrayDecl { name, size: size as usize, elem: ty });
        }
        let init = if self.consume_punct(P::Assign) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        self.expect_punct(P::Semicolon)?;
        Ok(Stmt::Decl { name, ty, ptr, init, pos })
    }

    /// Statement starting with an identifier: plain assignment, array
    /// element assignment, field assignment, or an expression statement.
    fn parse_ident_stmt(&mut self, pos: Span) -> Result<Stmt> {
        // name = expr ;
        if matches!(self.peek_kind_n(1), Some(K::Punct(P::Assign))) {
            let name = self.expect_ident()?;
            self.pos += 1;
            let value = self.parse_expr()?;
            self.expect_punct(P::Semicolon)?;
            return Ok(Stmt::Assign { name, value, pos });
        }
        // base.field = expr ;
        if matches!(self.peek_kind_n(1), Some(K::Punct(P::Dot)))
            && matches!(self.peek_kind_n(2), Some(K::Identifier(_)))
            && matches!(self.peek_kind_n(3), Some(K::Punct(P::Assign)))
        {
            let base = self.expect_ident()?;
            self.pos += 1;
            let field = self.expect_ident()?;
            self.pos += 1;
            let value = self.parse_expr()?;
            self.expect_punct(P::Semicolon)?;
            return Ok(Stmt::FieldAssign { base, field, value, pos });
        }
        // name[index] = expr ;  (rolled back if no '=' follows the bracket)
        if matches!(self.peek_kind_n(1), Some(K::Punct(P::LBracket))) {
            let save = self.pos;
            let name = self.expect_ident()?;
            self.pos += 1;
            let index = self.parse_expr()?;
            if self.consume_punct(P::RBracket) && self.consume_punct(P::Assign) {
                let value = self.parse_expr()?;
                self.expect_punct(P::Semicolon)?;
                return Ok(Stmt::ArrayAssign { name, index, value, pos });
            }
            self.pos = save;
        }
        let e = self.parse_expr()?;
        self.expect_punct(P::Semicolon)?;
        Ok(Stmt::ExprStmt(e))
    }

    /// for-init / for-post forms, no trailing semicolon.
    fn parse_simple_stmt(&mut self) -> Result<Stmt> {
        let pos = self.cur_span();
        if self.peek_is_type_start() {
            let (ty, ptr) = self.parse_type()?;
            let name = self.expect_ident()?;
            let init = if self.consume_punct(P::Assign) {
                Some(self.parse_expr()?)
            } else {
                None
            };
            return Ok(Stmt::Decl { name, ty, ptr, init, pos });
        }
        if matches!(self.peek_kind(), Some(K::Identifier(_)))
            && matches!(self.peek_kind_n(1), Some(K::Punct(P::Assign)))
        {
            let name = self.expect_ident()?;
            self.pos += 1;
            let value = self.parse_expr()?;
            return Ok(Stmt::Assign { name, value, pos });
        }
        Ok(Stmt::ExprStmt(self.parse_expr()?))
    }

    fn parse_switch(&mut self) -> Result<Stmt> {
        self.expect_keyword(Kw::Switch)?;
        self.expect_punct(P::LParen)?;
        let tag = self.parse_expr()?;
        self.expect_punct(P::RParen)?;
        self.expect_punct(P::LBrace)?;
        let mut cases = Vec::new();
        let mut default = None;
        loop {
            match self.peek_kind() {
                Some(K::Punct(P::RBrace)) => {
                    self.pos += 1;
                    break;
                }
                Some(K::Keyword(Kw::Case)) => {
                    // One or more labels sharing a body.
                    let mut values = Vec::new();
                    while self.consume_keyword(Kw::Case) {
                        values.push(self.parse_const_int()?);
                        self.expect_punct(P::Colon)?;
                    }
                    let body = self.parse_case_body()?;
                    cases.push(CaseClause { values, body });
                }
                Some(K::Keyword(Kw::Default)) => {
                    self.pos += 1;
                    self.expect_punct(P::Colon)?;
                    default = Some(self.parse_case_body()?);
                }
                other => {
                    let span = self.cur_span();
                    bail!("{}:{}: unexpected token in switch: {:?}", span.line, span.col, other);
                }
            }
        }
        Ok(Stmt::Switch { tag, cases, default })
    }

    fn parse_case_body(&mut self) -> Result<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            match self.peek_kind() {
                Some(K::Keyword(Kw::Case | Kw::Default)) | Some(K::Punct(P::RBrace)) | None => break,
                _ => stmts.push(self.parse_stmt()?),
            }
        }
        Ok(stmts)
    }

    // ===== Expressions =====
    //
    // Standard C precedence, restricted to the supported operator set:
    //   assign > || > && > | > ^ > & > ==/!= > relational > shifts
    //   > +/- > */ / > unary > postfix > primary

    fn parse_expr(&mut self) -> Result<Expr> {
        if matches!(self.peek_kind(), Some(K::Identifier(_)))
            && matches!(self.peek_kind_n(1), Some(K::Punct(P::Assign)))
        {
            let name = self.expect_ident()?;
            self.pos += 1;
            let value = self.parse_expr()?;
            return Ok(Expr::Assign { name, value: Box::new(value) });
        }
        self.parse_logical_or()
    }

    fn parse_logical_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_logical_and()?;
        while self.consume_punct(P::OrOr) {
            let right = self.parse_logical_and()?;
            left = Expr::Binary { op: BinaryOp::LOr, lhs: Box::new(left), rhs: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_logical_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_bit_or()?;
        while self.consume_punct(P::AndAnd) {
            let right = self.parse_bit_or()?;
            left = Expr::Binary { op: BinaryOp::LAnd, lhs: Box::new(left), rhs: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_bit_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_bit_xor()?;
        while self.consume_punct(P::Pipe) {
            let right = self.parse_bit_xor()?;
            left = Expr::Binary { op: BinaryOp::BitOr, lhs: Box::new(left), rhs: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_bit_xor(&mut self) -> Result<Expr> {
        let mut left = self.parse_bit_and()?;
        while self.consume_punct(P::Caret) {
            let right = self.parse_bit_and()?;
            left = Expr::Binary { op: BinaryOp::BitXor, lhs: Box::new(left), rhs: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_bit_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_equality()?;
        while matches!(self.peek_kind(), Some(K::Punct(P::Amp))) {
            self.pos += 1;
            let right = self.parse_equality()?;
            left = Expr::Binary { op: BinaryOp::BitAnd, lhs: Box::new(left), rhs: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek_kind() {
                Some(K::Punct(P::Eq)) => BinaryOp::Eq,
                Some(K::Punct(P::Ne)) => BinaryOp::Ne,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_relational()?;
            left = Expr::Binary { op, lhs: Box::new(left), rhs: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<Expr> {
        let mut left = self.parse_shift()?;
        loop {
            let op = match self.peek_kind() {
                Some(K::Punct(P::Lt)) => BinaryOp::Lt,
                Some(K::Punct(P::Le)) => BinaryOp::Le,
                Some(K::Punct(P::Gt)) => BinaryOp::Gt,
                Some(K::Punct(P::Ge)) => BinaryOp::Ge,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_shift()?;
            left = Expr::Binary { op, lhs: Box::new(left), rhs: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_shift(&mut self) -> Result<Expr> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek_kind() {
                Some(K::Punct(P::Shl)) => BinaryOp::Shl,
                Some(K::Punct(P::Shr)) => BinaryOp::Shr,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_additive()?;
            left = Expr::Binary { op, lhs: Box::new(left), rhs: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek_kind() {
                Some(K::Punct(P::Plus)) => BinaryOp::Add,
                Some(K::Punct(P::Minus)) => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_multiplicative()?;
            left = Expr::Binary { op, lhs: Box::new(left), rhs: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek_kind() {
                Some(K::Punct(P::Star)) => BinaryOp::Mul,
                Some(K::Punct(P::Slash)) => BinaryOp::Div,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expr::Binary { op, lhs: Box::new(left), rhs: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let op = match self.peek_kind() {
            Some(K::Punct(P::Amp)) => Some(UnaryOp::AddrOf),
            Some(K::Punct(P::Star)) => Some(UnaryOp::Deref),
            Some(K::Punct(P::Minus)) => Some(UnaryOp::Neg),
            Some(K::Punct(P::Tilde)) => Some(UnaryOp::BitNot),
            Some(K::Punct(P::Bang)) => Some(UnaryOp::LogicalNot),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let x = self.parse_unary()?;
            return Ok(Expr::Unary { op, expr: Box::new(x) });
        }
        // Cast: '(' type-name ')' unary
        if matches!(self.peek_kind(), Some(K::Punct(P::LParen)))
            && self.kind_is_type_start(self.peek_kind_n(1))
        {
            self.pos += 1;
            let (to, ptr) = self.parse_type()?;
            self.expect_punct(P::RParen)?;
            let x = self.parse_unary()?;
            return Ok(Expr::Cast { to, ptr, expr: Box::new(x) });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut e = self.parse_primary()?;
        loop {
            if self.consume_punct(P::LBracket) {
                let index = self.parse_expr()?;
                self.expect_punct(P::RBracket)?;
                e = Expr::Index { base: Box::new(e), index: Box::new(index) };
                continue;
            }
            if matches!(self.peek_kind(), Some(K::Punct(P::Dot))) {
                self.pos += 1;
                let field = self.expect_ident()?;
                e = Expr::Field { base: Box::new(e), field };
                continue;
            }
            break;
        }
        Ok(e)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let span = self.cur_span();
        match self.peek_kind() {
            Some(K::Identifier(name)) => {
                self.pos += 1;
                if self.consume_punct(P::LParen) {
                    let mut args = Vec::new();
                    if !matches!(self.peek_kind(), Some(K::Punct(P::RParen))) {
                        loop {
                            args.push(self.parse_expr()?);
                            if self.consume_punct(P::Comma) {
                                continue;
                            }
                            break;
                        }
                    }
                    self.expect_punct(P::RParen)?;
                    return Ok(Expr::Call { name, args });
                }
                if let Some(&v) = self.enum_consts.get(&name) {
                    return Ok(Expr::IntLit(v));
                }
                Ok(Expr::Ident(name))
            }
            Some(K::Literal(LiteralKind::Int { base, repr })) => {
                self.pos += 1;
                Ok(Expr::IntLit(parse_int_repr(base, &repr)?))
            }
            Some(K::Literal(LiteralKind::Char { repr })) => {
                self.pos += 1;
                Ok(Expr::IntLit(decode_char_repr(&repr)?))
            }
            Some(K::Literal(LiteralKind::Str { repr })) => {
                self.pos += 1;
                Ok(Expr::StrLit(decode_str_repr(&repr)))
            }
            Some(K::Punct(P::LParen)) => {
                self.pos += 1;
                let e = self.parse_expr()?;
                self.expect_punct(P::RParen)?;
                Ok(e)
            }
            other => bail!("{}:{}: unexpected token {:?}", span.line, span.col, other),
        }
    }

    /// Integer constant for case labels, enum values, array sizes and
    /// global initializers: optionally negated int/char literal or an
    /// already-known enum constant.
    fn parse_const_int(&mut self) -> Result<i64> {
        let neg = self.consume_punct(P::Minus);
        let span = self.cur_span();
        let v = match self.peek_kind() {
            Some(K::Literal(LiteralKind::Int { base, repr })) => {
                self.pos += 1;
                parse_int_repr(base, &repr)?
            }
            Some(K::Literal(LiteralKind::Char { repr })) => {
                self.pos += 1;
                decode_char_repr(&repr)?
            }
            Some(K::Identifier(name)) => match self.enum_consts.get(&name) {
                Some(&v) => {
                    self.pos += 1;
                    v
                }
                None => bail!("{}:{}: expected integer constant, got {}", span.line, span.col, name),
            },
            other => bail!("{}:{}: expected integer constant, got {:?}", span.line, span.col, other),
        };
        Ok(if neg { -v } else { v })
    }
}

fn parse_int_repr(base: IntBase, repr: &str) -> Result<i64> {
    let v = match base {
        IntBase::Dec => repr.parse::<i64>()?,
        IntBase::Hex => i64::from_str_radix(&repr[2..], 16)?,
        IntBase::Oct => {
            if repr == "0" {
                0
            } else {
                i64::from_str_radix(&repr[1..], 8)?
            }
        }
    };
    Ok(v)
}

fn decode_char_repr(repr: &str) -> Result<i64> {
    let inner = repr.trim_start_matches('\'').trim_end_matches('\'');
    let bytes = decode_escapes(inner);
    match bytes.first() {
        Some(&b) => Ok(b as i64),
        None => bail!("empty char literal"),
    }
}

fn decode_str_repr(repr: &str) -> String {
    if repr.len() < 2 {
        return String::new();
    }
    let inner = &repr[1..repr.len() - 1];
    String::from_utf8_lossy(&decode_escapes(inner)).into_owned()
}

fn decode_escapes(s: &str) -> Vec<u8> {
    let mut out = Vec::new();
    let mut it = s.bytes();
    while let Some(b) = it.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match it.next() {
            Some(b'n') => out.push(b'\n'),
            Some(b't') => out.push(b'\t'),
            Some(b'r') => out.push(b'\r'),
            Some(b'0') => out.push(0),
            Some(b'\\') => out.push(b'\\'),
            Some(b'\'') => out.push(b'\''),
            Some(b'"') => out.push(b'"'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}
