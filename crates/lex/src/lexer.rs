use crate::keywords::to_keyword;
use crate::token::{IntBase, LiteralKind, Punctuator as P, Span, Token, TokenKind as K};

pub struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    len: usize,
    pos: usize,
    line: u32,
    line_start: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            len: src.len(),
            pos: 0,
            line: 1,
            line_start: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.line_start = self.pos;
        }
        Some(c)
    }

    fn starts_with(&self, s: &str) -> bool {
        self.bytes
            .get(self.pos..)
            .is_some_and(|rest| rest.starts_with(s.as_bytes()))
    }

    fn span_at(&self, start: usize, line: u32, line_start: usize) -> Span {
        Span {
            line,
            col: (start - line_start + 1) as u32,
        }
    }

    fn is_ident_start(c: u8) -> bool {
        (c == b'_') || (c as char).is_ascii_alphabetic()
    }
    fn is_ident_continue(c: u8) -> bool {
        (c == b'_') || (c as char).is_ascii_alphanumeric()
    }

    fn skip_ws_and_comments(&mut self) {
        loop {
            while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | b'\n' | 0x0C)) {
                let _ = self.bump();
            }
            if self.starts_with("//") {
                self.pos += 2;
                while let Some(c) = self.peek() {
                    let _ = self.bump();
                    if c == b'\n' {
                        break;
                    }
                }
                continue;
            }
            if self.starts_with("/*") {
                self.pos += 2;
                while self.pos < self.len && !self.starts_with("*/") {
                    let _ = self.bump();
                }
                if self.starts_with("*/") {
                    self.pos += 2;
                }
                continue;
            }
            break;
        }
    }

    pub fn next_token(&mut self) -> Option<Token> {
        self.skip_ws_and_comments();
        let start = self.pos;
        let (line, line_start) = (self.line, self.line_start);
        let span = |lx: &Self| lx.span_at(start, line, line_start);
        let c = self.peek()?;

        // Identifier or keyword
        if Self::is_ident_start(c) {
            self.bump();
            while let Some(c2) = self.peek() {
                if Self::is_ident_continue(c2) {
                    self.pos += 1;
                } else {
                    break;
                }
            }
            let lex = &self.src[start..self.pos];
            let kind = if let Some(kw) = to_keyword(lex) {
                K::Keyword(kw)
            } else {
                K::Identifier(lex.to_string())
            };
            return Some(Token { kind, span: span(self) });
        }

        // Integer literal: dec/oct/hex
        if (c as char).is_ascii_digit() {
            let base = if self.starts_with("0x") || self.starts_with("0X") {
                self.pos += 2;
                while let Some(ch) = self.peek() {
                    if (ch as char).is_ascii_hexdigit() {
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
                IntBase::Hex
            } else if c == b'0' {
                self.pos += 1;
                while let Some(ch) = self.peek() {
                    if (b'0'..=b'7').contains(&ch) {
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
                IntBase::Oct
            } else {
                self.pos += 1;
                while let Some(ch) = self.peek() {
                    if (ch as char).is_ascii_digit() {
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
                IntBase::Dec
            };
            let repr = self.src[start..self.pos].to_string();
            return Some(Token {
                kind: K::Literal(LiteralKind::Int { base, repr }),
                span: span(self),
            });
        }

        // String literal (repr keeps the quotes; decoding happens in the parser)
        if c == b'"' {
            self.bump();
            while let Some(ch) = self.bump() {
                match ch {
                    b'\\' => {
                        let _ = self.bump();
                    }
                    b'"' => break,
                    _ => {}
                }
            }
            let repr = self.src[start..self.pos].to_string();
            return Some(Token {
                kind: K::Literal(LiteralKind::Str { repr }),
                span: span(self),
            });
        }

        // Char literal
        if c == b'\'' {
            self.bump();
            if let Some(ch) = self.bump() {
                if ch == b'\\' {
                    let _ = self.bump();
                }
            }
            let _ = self.bump(); // closing '
            let repr = self.src[start..self.pos].to_string();
            return Some(Token {
                kind: K::Literal(LiteralKind::Char { repr }),
                span: span(self),
            });
        }

        // Punctuators, longest match first
        let two: &[(&str, P)] = &[
            ("<=", P::Le),
            (">=", P::Ge),
            ("==", P::Eq),
            ("!=", P::Ne),
            ("&&", P::AndAnd),
            ("||", P::OrOr),
            ("<<", P::Shl),
            (">>", P::Shr),
        ];
        for (s, p) in two {
            if self.starts_with(s) {
                self.pos += 2;
                return Some(Token {
                    kind: K::Punct(*p),
                    span: span(self),
                });
            }
        }

        let ch = self.bump().unwrap();
        let pk = match ch {
            b'(' => P::LParen,
            b')' => P::RParen,
            b'{' => P::LBrace,
            b'}' => P::RBrace,
            b'[' => P::LBracket,
            b']' => P::RBracket,
            b';' => P::Semicolon,
            b',' => P::Comma,
            b'.' => P::Dot,
            b':' => P::Colon,
            b'+' => P::Plus,
            b'-' => P::Minus,
            b'*' => P::Star,
            b'/' => P::Slash,
            b'&' => P::Amp,
            b'|' => P::Pipe,
            b'^' => P::Caret,
            b'~' => P::Tilde,
            b'!' => P::Bang,
            b'=' => P::Assign,
            b'<' => P::Lt,
            b'>' => P::Gt,
            _ => {
                return Some(Token {
                    kind: K::Identifier((ch as char).to_string()),
                    span: span(self),
                });
            }
        };
        Some(Token {
            kind: K::Punct(pk),
            span: span(self),
        })
    }
}
