pub mod keywords;
mod lexer;
pub mod token;

pub use lexer::Lexer;
pub use token::{IntBase, Keyword, LiteralKind, Punctuator, Span, Token, TokenKind};

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_all(src: &str) -> Vec<Token> {
        let mut lx = Lexer::new(src);
        std::iter::from_fn(|| lx.next_token()).collect()
    }

    #[test]
    fn lex_ident_keyword_number() {
        let toks = lex_all("int x = 42;");
        use TokenKind as K;
        assert!(matches!(toks[0].kind, K::Keyword(Keyword::Int)));
        assert!(matches!(toks[1].kind, K::Identifier(ref s) if s == "x"));
        assert!(matches!(toks[2].kind, K::Punct(Punctuator::Assign)));
        assert!(matches!(
            toks[3].kind,
            K::Literal(LiteralKind::Int { base: IntBase::Dec, .. })
        ));
        assert!(matches!(toks[4].kind, K::Punct(Punctuator::Semicolon)));
    }

    #[test]
    fn lex_longest_match_punctuators() {
        let toks = lex_all("a <= b << 1 && c == d");
        use TokenKind as K;
        assert!(matches!(toks[1].kind, K::Punct(Punctuator::Le)));
        assert!(matches!(toks[3].kind, K::Punct(Punctuator::Shl)));
        assert!(matches!(toks[5].kind, K::Punct(Punctuator::AndAnd)));
        assert!(matches!(toks[7].kind, K::Punct(Punctuator::Eq)));
    }

    #[test]
    fn lex_hex_and_octal() {
        let toks = lex_all("0x1F 017");
        use TokenKind as K;
        assert!(matches!(
            toks[0].kind,
            K::Literal(LiteralKind::Int { base: IntBase::Hex, ref repr }) if repr == "0x1F"
        ));
        assert!(matches!(
            toks[1].kind,
            K::Literal(LiteralKind::Int { base: IntBase::Oct, ref repr }) if repr == "017"
        ));
    }

    #[test]
    fn lex_char_and_string() {
        let toks = lex_all(r#"'a' "hi\n""#);
        use TokenKind as K;
        assert!(matches!(toks[0].kind, K::Literal(LiteralKind::Char { ref repr }) if repr == "'a'"));
        assert!(matches!(toks[1].kind, K::Literal(LiteralKind::Str { ref repr }) if repr == "\"hi\\n\""));
    }

    #[test]
    fn lex_spans_track_lines() {
        let toks = lex_all("int x;\nint y;");
        assert_eq!(toks[0].span.line, 1);
        assert_eq!(toks[3].span.line, 2);
        assert_eq!(toks[3].span.col, 1);
    }

    #[test]
    fn lex_skips_comments() {
        let toks = lex_all("a // line\n/* block\n */ b");
        assert_eq!(toks.len(), 2);
        assert!(matches!(toks[1].kind, TokenKind::Identifier(ref s) if s == "b"));
        assert_eq!(toks[1].span.line, 3);
    }
}
