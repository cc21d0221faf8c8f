use crate::token::Keyword;

pub fn to_keyword(s: &str) -> Option<Keyword> {
    use Keyword::*;
    Some(match s {
        "break" => Break,
        "case" => Case,
        "char" => Char,
        "continue" => Continue,
        "default" => Default,
        "do" => Do,
        "else" => Else,
        "enum" => Enum,
        "for" => For,
        "if" => If,
        "int" => Int,
        "return" => Return,
        "struct" => Struct,
        "switch" => Switch,
        "typedef" => Typedef,
        "void" => Void,
        "while" => While,
        _ => return None,
    })
}
