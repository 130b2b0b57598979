//! Lexer for the C# expression subset.
//!
//! Tokenizes condition text into operator, literal, and identifier tokens.
//! Unrecognized characters surface as `TokenKind::Error`; the parser turns
//! them into a diagnostic.

use logos::Logos;

/// Lexical token kinds for condition expressions.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum TokenKind {
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Ident,

    #[regex(r"0[xX][0-9a-fA-F]+[lL]?")]
    HexLiteral,

    #[regex(r"[0-9]+[lL]?")]
    IntLiteral,

    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?[fFdD]?")]
    #[regex(r"[0-9]+[fFdD]")]
    FloatLiteral,

    #[regex(r#""([^"\\]|\\.)*""#)]
    StringLiteral,

    #[regex(r"'([^'\\]|\\.)'")]
    CharLiteral,

    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("!")]
    Bang,
    #[token("~")]
    Tilde,
    #[token("?")]
    Question,
    #[token(":")]
    Colon,
    #[token(".")]
    Dot,
    #[token(",")]
    Comma,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("<=")]
    LessEq,
    #[token(">=")]
    GreaterEq,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token("<")]
    Less,
    #[token(">")]
    Greater,
    #[token("==")]
    EqEq,
    #[token("!=")]
    BangEq,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,

    Error,
}

/// A token with its source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
}

/// Tokenize the whole expression up front; conditions are short.
#[must_use]
pub fn tokenize(source: &str) -> Vec<Token> {
    let mut lexer = TokenKind::lexer(source);
    let mut tokens = Vec::new();
    while let Some(kind) = lexer.next() {
        tokens.push(Token {
            kind: kind.unwrap_or(TokenKind::Error),
            text: lexer.slice().to_owned(),
        });
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn operators_and_identifiers() {
        assert_eq!(
            kinds("o != null && o.X > 0"),
            vec![
                TokenKind::Ident,
                TokenKind::BangEq,
                TokenKind::Ident,
                TokenKind::AndAnd,
                TokenKind::Ident,
                TokenKind::Dot,
                TokenKind::Ident,
                TokenKind::Greater,
                TokenKind::IntLiteral,
            ]
        );
    }

    #[test]
    fn shift_tokens_win_over_comparisons() {
        assert_eq!(
            kinds("a << 2 >> 1"),
            vec![
                TokenKind::Ident,
                TokenKind::Shl,
                TokenKind::IntLiteral,
                TokenKind::Shr,
                TokenKind::IntLiteral,
            ]
        );
    }

    #[test]
    fn literal_flavours() {
        assert_eq!(kinds("0x1F"), vec![TokenKind::HexLiteral]);
        assert_eq!(kinds("42L"), vec![TokenKind::IntLiteral]);
        assert_eq!(kinds("1.5f"), vec![TokenKind::FloatLiteral]);
        assert_eq!(kinds("2f"), vec![TokenKind::FloatLiteral]);
        assert_eq!(kinds("\"a b\""), vec![TokenKind::StringLiteral]);
        assert_eq!(kinds("'x'"), vec![TokenKind::CharLiteral]);
    }

    #[test]
    fn unknown_characters_become_error_tokens() {
        assert!(kinds("a # b").contains(&TokenKind::Error));
    }
}
