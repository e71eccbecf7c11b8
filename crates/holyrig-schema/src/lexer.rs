//! Lexer for the schema DSL.
//!
//! The token set is deliberately small: keywords, identifiers, integers,
//! and punctuation. Whitespace and `//` comments are skipped; every kept
//! token records its byte offset so parse and semantic errors can point at
//! the exact source position.

use logos::Logos;

use crate::diag::{Diagnostic, Diagnostics};

/// One token of the schema DSL.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip r"//[^\n]*")]
pub enum Token<'source> {
    #[token("schema")]
    Schema,

    #[token("enum")]
    Enum,

    #[token("fn")]
    Fn,

    #[token("status")]
    Status,

    #[token("int")]
    Int,

    #[token("bool")]
    Bool,

    #[token("{")]
    BraceOpen,

    #[token("}")]
    BraceClose,

    #[token("(")]
    ParenOpen,

    #[token(")")]
    ParenClose,

    #[token(",")]
    Comma,

    #[token(";")]
    Semicolon,

    #[token("=")]
    Equals,

    #[regex(r"[0-9]+")]
    Integer(&'source str),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Ident(&'source str),
}

/// A token plus the byte offset where it starts.
#[derive(Debug, Clone, Copy)]
pub struct Spanned<'source> {
    pub token: Token<'source>,
    pub offset: usize,
}

/// Tokenize `source`, failing on the first unrecognized character.
pub fn tokenize(source: &str) -> Result<Vec<Spanned<'_>>, Diagnostics> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    while let Some(result) = lexer.next() {
        let offset = lexer.span().start;
        match result {
            Ok(token) => tokens.push(Spanned { token, offset }),
            Err(()) => {
                let mut diags = Diagnostics::default();
                diags.push(Diagnostic::new(
                    source,
                    offset,
                    format!("unrecognized character {:?}", lexer.slice()),
                ));
                return Err(diags);
            }
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_declaration() {
        let tokens = tokenize("fn set_freq(int freq);").unwrap();
        let kinds: Vec<Token> = tokens.iter().map(|t| t.token).collect();
        assert_eq!(
            kinds,
            vec![
                Token::Fn,
                Token::Ident("set_freq"),
                Token::ParenOpen,
                Token::Int,
                Token::Ident("freq"),
                Token::ParenClose,
                Token::Semicolon,
            ]
        );
    }

    #[test]
    fn keywords_beat_identifiers() {
        let tokens = tokenize("schema enum fn status int bool").unwrap();
        let kinds: Vec<Token> = tokens.iter().map(|t| t.token).collect();
        assert_eq!(
            kinds,
            vec![
                Token::Schema,
                Token::Enum,
                Token::Fn,
                Token::Status,
                Token::Int,
                Token::Bool,
            ]
        );
    }

    #[test]
    fn keyword_prefixes_stay_identifiers() {
        let tokens = tokenize("integer boolean status_led").unwrap();
        let kinds: Vec<Token> = tokens.iter().map(|t| t.token).collect();
        assert_eq!(
            kinds,
            vec![
                Token::Ident("integer"),
                Token::Ident("boolean"),
                Token::Ident("status_led"),
            ]
        );
    }

    #[test]
    fn comments_and_whitespace_skipped() {
        let tokens = tokenize("version = 1; // the only supported version\n").unwrap();
        assert_eq!(tokens.len(), 4);
        assert_eq!(tokens[0].token, Token::Ident("version"));
        assert_eq!(tokens[3].token, Token::Semicolon);
    }

    #[test]
    fn offsets_track_source_positions() {
        let tokens = tokenize("fn  x").unwrap();
        assert_eq!(tokens[0].offset, 0);
        assert_eq!(tokens[1].offset, 4);
    }

    #[test]
    fn unrecognized_character_reported_with_position() {
        let err = tokenize("fn x £ y").unwrap_err();
        let rendered = err.to_string();
        assert!(rendered.contains("line 1, column 6"), "{rendered}");
    }
}
