//! Tokenizer for schema source text
//!
//! Comments and whitespace are dropped here, so everything downstream
//! (parser and hash) only ever sees significant tokens.

use super::{SchemaError, SchemaResult};

/// Kinds of significant tokens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// Identifier or keyword
    Ident(String),
    /// Numeric literal, kept verbatim
    Number(String),
    /// Quoted string literal, without the quotes
    Str(String),
    /// Single punctuation character
    Punct(char),
}

/// A token with the line it started on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
}

impl Token {
    pub fn is_punct(&self, c: char) -> bool {
        self.kind == TokenKind::Punct(c)
    }

    pub fn is_ident(&self, word: &str) -> bool {
        matches!(&self.kind, TokenKind::Ident(w) if w == word)
    }

    pub fn ident(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Ident(w) => Some(w),
            _ => None,
        }
    }

    /// Human readable form for error messages
    pub fn describe(&self) -> String {
        match &self.kind {
            TokenKind::Ident(w) => format!("'{}'", w),
            TokenKind::Number(n) => format!("number {}", n),
            TokenKind::Str(s) => format!("string \"{}\"", s),
            TokenKind::Punct(c) => format!("'{}'", c),
        }
    }
}

const PUNCTUATION: &[char] = &[
    '{', '}', '(', ')', '[', ']', ';', ',', ':', '/', '.', '=', '-', '%', '*', '+', '<', '>',
];

/// Split `source` into tokens. `origin` names the source in errors.
pub fn tokenize(origin: &str, source: &str) -> SchemaResult<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut line = 1;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '\n' {
            line += 1;
            i += 1;
            continue;
        }
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        // Comments
        if c == '/' && chars.get(i + 1) == Some(&'/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }
        if c == '/' && chars.get(i + 1) == Some(&'*') {
            let start_line = line;
            i += 2;
            loop {
                match chars.get(i) {
                    None => {
                        return Err(SchemaError::Unterminated {
                            origin: origin.to_string(),
                            line: start_line,
                            what: "block comment",
                        });
                    }
                    Some('*') if chars.get(i + 1) == Some(&'/') => {
                        i += 2;
                        break;
                    }
                    Some('\n') => {
                        line += 1;
                        i += 1;
                    }
                    Some(_) => i += 1,
                }
            }
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            tokens.push(Token { kind: TokenKind::Ident(word), line });
            continue;
        }

        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '.') {
                i += 1;
            }
            let number: String = chars[start..i].iter().collect();
            tokens.push(Token { kind: TokenKind::Number(number), line });
            continue;
        }

        if c == '"' || c == '\'' {
            let quote = c;
            let start_line = line;
            let mut text = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => {
                        return Err(SchemaError::Unterminated {
                            origin: origin.to_string(),
                            line: start_line,
                            what: "string literal",
                        });
                    }
                    Some('\\') => {
                        if let Some(next) = chars.get(i + 1) {
                            text.push(*next);
                        }
                        i += 2;
                    }
                    Some(ch) if *ch == quote => {
                        i += 1;
                        break;
                    }
                    Some(ch) => {
                        if *ch == '\n' {
                            line += 1;
                        }
                        text.push(*ch);
                        i += 1;
                    }
                }
            }
            tokens.push(Token { kind: TokenKind::Str(text), line: start_line });
            continue;
        }

        if PUNCTUATION.contains(&c) {
            tokens.push(Token { kind: TokenKind::Punct(c), line });
            i += 1;
            continue;
        }

        return Err(SchemaError::UnexpectedChar {
            origin: origin.to_string(),
            line,
            found: c,
        });
    }

    Ok(tokens)
}
