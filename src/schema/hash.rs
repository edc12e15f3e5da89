//! Schema hash computation
//!
//! The hash is a CRC-32 over the canonical token stream of every schema
//! source, in load order. Each token is written as a one byte tag followed by
//! its text and a zero terminator, so `ab` and `a b` hash differently while
//! formatting and comments never contribute.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::lexer::{Token, TokenKind};

/// Checksum identifying a compiled schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaHash(pub u32);

impl SchemaHash {
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for SchemaHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for SchemaHash {
    fn from(value: u32) -> Self {
        SchemaHash(value)
    }
}

/// Accumulates tokens into a schema hash
pub(crate) struct HashGenerator {
    hasher: crc32fast::Hasher,
}

impl HashGenerator {
    pub fn new() -> Self {
        Self {
            hasher: crc32fast::Hasher::new(),
        }
    }

    pub fn add_token(&mut self, token: &Token) {
        let mut buf = [0u8; 4];
        let (tag, text): (u8, &str) = match &token.kind {
            TokenKind::Ident(w) => (b'i', w.as_str()),
            TokenKind::Number(n) => (b'n', n.as_str()),
            TokenKind::Str(s) => (b's', s.as_str()),
            TokenKind::Punct(c) => (b'p', c.encode_utf8(&mut buf)),
        };
        self.hasher.update(&[tag]);
        self.hasher.update(text.as_bytes());
        self.hasher.update(&[0]);
    }

    pub fn add_tokens<'a>(&mut self, tokens: impl IntoIterator<Item = &'a Token>) {
        for token in tokens {
            self.add_token(token);
        }
    }

    pub fn finish(self) -> SchemaHash {
        SchemaHash(self.hasher.finalize())
    }
}

impl Default for HashGenerator {
    fn default() -> Self {
        Self::new()
    }
}
