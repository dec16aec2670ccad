use std::fmt;

use serde::{Deserialize, Serialize};

/// The kind of a lexed token
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    /// Plain text outside any action
    Text,
    LeftDelim,
    RightDelim,
    LeftParen,
    RightParen,
    /// A run of spaces or tabs inside an action
    Space,
    Identifier,
    /// A dot-prefixed identifier, one chain segment per token (`.name`)
    Field,
    /// A dollar-prefixed identifier (`$name`); a bare `$` is the root datum
    Variable,
    /// The cursor, a bare `.`
    Dot,
    Number,
    /// A single-quoted character constant, quotes included
    CharConstant,
    /// A double-quoted string constant, quotes included
    String,
    /// A back-quoted raw string constant, quotes included
    RawString,
    Bool,
    Null,
    Pipe,
    Assign,
    Declare,
    Define,
    If,
    Else,
    End,
    For,
    Break,
    Continue,
    With,
    Template,
    /// A lexing failure; the value is the message
    Error,
    Eof,
}

impl TokenKind {
    pub fn is_keyword(self) -> bool {
        matches!(
            self,
            TokenKind::Define
                | TokenKind::If
                | TokenKind::Else
                | TokenKind::End
                | TokenKind::For
                | TokenKind::Break
                | TokenKind::Continue
                | TokenKind::With
                | TokenKind::Template
                | TokenKind::Bool
                | TokenKind::Null
        )
    }
}

/// A token produced by the lexer.
///
/// `pos` is the byte offset of the token's first character in the
/// source and `line` the one-based line it starts on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub val: String,
    pub pos: usize,
    pub line: usize,
}

impl Token {
    pub fn new(kind: TokenKind, val: impl Into<String>, pos: usize, line: usize) -> Self {
        Self {
            kind,
            val: val.into(),
            pos,
            line,
        }
    }

    pub fn eof(pos: usize, line: usize) -> Self {
        Self::new(TokenKind::Eof, "", pos, line)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::Eof => write!(f, "EOF"),
            TokenKind::Error => write!(f, "{}", self.val),
            kind if kind.is_keyword() => write!(f, "<{}>", self.val),
            _ if self.val.chars().count() > 10 => {
                let head: String = self.val.chars().take(10).collect();
                write!(f, "{:?}...", head)
            }
            _ => write!(f, "{:?}", self.val),
        }
    }
}
