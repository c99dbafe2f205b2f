//! Lexical units of a response frame.

use std::borrow::Cow;

/// One token of a response frame.
///
/// String-like tokens borrow from the frame, so literal payloads such as
/// message bodies are never copied by the lexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    /// Run of atom characters that is neither a number nor `NIL`.
    Atom(&'a str),
    /// Run of digits that fits in a `u64`.
    Number(u64),
    /// `NIL` in any letter case.
    Nil,
    /// Contents of a quoted string. Owned only if escapes were removed.
    Quoted(Cow<'a, [u8]>),
    /// Payload of a `{n}` literal, exactly as received.
    Literal(&'a [u8]),
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `[`
    LBracket,
    /// `]`
    RBracket,
    /// A single space.
    Space,
    /// `*` starting an untagged response.
    Asterisk,
    /// `+` starting a continuation request.
    Plus,
    /// Line end.
    Crlf,
    /// No input left.
    Eof,
}

impl Token<'_> {
    /// Short name for error messages; never includes payload bytes.
    #[must_use]
    pub const fn describe(&self) -> &'static str {
        match self {
            Self::Atom(_) => "atom",
            Self::Number(_) => "number",
            Self::Nil => "NIL",
            Self::Quoted(_) => "quoted string",
            Self::Literal(_) => "literal",
            Self::LParen => "'('",
            Self::RParen => "')'",
            Self::LBracket => "'['",
            Self::RBracket => "']'",
            Self::Space => "space",
            Self::Asterisk => "'*'",
            Self::Plus => "'+'",
            Self::Crlf => "CRLF",
            Self::Eof => "end of input",
        }
    }
}
