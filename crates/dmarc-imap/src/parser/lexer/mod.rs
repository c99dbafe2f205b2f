//! Tokenizer for response frames.
//!
//! Works on one complete frame as produced by the frame reader, with every
//! literal inline (`{n}\r\n` followed by `n` bytes). Tokens borrow from the
//! frame; the parser decides what to copy.

#![allow(clippy::missing_errors_doc)]

mod token;

use std::borrow::Cow;

pub use token::Token;

use crate::{Error, Result};

/// Cursor over a response frame.
pub struct Lexer<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    /// Starts at the beginning of `input`.
    #[must_use]
    pub const fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    /// Byte offset of the cursor.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Unconsumed input.
    #[must_use]
    pub fn remaining(&self) -> &'a [u8] {
        self.input.get(self.pos..).unwrap_or_default()
    }

    /// Whether all input was consumed.
    #[must_use]
    pub const fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    /// Byte under the cursor.
    #[must_use]
    pub fn peek(&self) -> Option<u8> {
        self.peek_at(0)
    }

    /// Byte `offset` positions after the cursor.
    #[must_use]
    pub fn peek_at(&self, offset: usize) -> Option<u8> {
        self.input.get(self.pos + offset).copied()
    }

    /// Consumes one byte.
    pub fn advance(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    /// Consumes up to `n` bytes.
    pub fn skip(&mut self, n: usize) {
        self.pos = self.pos.saturating_add(n).min(self.input.len());
    }

    /// Consumes spaces.
    pub fn skip_spaces(&mut self) {
        self.take_while(|b| b == b' ');
    }

    fn take_while(&mut self, accept: impl Fn(u8) -> bool) -> &'a [u8] {
        let start = self.pos;
        while self.peek().is_some_and(&accept) {
            self.pos += 1;
        }
        &self.input[start..self.pos]
    }

    /// Consumes the next token.
    pub fn next_token(&mut self) -> Result<Token<'a>> {
        let Some(byte) = self.peek() else {
            return Ok(Token::Eof);
        };

        let punctuation = match byte {
            b' ' => Some(Token::Space),
            b'(' => Some(Token::LParen),
            b')' => Some(Token::RParen),
            b'[' => Some(Token::LBracket),
            b']' => Some(Token::RBracket),
            b'*' => Some(Token::Asterisk),
            b'+' => Some(Token::Plus),
            _ => None,
        };
        if let Some(token) = punctuation {
            self.pos += 1;
            return Ok(token);
        }

        match byte {
            b'\r' if self.remaining().starts_with(b"\r\n") => {
                self.pos += 2;
                Ok(Token::Crlf)
            }
            b'\r' => Err(self.error("CR without LF")),
            b'"' => self.quoted(),
            b'{' => self.literal(),
            _ if is_atom_char(byte) => self.atom(),
            _ => Err(self.error(&format!("Unexpected byte {byte:#04x}"))),
        }
    }

    /// `"..."`; only `\"` and `\\` are escapes, any other backslash is
    /// content because servers do not escape consistently.
    fn quoted(&mut self) -> Result<Token<'a>> {
        self.pos += 1;
        let start = self.pos;
        let mut escaped = false;

        loop {
            match self.advance() {
                Some(b'"') => break,
                Some(b'\\') if matches!(self.peek(), Some(b'"' | b'\\')) => {
                    escaped = true;
                    self.pos += 1;
                }
                Some(b'\r' | b'\n') | None => {
                    return Err(self.error("Unterminated quoted string"));
                }
                Some(_) => {}
            }
        }

        let content = &self.input[start..self.pos - 1];
        if !escaped {
            return Ok(Token::Quoted(Cow::Borrowed(content)));
        }

        let mut unescaped = Vec::with_capacity(content.len());
        let mut bytes = content.iter().copied().peekable();
        while let Some(b) = bytes.next() {
            if b == b'\\'
                && let Some(&(next @ (b'"' | b'\\'))) = bytes.peek()
            {
                unescaped.push(next);
                bytes.next();
            } else {
                unescaped.push(b);
            }
        }
        Ok(Token::Quoted(Cow::Owned(unescaped)))
    }

    /// `{n}\r\n` or `{n+}\r\n` followed by `n` bytes.
    fn literal(&mut self) -> Result<Token<'a>> {
        self.pos += 1;
        let size = std::str::from_utf8(self.take_while(|b| b.is_ascii_digit()))
            .ok()
            .and_then(|digits| digits.parse::<usize>().ok())
            .ok_or_else(|| self.error("Invalid literal size"))?;

        let marker = usize::from(self.peek() == Some(b'+'));
        if self.remaining().get(marker..marker + 3) != Some(b"}\r\n".as_slice()) {
            return Err(self.error("Malformed literal header"));
        }
        self.pos += marker + 3;

        let payload = self
            .remaining()
            .get(..size)
            .ok_or_else(|| self.error("Incomplete literal data"))?;
        self.pos += size;
        Ok(Token::Literal(payload))
    }

    fn atom(&mut self) -> Result<Token<'a>> {
        let start = self.pos;
        self.take_while(is_atom_char);
        // `\*` in PERMANENTFLAGS
        if &self.input[start..self.pos] == b"\\" && self.peek() == Some(b'*') {
            self.pos += 1;
        }

        let text = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| self.error("Atom is not UTF-8"))?;

        if text.eq_ignore_ascii_case("NIL") {
            return Ok(Token::Nil);
        }
        // Digit runs too large for u64 stay atoms.
        if text.bytes().all(|b| b.is_ascii_digit())
            && let Ok(n) = text.parse()
        {
            return Ok(Token::Number(n));
        }
        Ok(Token::Atom(text))
    }

    /// Parse error at the cursor.
    pub(crate) fn error(&self, message: &str) -> Error {
        Error::Parse {
            position: self.pos,
            message: message.to_string(),
        }
    }

    /// Consumes a token of the same kind as `expected`.
    #[allow(clippy::needless_pass_by_value)]
    pub fn expect(&mut self, expected: Token<'_>) -> Result<()> {
        let token = self.next_token()?;
        if std::mem::discriminant(&token) == std::mem::discriminant(&expected) {
            return Ok(());
        }
        Err(self.error(&format!(
            "Expected {}, got {}",
            expected.describe(),
            token.describe()
        )))
    }

    /// Consumes a space.
    pub fn expect_space(&mut self) -> Result<()> {
        self.expect(Token::Space)
    }

    /// astring: atom, number, quoted string or literal, decoded lossily.
    pub fn read_astring(&mut self) -> Result<String> {
        match self.next_token()? {
            Token::Atom(s) => Ok(s.to_string()),
            Token::Number(n) => Ok(n.to_string()),
            Token::Quoted(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Token::Literal(bytes) => Ok(String::from_utf8_lossy(bytes).into_owned()),
            token => Err(self.error(&format!("Expected astring, got {}", token.describe()))),
        }
    }

    /// nstring: `NIL`, quoted string or literal, as raw bytes.
    pub fn read_nstring(&mut self) -> Result<Option<Vec<u8>>> {
        match self.next_token()? {
            Token::Nil => Ok(None),
            Token::Quoted(bytes) => Ok(Some(bytes.into_owned())),
            Token::Literal(bytes) => Ok(Some(bytes.to_vec())),
            token => Err(self.error(&format!("Expected nstring, got {}", token.describe()))),
        }
    }

    /// Unsigned number.
    pub fn read_number(&mut self) -> Result<u64> {
        match self.next_token()? {
            Token::Number(n) => Ok(n),
            token => Err(self.error(&format!("Expected number, got {}", token.describe()))),
        }
    }

    /// Unsigned number that fits in 32 bits.
    pub fn read_u32(&mut self) -> Result<u32> {
        let n = self.read_number()?;
        u32::try_from(n).map_err(|_| self.error(&format!("Number out of range: {n}")))
    }

    /// Atom, returned as borrowed text.
    pub fn read_atom_string(&mut self) -> Result<&'a str> {
        match self.next_token()? {
            Token::Atom(s) => Ok(s),
            token => Err(self.error(&format!("Expected atom, got {}", token.describe()))),
        }
    }
}

/// Whether `b` may appear in an atom.
///
/// Also accepts `\` so that flags like `\Seen` are one atom, and `}` which
/// RFC 3501 allows in atoms.
#[must_use]
pub const fn is_atom_char(b: u8) -> bool {
    // atom-specials: ( ) { SP CTL % * " ]
    b.is_ascii_graphic() && !matches!(b, b'(' | b')' | b'{' | b'%' | b'*' | b'"' | b']' | b'[')
}
