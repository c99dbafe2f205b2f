//! Generic parenthesized values.
//!
//! Envelopes, body structures and unknown FETCH items are kept as a tree
//! of these values instead of being modelled field by field.

use crate::Result;
use crate::parser::lexer::{Lexer, Token, is_atom_char};

/// A single IMAP data value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// `NIL`.
    Nil,
    /// A number.
    Number(u64),
    /// A bare atom, including any bracketed suffix such as `BODY[1]`.
    Atom(String),
    /// A quoted string or literal.
    String(Vec<u8>),
    /// A parenthesized list.
    List(Vec<Self>),
}

impl Value {
    /// Returns the bytes of a string value.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::String(bytes) => Some(bytes),
            Self::Atom(atom) => Some(atom.as_bytes()),
            _ => None,
        }
    }

    /// Returns the elements of a list value.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Self]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

impl Value {
    /// Parses one value at the current lexer position.
    pub fn parse(lexer: &mut Lexer<'_>) -> Result<Self> {
        match lexer.next_token()? {
            Token::Nil => Ok(Self::Nil),
            Token::Number(n) => Ok(Self::Number(n)),
            Token::Quoted(bytes) => Ok(Self::String(bytes.into_owned())),
            Token::Literal(bytes) => Ok(Self::String(bytes.to_vec())),
            Token::Atom(atom) => {
                let mut atom = atom.to_string();
                if lexer.peek() == Some(b'[') {
                    atom.push_str(&read_section(lexer)?);
                    while let Some(b) = lexer.peek().filter(|&b| is_atom_char(b)) {
                        atom.push(char::from(b));
                        lexer.advance();
                    }
                }
                Ok(Self::Atom(atom))
            }
            Token::LParen => {
                let mut items = Vec::new();
                loop {
                    lexer.skip_spaces();
                    match lexer.peek() {
                        Some(b')') => {
                            lexer.advance();
                            break;
                        }
                        None => return Err(lexer.error("Unterminated list")),
                        Some(_) => items.push(Self::parse(lexer)?),
                    }
                }
                Ok(Self::List(items))
            }
            token => Err(lexer.error(&format!("Expected value, got {}", token.describe()))),
        }
    }
}

/// Reads a bracketed section such as `[HEADER.FIELDS (SUBJECT)]` verbatim,
/// brackets included.
pub(crate) fn read_section(lexer: &mut Lexer<'_>) -> Result<String> {
    let remaining = lexer.remaining();
    let Some(end) = remaining.iter().position(|&b| b == b']') else {
        return Err(lexer.error("Unterminated section"));
    };
    if remaining[..end].iter().any(|&b| b == b'\r' || b == b'\n') {
        return Err(lexer.error("Line break inside section"));
    }
    let section = String::from_utf8_lossy(&remaining[..=end]).into_owned();
    lexer.skip(end + 1);
    Ok(section)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn nested_body_structure() {
        let input = b"(\"MESSAGE\" \"text/html\" (\"a\" \"b(\") \"body-fld-id\" NIL \"8BIT\" 123)";
        let value = Value::parse(&mut Lexer::new(input)).unwrap();

        let items = value.as_list().unwrap();
        assert_eq!(items.len(), 7);
        assert_eq!(items[0].as_bytes(), Some(&b"MESSAGE"[..]));
        assert_eq!(
            items[2],
            Value::List(vec![
                Value::String(b"a".to_vec()),
                Value::String(b"b(".to_vec())
            ])
        );
        assert_eq!(items[4], Value::Nil);
        assert_eq!(items[6], Value::Number(123));
    }

    #[test]
    fn atom_with_section_suffix() {
        let value = Value::parse(&mut Lexer::new(b"BINARY[1]<0>")).unwrap();
        assert_eq!(value, Value::Atom("BINARY[1]<0>".to_string()));
    }

    #[test]
    fn empty_list_and_literal_member() {
        let value = Value::parse(&mut Lexer::new(b"(() {3}\r\nx y)")).unwrap();
        assert_eq!(
            value,
            Value::List(vec![Value::List(vec![]), Value::String(b"x y".to_vec())])
        );
    }

    #[test]
    fn unterminated_list_is_an_error() {
        assert!(Value::parse(&mut Lexer::new(b"(1 2")).is_err());
    }
}
