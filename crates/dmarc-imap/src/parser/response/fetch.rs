//! FETCH response parsing.

use crate::Result;
use crate::parser::lexer::{Lexer, Token};
use crate::parser::value::{Value, read_section};
use crate::types::Uid;

use super::helpers::parse_flag_list;

/// A single `name value` pair of a FETCH response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchAttribute {
    /// `BODY[section]<origin>` contents.
    Body {
        /// Section part of `BODY[...]` without brackets, e.g. `HEADER.FIELDS (SUBJECT)`.
        section: String,
        /// Partial fetch origin octet.
        origin: Option<u32>,
        /// Section data, `None` for NIL.
        data: Option<Vec<u8>>,
    },
    /// `BODYSTRUCTURE` or non-extensible `BODY`.
    BodyStructure(Value),
    /// `ENVELOPE` structure.
    Envelope(Value),
    /// `FLAGS` list.
    Flags(Vec<String>),
    /// `INTERNALDATE` string.
    InternalDate(String),
    /// Full `RFC822` message.
    Rfc822(Option<Vec<u8>>),
    /// `RFC822.HEADER` bytes.
    Rfc822Header(Option<Vec<u8>>),
    /// `RFC822.TEXT` bytes.
    Rfc822Text(Option<Vec<u8>>),
    /// `RFC822.SIZE` octets.
    Rfc822Size(u32),
    /// Message `UID`.
    Uid(Uid),
    /// Any other pair, e.g. `MODSEQ (12)` or `X-GM-LABELS (...)`.
    Other {
        /// Item name, including any bracketed section.
        name: String,
        /// Item value.
        value: Value,
    },
}

/// The data of one untagged FETCH response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedItem {
    /// Message sequence number.
    pub seq: u32,
    /// Attribute pairs in server order.
    pub attributes: Vec<FetchAttribute>,
}

impl FetchedItem {
    /// Returns the UID, wherever it appears among the pairs.
    #[must_use]
    pub fn uid(&self) -> Option<Uid> {
        self.attributes.iter().find_map(|attr| match attr {
            FetchAttribute::Uid(uid) => Some(*uid),
            _ => None,
        })
    }

    /// Returns the full message bytes from `RFC822` or `BODY[]`.
    #[must_use]
    pub fn rfc822(&self) -> Option<&[u8]> {
        self.attributes.iter().find_map(|attr| match attr {
            FetchAttribute::Rfc822(Some(data)) => Some(data.as_slice()),
            FetchAttribute::Body {
                section,
                origin: None,
                data: Some(data),
            } if section.is_empty() => Some(data.as_slice()),
            _ => None,
        })
    }
}

/// Parses the attribute list of `* n FETCH (...)`.
pub fn parse_fetch_response(lexer: &mut Lexer<'_>, seq: u32) -> Result<FetchedItem> {
    lexer.skip_spaces();
    lexer.expect(Token::LParen)?;

    let mut attributes = Vec::new();

    loop {
        lexer.skip_spaces();
        match lexer.peek() {
            Some(b')') => {
                lexer.advance();
                break;
            }
            None => return Err(lexer.error("Unterminated FETCH response")),
            Some(_) => attributes.push(parse_fetch_attribute(lexer)?),
        }
    }

    Ok(FetchedItem { seq, attributes })
}

fn parse_fetch_attribute(lexer: &mut Lexer<'_>) -> Result<FetchAttribute> {
    let name = lexer.read_atom_string()?;
    let upper = name.to_ascii_uppercase();

    if lexer.peek() == Some(b'[') {
        let section = read_section(lexer)?;
        let origin = parse_origin(lexer)?;
        lexer.expect_space()?;

        if upper == "BODY" {
            return Ok(FetchAttribute::Body {
                section: section[1..section.len() - 1].to_string(),
                origin,
                data: lexer.read_nstring()?,
            });
        }

        let mut full_name = format!("{upper}{section}");
        if let Some(origin) = origin {
            full_name.push_str(&format!("<{origin}>"));
        }
        return Ok(FetchAttribute::Other {
            name: full_name,
            value: Value::parse(lexer)?,
        });
    }

    lexer.expect_space()?;

    let attribute = match upper.as_str() {
        "BODY" | "BODYSTRUCTURE" => FetchAttribute::BodyStructure(Value::parse(lexer)?),
        "ENVELOPE" => FetchAttribute::Envelope(Value::parse(lexer)?),
        "FLAGS" => FetchAttribute::Flags(parse_flag_list(lexer)?),
        "INTERNALDATE" => FetchAttribute::InternalDate(lexer.read_astring()?),
        "RFC822" => FetchAttribute::Rfc822(lexer.read_nstring()?),
        "RFC822.HEADER" => FetchAttribute::Rfc822Header(lexer.read_nstring()?),
        "RFC822.TEXT" => FetchAttribute::Rfc822Text(lexer.read_nstring()?),
        "RFC822.SIZE" => FetchAttribute::Rfc822Size(lexer.read_u32()?),
        "UID" => {
            let n = lexer.read_number()?;
            FetchAttribute::Uid(Uid::try_from(n).map_err(|e| lexer.error(&e.to_string()))?)
        }
        _ => FetchAttribute::Other {
            name: upper,
            value: Value::parse(lexer)?,
        },
    };

    Ok(attribute)
}

/// Parses an optional `<origin>` suffix.
fn parse_origin(lexer: &mut Lexer<'_>) -> Result<Option<u32>> {
    if lexer.peek() != Some(b'<') {
        return Ok(None);
    }
    lexer.advance();

    let mut origin: u32 = 0;
    let mut digits = 0;
    while let Some(b) = lexer.peek().filter(u8::is_ascii_digit) {
        origin = origin
            .checked_mul(10)
            .and_then(|n| n.checked_add(u32::from(b - b'0')))
            .ok_or_else(|| lexer.error("Origin out of range"))?;
        digits += 1;
        lexer.advance();
    }

    if digits == 0 || lexer.advance() != Some(b'>') {
        return Err(lexer.error("Malformed origin"));
    }
    Ok(Some(origin))
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
    use crate::parser::{Response, ResponseParser, UntaggedResponse};

    fn fetch(input: &[u8]) -> FetchedItem {
        match ResponseParser::parse(input).unwrap() {
            Response::Untagged(UntaggedResponse::Fetch(item)) => item,
            other => panic!("expected FETCH, got {other:?}"),
        }
    }

    #[test]
    fn uid_and_rfc822_literal() {
        let item = fetch(b"* 1 FETCH (UID 7 RFC822 {12}\r\nSubject: hi\n)\r\n");
        assert_eq!(item.seq, 1);
        assert_eq!(item.uid(), Uid::new(7));
        assert_eq!(item.rfc822(), Some(&b"Subject: hi\n"[..]));
    }

    #[test]
    fn pairs_in_any_order() {
        let item = fetch(b"* 2 FETCH (RFC822 {3}\r\nabc UID 9)\r\n");
        assert_eq!(item.uid(), Uid::new(9));
        assert_eq!(item.rfc822(), Some(&b"abc"[..]));
    }

    #[test]
    fn body_section_with_origin() {
        let item = fetch(b"* 3 FETCH (BODY[HEADER.FIELDS (SUBJECT)]<0> {9}\r\nSubject:\n)\r\n");
        assert_eq!(
            item.attributes,
            vec![FetchAttribute::Body {
                section: "HEADER.FIELDS (SUBJECT)".to_string(),
                origin: Some(0),
                data: Some(b"Subject:\n".to_vec()),
            }]
        );
        assert_eq!(item.rfc822(), None);
    }

    #[test]
    fn empty_body_section_is_the_full_message() {
        let item = fetch(b"* 4 FETCH (UID 11 BODY[] \"raw\")\r\n");
        assert_eq!(item.rfc822(), Some(&b"raw"[..]));
    }

    #[test]
    fn body_structure_with_special_characters() {
        let item = fetch(
            b"* 5 FETCH (BODY (\"MESSAGE\" \"text/html\" (\"a\" \"b(\") \"body-fld-id\" \"body-fld-desc\" \"8BIT\" 123))\r\n",
        );
        let [FetchAttribute::BodyStructure(Value::List(fields))] = item.attributes.as_slice() else {
            panic!("expected body structure, got {:?}", item.attributes);
        };
        assert_eq!(fields.len(), 7);
        assert_eq!(fields[6], Value::Number(123));
    }

    #[test]
    fn flags_date_size_and_envelope() {
        let item = fetch(
            b"* 6 FETCH (FLAGS (\\Seen) INTERNALDATE \"17-Jul-1996 02:44:25 -0700\" RFC822.SIZE 4286 ENVELOPE (NIL \"subj\" NIL NIL NIL NIL NIL NIL NIL NIL))\r\n",
        );
        assert_eq!(item.attributes[0], FetchAttribute::Flags(vec!["\\Seen".to_string()]));
        assert_eq!(
            item.attributes[1],
            FetchAttribute::InternalDate("17-Jul-1996 02:44:25 -0700".to_string())
        );
        assert_eq!(item.attributes[2], FetchAttribute::Rfc822Size(4286));
        assert!(matches!(&item.attributes[3], FetchAttribute::Envelope(Value::List(f)) if f.len() == 10));
    }

    #[test]
    fn unknown_pairs_fall_back_to_values() {
        let item = fetch(b"* 7 FETCH(X-GM-MSGID 1278455344230334865 MODSEQ (12) UID 3)\r\n");
        assert_eq!(
            item.attributes[0],
            FetchAttribute::Other {
                name: "X-GM-MSGID".to_string(),
                value: Value::Number(1278455344230334865),
            }
        );
        assert_eq!(
            item.attributes[1],
            FetchAttribute::Other {
                name: "MODSEQ".to_string(),
                value: Value::List(vec![Value::Number(12)]),
            }
        );
        assert_eq!(item.uid(), Uid::new(3));
    }

    #[test]
    fn nil_message_has_no_body() {
        let item = fetch(b"* 8 FETCH (UID 5 RFC822 NIL)\r\n");
        assert_eq!(item.uid(), Uid::new(5));
        assert_eq!(item.rfc822(), None);
    }

    #[test]
    fn missing_uid() {
        let item = fetch(b"* 9 FETCH (FLAGS ())\r\n");
        assert_eq!(item.uid(), None);
        assert_eq!(item.attributes, vec![FetchAttribute::Flags(vec![])]);
    }

    #[test]
    fn zero_uid_is_rejected() {
        assert!(ResponseParser::parse(b"* 1 FETCH (UID 0)\r\n").is_err());
    }
}
