//! Turns one frame into a [`Response`].
//!
//! Untagged responses the client has no use for are returned as
//! [`UntaggedResponse::Other`] rather than rejected.

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::option_if_let_else)]

mod fetch;
mod helpers;

pub use fetch::{FetchAttribute, FetchedItem};

use crate::parser::lexer::{Lexer, Token};
use crate::types::{Capabilities, ResponseCode, Status, Tag};
use crate::{Error, Result};

use helpers::{parse_capability_data, parse_flag_list, parse_response_code, read_text_until_crlf};

/// One server response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Tagged response (command completion).
    Tagged {
        /// Tag echoed from the command.
        tag: Tag,
        /// Response status (`OK`, `NO` or `BAD`).
        status: Status,
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Text after the optional code.
        text: String,
    },
    /// Untagged response (server data).
    Untagged(UntaggedResponse),
    /// Continuation request.
    Continuation {
        /// Text after the `+`, possibly empty.
        text: String,
    },
}

/// Untagged server data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UntaggedResponse {
    /// `* OK ...`, including the greeting.
    Ok {
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Text after the optional code.
        text: String,
    },
    /// `* NO ...` warning.
    No {
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Text after the optional code.
        text: String,
    },
    /// `* BAD ...` error.
    Bad {
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Text after the optional code.
        text: String,
    },
    /// `* PREAUTH ...` greeting.
    PreAuth {
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Text after the optional code.
        text: String,
    },
    /// `* BYE ...`: the server is about to close the connection.
    Bye {
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Text after the optional code.
        text: String,
    },
    /// `* CAPABILITY ...`.
    Capability(Capabilities),
    /// `* FLAGS (...)` for the selected mailbox.
    Flags(Vec<String>),
    /// `* n EXISTS`.
    Exists(u32),
    /// `* n RECENT`.
    Recent(u32),
    /// `* n EXPUNGE`.
    Expunge(u32),
    /// `* n FETCH (...)`.
    Fetch(FetchedItem),
    /// Any other untagged response, kept verbatim.
    Other {
        /// Keyword, uppercased; numeric responses keep the number in `data`.
        keyword: String,
        /// Remaining bytes of the frame.
        data: Vec<u8>,
    },
}

/// Parses single frames.
pub struct ResponseParser;

impl ResponseParser {
    /// Parses a complete response frame.
    pub fn parse(input: &[u8]) -> Result<Response> {
        let mut lexer = Lexer::new(input);

        match lexer.peek() {
            Some(b'*') => {
                lexer.advance();
                Self::parse_untagged(&mut lexer)
            }
            Some(b'+') if matches!(lexer.peek_at(1), Some(b' ' | b'\r') | None) => {
                lexer.advance();
                Ok(Self::parse_continuation(&mut lexer))
            }
            Some(_) => Self::parse_tagged(&mut lexer),
            None => Err(Error::Parse {
                position: 0,
                message: "Empty response".to_string(),
            }),
        }
    }

    /// Parses a tagged completion, which must span the whole input.
    fn parse_tagged(lexer: &mut Lexer<'_>) -> Result<Response> {
        let tag = match lexer.next_token()? {
            Token::Atom(tag) => tag.to_string(),
            Token::Number(n) => n.to_string(),
            token => return Err(lexer.error(&format!("Expected tag, got {}", token.describe()))),
        };
        lexer.expect_space()?;

        let word = lexer.read_atom_string()?;
        let status = match Status::parse(word) {
            Some(status @ (Status::Ok | Status::No | Status::Bad)) => status,
            _ => return Err(lexer.error(&format!("Invalid tagged status: {word}"))),
        };

        let (code, text) = Self::parse_resp_text(lexer)?;
        lexer.expect(Token::Crlf)?;
        if !lexer.is_eof() {
            return Err(lexer.error("Trailing data after tagged response"));
        }

        Ok(Response::Tagged {
            tag: Tag::new(tag),
            status,
            code,
            text,
        })
    }

    /// Parses an untagged response after the leading `*`.
    fn parse_untagged(lexer: &mut Lexer<'_>) -> Result<Response> {
        lexer.expect_space()?;

        let untagged = match lexer.next_token()? {
            Token::Atom(s) => {
                let upper = s.to_ascii_uppercase();
                match upper.as_str() {
                    "OK" | "NO" | "BAD" | "PREAUTH" | "BYE" => {
                        let (code, text) = Self::parse_resp_text(lexer)?;
                        match upper.as_str() {
                            "OK" => UntaggedResponse::Ok { code, text },
                            "NO" => UntaggedResponse::No { code, text },
                            "BAD" => UntaggedResponse::Bad { code, text },
                            "PREAUTH" => UntaggedResponse::PreAuth { code, text },
                            _ => UntaggedResponse::Bye { code, text },
                        }
                    }
                    "CAPABILITY" => UntaggedResponse::Capability(
                        parse_capability_data(lexer)?.into_iter().collect(),
                    ),
                    "FLAGS" => {
                        lexer.expect_space()?;
                        UntaggedResponse::Flags(parse_flag_list(lexer)?)
                    }
                    _ => UntaggedResponse::Other {
                        keyword: upper,
                        data: lexer.remaining().to_vec(),
                    },
                }
            }
            Token::Number(n) => {
                let n = u32::try_from(n)
                    .map_err(|_| lexer.error(&format!("Message number out of range: {n}")))?;
                lexer.expect_space()?;
                let keyword = lexer.read_atom_string()?;
                let upper = keyword.to_ascii_uppercase();

                match upper.as_str() {
                    "EXISTS" => UntaggedResponse::Exists(n),
                    "RECENT" => UntaggedResponse::Recent(n),
                    "EXPUNGE" => UntaggedResponse::Expunge(n),
                    "FETCH" => UntaggedResponse::Fetch(fetch::parse_fetch_response(lexer, n)?),
                    _ => UntaggedResponse::Other {
                        keyword: upper,
                        data: format!("{n}").into_bytes(),
                    },
                }
            }
            token => {
                return Err(lexer.error(&format!(
                    "Unexpected {} in untagged response",
                    token.describe()
                )));
            }
        };

        Ok(Response::Untagged(untagged))
    }

    /// Parses a continuation request after the leading `+`.
    fn parse_continuation(lexer: &mut Lexer<'_>) -> Response {
        if lexer.peek() == Some(b' ') {
            lexer.advance();
        }

        Response::Continuation {
            text: read_text_until_crlf(lexer),
        }
    }

    /// Parses `[SP ["[" resp-text-code "]" SP] text]` up to the CRLF.
    fn parse_resp_text(lexer: &mut Lexer<'_>) -> Result<(Option<ResponseCode>, String)> {
        if lexer.peek() == Some(b' ') {
            lexer.advance();
        }

        let code = if lexer.peek() == Some(b'[') {
            let code = parse_response_code(lexer)?;
            if lexer.peek() == Some(b' ') {
                lexer.advance();
            }
            Some(code)
        } else {
            None
        };

        Ok((code, read_text_until_crlf(lexer)))
    }
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
    fn greeting() {
        let response = ResponseParser::parse(b"* OK hello\r\n").unwrap();
        assert_eq!(
            response,
            Response::Untagged(UntaggedResponse::Ok {
                code: None,
                text: "hello".to_string()
            })
        );
    }

    #[test]
    fn greeting_with_capabilities() {
        let response =
            ResponseParser::parse(b"* OK [CAPABILITY IMAP4rev1 MOVE LITERAL+] ready\r\n").unwrap();
        let Response::Untagged(UntaggedResponse::Ok {
            code: Some(ResponseCode::Capability(caps)),
            text,
        }) = response
        else {
            panic!("expected greeting with capability code");
        };
        assert_eq!(caps, vec!["IMAP4rev1", "MOVE", "LITERAL+"]);
        assert_eq!(text, "ready");
    }

    #[test]
    fn tagged_with_status_variants() {
        for (input, status) in [
            (&b"a1 OK done\r\n"[..], Status::Ok),
            (&b"a2 no [TRYCREATE] missing\r\n"[..], Status::No),
            (&b"a3 BAD\r\n"[..], Status::Bad),
        ] {
            let Response::Tagged { status: parsed, .. } = ResponseParser::parse(input).unwrap()
            else {
                panic!("expected tagged response");
            };
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn tagged_with_response_code() {
        let response = ResponseParser::parse(b"a2 NO [TRYCREATE] Mailbox doesn't exist\r\n").unwrap();
        assert_eq!(
            response,
            Response::Tagged {
                tag: Tag::new("a2"),
                status: Status::No,
                code: Some(ResponseCode::TryCreate),
                text: "Mailbox doesn't exist".to_string(),
            }
        );
    }

    #[test]
    fn tagged_badcharset_with_literal() {
        let response =
            ResponseParser::parse(b"tag123 OK [BADCHARSET ({8}\r\nfoo\r\nbar)] some text\r\n")
                .unwrap();
        assert_eq!(
            response,
            Response::Tagged {
                tag: Tag::new("tag123"),
                status: Status::Ok,
                code: Some(ResponseCode::BadCharset(vec!["foo\r\nbar".to_string()])),
                text: "some text".to_string(),
            }
        );
    }

    #[test]
    fn tagged_rejects_unknown_status() {
        assert!(ResponseParser::parse(b"tag123 INVALID foo\r\n").is_err());
    }

    #[test]
    fn tagged_rejects_missing_crlf_or_trailing_data() {
        assert!(ResponseParser::parse(b"a1 OK done").is_err());
        assert!(ResponseParser::parse(b"a1 OK done\r\nmore\r\n").is_err());
    }

    #[test]
    fn plus_without_space_is_not_a_continuation() {
        assert!(ResponseParser::parse(b"+invalid OK foo\r\n").is_err());
    }

    #[test]
    fn continuation_variants() {
        assert_eq!(
            ResponseParser::parse(b"+ OK continue\r\n").unwrap(),
            Response::Continuation {
                text: "OK continue".to_string()
            }
        );
        assert_eq!(
            ResponseParser::parse(b"+\r\n").unwrap(),
            Response::Continuation {
                text: String::new()
            }
        );
    }

    #[test]
    fn capability_response() {
        let Response::Untagged(UntaggedResponse::Capability(caps)) =
            ResponseParser::parse(b"* CAPABILITY IMAP4rev1 IDLE move\r\n").unwrap()
        else {
            panic!("expected capability response");
        };
        assert!(caps.contains("IMAP4REV1"));
        assert!(caps.contains("IDLE"));
        assert!(caps.supports_move());
    }

    #[test]
    fn message_data() {
        assert_eq!(
            ResponseParser::parse(b"* 23 EXISTS\r\n").unwrap(),
            Response::Untagged(UntaggedResponse::Exists(23))
        );
        assert_eq!(
            ResponseParser::parse(b"* 5 RECENT\r\n").unwrap(),
            Response::Untagged(UntaggedResponse::Recent(5))
        );
        assert_eq!(
            ResponseParser::parse(b"* 3 EXPUNGE\r\n").unwrap(),
            Response::Untagged(UntaggedResponse::Expunge(3))
        );
    }

    #[test]
    fn flags_response() {
        assert_eq!(
            ResponseParser::parse(b"* FLAGS (\\Answered \\Seen $Forwarded)\r\n").unwrap(),
            Response::Untagged(UntaggedResponse::Flags(vec![
                "\\Answered".to_string(),
                "\\Seen".to_string(),
                "$Forwarded".to_string()
            ]))
        );
    }

    #[test]
    fn bye_response() {
        assert_eq!(
            ResponseParser::parse(b"* BYE logging out\r\n").unwrap(),
            Response::Untagged(UntaggedResponse::Bye {
                code: None,
                text: "logging out".to_string()
            })
        );
    }

    #[test]
    fn unknown_untagged_is_kept() {
        let response = ResponseParser::parse(b"* LIST (\\HasNoChildren) \"/\" INBOX\r\n").unwrap();
        let Response::Untagged(UntaggedResponse::Other { keyword, data }) = response else {
            panic!("expected other response");
        };
        assert_eq!(keyword, "LIST");
        assert_eq!(data, b" (\\HasNoChildren) \"/\" INBOX\r\n");

        let response = ResponseParser::parse(b"* some untagged {23}\r\n+ multiline\r\n* response\r\n")
            .unwrap();
        assert!(matches!(
            response,
            Response::Untagged(UntaggedResponse::Other { ref keyword, .. }) if keyword == "SOME"
        ));
    }

    #[test]
    fn unknown_numeric_untagged_is_kept() {
        assert!(matches!(
            ResponseParser::parse(b"* 12 XUNKNOWN\r\n").unwrap(),
            Response::Untagged(UntaggedResponse::Other { ref keyword, .. }) if keyword == "XUNKNOWN"
        ));
    }
}
