//! Pieces of grammar shared by several response kinds.

use crate::Result;
use crate::parser::lexer::{Lexer, Token};
use crate::types::ResponseCode;

/// Parses a bracketed response code.
pub fn parse_response_code(lexer: &mut Lexer<'_>) -> Result<ResponseCode> {
    lexer.expect(Token::LBracket)?;

    let atom = lexer.read_atom_string()?;
    let upper = atom.to_ascii_uppercase();

    let code = match upper.as_str() {
        "ALERT" => ResponseCode::Alert,
        "PARSE" => ResponseCode::Parse,
        "READ-ONLY" => ResponseCode::ReadOnly,
        "READ-WRITE" => ResponseCode::ReadWrite,
        "TRYCREATE" => ResponseCode::TryCreate,
        "UIDNEXT" => {
            lexer.expect_space()?;
            ResponseCode::UidNext(lexer.read_u32()?)
        }
        "UIDVALIDITY" => {
            lexer.expect_space()?;
            ResponseCode::UidValidity(lexer.read_u32()?)
        }
        "UNSEEN" => {
            lexer.expect_space()?;
            ResponseCode::Unseen(lexer.read_u32()?)
        }
        "CAPABILITY" => ResponseCode::Capability(parse_capability_data(lexer)?),
        "PERMANENTFLAGS" => {
            lexer.expect_space()?;
            ResponseCode::PermanentFlags(parse_flag_list(lexer)?)
        }
        "BADCHARSET" => {
            let mut charsets = Vec::new();
            if lexer.peek() == Some(b' ') && lexer.peek_at(1) == Some(b'(') {
                lexer.advance();
                lexer.expect(Token::LParen)?;
                loop {
                    lexer.skip_spaces();
                    if lexer.peek() == Some(b')') {
                        lexer.advance();
                        break;
                    }
                    charsets.push(lexer.read_astring()?);
                }
            }
            ResponseCode::BadCharset(charsets)
        }
        _ => ResponseCode::Other(upper),
    };

    // Skip any code arguments we do not interpret
    while !matches!(lexer.peek(), Some(b']' | b'\r') | None) {
        lexer.advance();
    }
    lexer.expect(Token::RBracket)?;

    Ok(code)
}

/// Parses space-separated capability names.
pub fn parse_capability_data(lexer: &mut Lexer<'_>) -> Result<Vec<String>> {
    let mut caps = Vec::new();

    while lexer.peek() == Some(b' ') {
        lexer.advance();
        match lexer.next_token()? {
            Token::Atom(s) => caps.push(s.to_string()),
            Token::Number(n) => caps.push(n.to_string()),
            _ => break,
        }
    }

    Ok(caps)
}

/// Parses a parenthesized flag list.
pub fn parse_flag_list(lexer: &mut Lexer<'_>) -> Result<Vec<String>> {
    lexer.expect(Token::LParen)?;

    let mut flags = Vec::new();

    loop {
        match lexer.next_token()? {
            Token::RParen => break,
            Token::Atom(s) => flags.push(s.to_string()),
            Token::Space => {}
            token => {
                return Err(lexer.error(&format!("Unexpected {} in flag list", token.describe())));
            }
        }
    }

    Ok(flags)
}

/// Reads text until CRLF (not consuming CRLF).
pub fn read_text_until_crlf(lexer: &mut Lexer<'_>) -> String {
    let remaining = lexer.remaining();
    let end = remaining
        .iter()
        .position(|&b| b == b'\r' || b == b'\n')
        .unwrap_or(remaining.len());
    let text = String::from_utf8_lossy(&remaining[..end]).into_owned();
    lexer.skip(end);
    text
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
    fn numeric_codes() {
        let cases = [
            (&b"[UIDNEXT 4392]"[..], ResponseCode::UidNext(4392)),
            (&b"[UIDVALIDITY 3857529045]"[..], ResponseCode::UidValidity(3857529045)),
            (&b"[UNSEEN 12]"[..], ResponseCode::Unseen(12)),
        ];
        for (input, expected) in cases {
            assert_eq!(parse_response_code(&mut Lexer::new(input)).unwrap(), expected);
        }
    }

    #[test]
    fn permanent_flags_with_wildcard() {
        let code =
            parse_response_code(&mut Lexer::new(b"[PERMANENTFLAGS (\\Deleted \\Seen \\*)]")).unwrap();
        assert_eq!(
            code,
            ResponseCode::PermanentFlags(vec![
                "\\Deleted".to_string(),
                "\\Seen".to_string(),
                "\\*".to_string()
            ])
        );
    }

    #[test]
    fn bare_badcharset() {
        assert_eq!(
            parse_response_code(&mut Lexer::new(b"[BADCHARSET]")).unwrap(),
            ResponseCode::BadCharset(vec![])
        );
    }

    #[test]
    fn unknown_code_skips_arguments() {
        let mut lexer = Lexer::new(b"[APPENDUID 38505 3955] done");
        assert_eq!(
            parse_response_code(&mut lexer).unwrap(),
            ResponseCode::Other("APPENDUID".to_string())
        );
        assert_eq!(lexer.remaining(), b" done");
    }

    #[test]
    fn unterminated_code_is_an_error() {
        assert!(parse_response_code(&mut Lexer::new(b"[ALERT\r\n")).is_err());
    }

    #[test]
    fn text_stops_at_crlf() {
        let mut lexer = Lexer::new(b"some text\r\n");
        assert_eq!(read_text_until_crlf(&mut lexer), "some text");
        assert_eq!(lexer.remaining(), b"\r\n");
    }
}
