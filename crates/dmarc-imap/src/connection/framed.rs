//! Framed reading of IMAP responses.
//!
//! Splits the server byte stream into one frame per response:
//!
//! 1. `+ ...` is a continuation request, exactly one line.
//! 2. `* ...` is untagged; every literal announced at the end of a line is
//!    read verbatim before line reading resumes.
//! 3. Anything else is a tagged candidate; lines (and their literals) are
//!    appended until the frame parses as a complete tagged response.

#![allow(clippy::missing_errors_doc)]

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

use crate::parser::{Response, ResponseParser};
use crate::{Error, Result};

/// Default buffer size for reading.
const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Maximum line length to prevent memory exhaustion.
const MAX_LINE_LENGTH: usize = 1024 * 1024; // 1 MB

/// Maximum literal size to prevent memory exhaustion.
const MAX_LITERAL_SIZE: usize = 100 * 1024 * 1024; // 100 MB

/// Kind of a framed response, decided by its first bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    /// `+` continuation request.
    ContinuationRequest,
    /// `*` untagged response.
    Untagged,
    /// Tagged command completion.
    Tagged,
}

/// One complete response as received, literals included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Response kind.
    pub kind: ResponseType,
    /// Raw bytes including the final CRLF.
    pub raw: Vec<u8>,
}

impl Frame {
    /// Parses the frame into a structured response.
    pub fn parse(&self) -> Result<Response> {
        ResponseParser::parse(&self.raw)
    }
}

/// Reads response frames from the server half of a connection.
pub struct ResponseReader<R> {
    reader: BufReader<R>,
}

impl<R> ResponseReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Creates a new reader.
    pub fn new(stream: R) -> Self {
        Self {
            reader: BufReader::with_capacity(DEFAULT_BUFFER_SIZE, stream),
        }
    }

    /// Reads the next frame.
    ///
    /// Returns `Ok(None)` on a clean end of stream between frames and
    /// [`Error::IncompleteResponse`] if the stream ends inside one.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(mut raw) = self.read_line(0).await? else {
            return Ok(None);
        };

        if raw.starts_with(b"+ ") || raw == b"+\r\n" {
            return Ok(Some(Frame {
                kind: ResponseType::ContinuationRequest,
                raw,
            }));
        }

        let kind = if raw.starts_with(b"* ") {
            ResponseType::Untagged
        } else {
            ResponseType::Tagged
        };

        self.read_literals(&mut raw).await?;

        if kind == ResponseType::Tagged {
            while !matches!(ResponseParser::parse(&raw), Ok(Response::Tagged { .. })) {
                if raw.len() > MAX_LINE_LENGTH {
                    return Err(Error::Parse {
                        position: raw.len(),
                        message: "unparseable tagged response".to_string(),
                    });
                }
                let line = self
                    .read_line(raw.len())
                    .await?
                    .ok_or(Error::IncompleteResponse(raw.len()))?;
                raw.extend_from_slice(&line);
                self.read_literals(&mut raw).await?;
            }
        }

        Ok(Some(Frame { kind, raw }))
    }

    /// Reads announced literals and the line continuing after each one.
    async fn read_literals(&mut self, raw: &mut Vec<u8>) -> Result<()> {
        while let Some(literal_len) = parse_literal_length(raw) {
            // Validate literal size to prevent DoS via memory exhaustion
            if literal_len > MAX_LITERAL_SIZE {
                return Err(Error::Protocol(format!(
                    "literal too large: {literal_len} bytes (max {MAX_LITERAL_SIZE})"
                )));
            }

            let start = raw.len();
            raw.resize(start + literal_len, 0);
            if let Err(e) = self.reader.read_exact(&mut raw[start..]).await {
                return Err(if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    Error::IncompleteResponse(start)
                } else {
                    Error::Io(e)
                });
            }

            let line = self
                .read_line(raw.len())
                .await?
                .ok_or(Error::IncompleteResponse(raw.len()))?;
            raw.extend_from_slice(&line);
        }
        Ok(())
    }

    /// Reads a single line up to and including LF.
    ///
    /// `Ok(None)` means the stream ended cleanly before any byte; a partial
    /// line at end of stream is incomplete (`frame_len` bytes of the current
    /// frame were already read).
    async fn read_line(&mut self, frame_len: usize) -> Result<Option<Vec<u8>>> {
        let mut line = Vec::new();

        loop {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                if line.is_empty() && frame_len == 0 {
                    return Ok(None);
                }
                return Err(Error::IncompleteResponse(frame_len + line.len()));
            }

            if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                line.extend_from_slice(&buf[..=pos]);
                self.reader.consume(pos + 1);
                return Ok(Some(line));
            }

            let len = buf.len();
            line.extend_from_slice(buf);
            self.reader.consume(len);

            if line.len() > MAX_LINE_LENGTH {
                return Err(Error::Protocol("line too long".to_string()));
            }
        }
    }
}

/// Parses a literal length from the end of the buffer.
///
/// Matches patterns like `{123}\r\n` or `{123+}\r\n` (non-synchronizing).
fn parse_literal_length(line: &[u8]) -> Option<usize> {
    let line = line.strip_suffix(b"\r\n")?;
    let line = line.strip_suffix(b"}")?;
    let line = line.strip_suffix(b"+").unwrap_or(line);

    let open = line.iter().rposition(|&b| b == b'{')?;
    let digits = &line[open + 1..];
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }

    std::str::from_utf8(digits).ok()?.parse().ok()
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
    use proptest::prelude::*;
    use tokio_test::io::Builder;

    async fn frames(input: &[u8]) -> Result<Vec<Frame>> {
        let mock = Builder::new().read(input).build();
        let mut reader = ResponseReader::new(mock);
        let mut frames = Vec::new();
        while let Some(frame) = reader.next_frame().await? {
            frames.push(frame);
        }
        Ok(frames)
    }

    #[test]
    fn test_parse_literal_length() {
        assert_eq!(parse_literal_length(b"* 1 FETCH (RFC822 {123}\r\n"), Some(123));
        assert_eq!(parse_literal_length(b"A001 LOGIN {5+}\r\n"), Some(5));
        assert_eq!(parse_literal_length(b"{0}\r\n"), Some(0));
        assert_eq!(parse_literal_length(b"* OK done\r\n"), None);
        assert_eq!(parse_literal_length(b"* OK {abc}\r\n"), None);
        assert_eq!(parse_literal_length(b"* OK {}\r\n"), None);
        assert_eq!(parse_literal_length(b"{5}"), None);
    }

    #[tokio::test]
    async fn test_one_frame_per_response() {
        let frames = frames(b"* OK hello\r\n+ go ahead\r\na1 OK done\r\n").await.unwrap();
        let kinds: Vec<_> = frames.iter().map(|f| f.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ResponseType::Untagged,
                ResponseType::ContinuationRequest,
                ResponseType::Tagged
            ]
        );
        assert_eq!(frames[2].raw, b"a1 OK done\r\n");
    }

    #[tokio::test]
    async fn test_bare_plus_is_continuation() {
        let frames = frames(b"+\r\n").await.unwrap();
        assert_eq!(frames[0].kind, ResponseType::ContinuationRequest);
    }

    #[tokio::test]
    async fn test_untagged_literal_spans_lines() {
        let input = b"* some untagged {23}\r\n+ multiline\r\n* response\r\n";
        let frames = frames(input).await.unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind, ResponseType::Untagged);
        assert_eq!(frames[0].raw, input);
    }

    #[tokio::test]
    async fn test_multiple_literals_in_one_frame() {
        let input = b"* 1 FETCH (BODY[1] {3}\r\na\r\n BODY[2] {2}\r\n\r\n)\r\n";
        let frames = frames(input).await.unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].raw, input);
    }

    #[tokio::test]
    async fn test_tagged_with_literal_in_response_code() {
        let input = b"tag123 OK [BADCHARSET ({8}\r\nfoo\r\nbar)] some text\r\n";
        let frames = frames(input).await.unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind, ResponseType::Tagged);
        assert_eq!(frames[0].raw, input);
    }

    #[tokio::test]
    async fn test_split_reads() {
        let mock = Builder::new()
            .read(b"* 1 FETCH (UID 7 RFC8")
            .read(b"22 {5}\r\nab")
            .read(b"\r\nc)\r")
            .read(b"\na1 OK done\r\n")
            .build();
        let mut reader = ResponseReader::new(mock);

        let first = reader.next_frame().await.unwrap().unwrap();
        assert_eq!(first.raw, b"* 1 FETCH (UID 7 RFC822 {5}\r\nab\r\nc)\r\n");
        let second = reader.next_frame().await.unwrap().unwrap();
        assert_eq!(second.raw, b"a1 OK done\r\n");
        assert!(reader.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_incomplete_inputs() {
        for input in [
            &b"tag123 INVALID foo\r\n"[..],
            b"tag123 OK [BADCHARSET ({8}\r\n",
            b"+invalid OK foo\r\n",
            b"* cutoff {4}\r\n",
            b"* cutoff {4}\r\nab",
            b"* no line ending",
        ] {
            let result = frames(input).await;
            assert!(
                matches!(result, Err(Error::IncompleteResponse(_))),
                "{:?} gave {result:?}",
                String::from_utf8_lossy(input)
            );
        }
    }

    #[tokio::test]
    async fn test_oversized_literal_is_rejected() {
        let result = frames(b"* 1 FETCH (RFC822 {999999999999}\r\n").await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    proptest! {
        #[test]
        fn literal_bytes_pass_through(payload in proptest::collection::vec(any::<u8>(), 0..512)) {
            let mut input = format!("* 1 FETCH (UID 9 RFC822 {{{}}}\r\n", payload.len()).into_bytes();
            input.extend_from_slice(&payload);
            input.extend_from_slice(b")\r\na1 OK FETCH completed\r\n");

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let frames = runtime.block_on(frames(&input)).unwrap();

            prop_assert_eq!(frames.len(), 2);
            prop_assert_eq!(frames[1].raw.as_slice(), &b"a1 OK FETCH completed\r\n"[..]);
            let Response::Untagged(crate::parser::UntaggedResponse::Fetch(item)) =
                frames[0].parse().unwrap()
            else {
                panic!("expected FETCH");
            };
            prop_assert_eq!(item.rfc822(), Some(payload.as_slice()));
        }

        #[test]
        fn every_cut_of_a_frame_is_incomplete(
            payload in proptest::collection::vec(any::<u8>(), 0..64),
            tagged in any::<bool>(),
        ) {
            let (head, tail) = if tagged {
                ("a1 OK [BADCHARSET ({", ")] done\r\n")
            } else {
                ("* 1 FETCH (UID 9 RFC822 {", ")\r\n")
            };
            let mut input = format!("{head}{}}}\r\n", payload.len()).into_bytes();
            input.extend_from_slice(&payload);
            input.extend_from_slice(tail.as_bytes());

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            for cut in 1..input.len() {
                let result = runtime.block_on(frames(&input[..cut]));
                prop_assert!(
                    matches!(result, Err(Error::IncompleteResponse(_))),
                    "cut at {} gave {:?}",
                    cut,
                    result
                );
            }
        }
    }
}
