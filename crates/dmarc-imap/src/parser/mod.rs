//! Response grammar.
//!
//! Parsing is pure: it takes one complete frame, as cut by the
//! [`ResponseReader`](crate::connection::ResponseReader), and never touches
//! the socket. A frame already contains the payload of every literal it
//! announces, so the lexer can hand literal bytes out as borrowed slices.
//!
//! Layers, bottom up: [`Lexer`] splits a frame into [`Token`]s, [`Value`]
//! holds data the client keeps without interpreting, and
//! [`ResponseParser`] builds a [`Response`].
//!
//! ```
//! use dmarc_imap::parser::{Response, ResponseParser, UntaggedResponse};
//!
//! let response = ResponseParser::parse(b"* 23 EXISTS\r\n").unwrap();
//! assert!(matches!(response, Response::Untagged(UntaggedResponse::Exists(23))));
//! ```

pub mod lexer;
pub mod response;
mod value;

pub use lexer::{Lexer, Token};
pub use response::{FetchAttribute, FetchedItem, Response, ResponseParser, UntaggedResponse};
pub use value::Value;
