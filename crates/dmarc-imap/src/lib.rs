//! # dmarc-imap
//!
//! An asynchronous IMAP4rev1 client and a mailbox-backed work queue, built
//! for ingesting reports that arrive by email.
//!
//! ## Features
//!
//! - **Concurrent commands on one connection**: a background task reads
//!   every server response and routes tagged completions to their issuers;
//!   commands with different names are in flight together, commands with
//!   the same name run in call order
//! - **Literal-aware framing**: responses with embedded literals of any
//!   size are read as one frame, bytes passed through unmodified
//! - **Inactivity timeouts**: a command fails only when the server has been
//!   silent for the whole timeout, not when it is merely slow
//! - **TLS via rustls**: certificate verification on by default, with an
//!   optional maximum protocol version
//! - **Work queue**: poll a folder, hand each message to a handler and move
//!   it to a done or error folder depending on the outcome
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use dmarc_imap::{ConnectionConfig, ImapQueue, MessageHandler, QueueFolders};
//!
//! struct Printer;
//!
//! impl MessageHandler for Printer {
//!     type Error = std::convert::Infallible;
//!
//!     async fn handle(&self, message: &[u8]) -> Result<(), Self::Error> {
//!         println!("received {} bytes", message.len());
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ConnectionConfig::new("imap.example.com", "reports", "secret");
//!     let mut queue = ImapQueue::new(config, QueueFolders::default(), Duration::from_secs(60));
//!
//!     queue.consume(Arc::new(Printer));
//!     tokio::signal::ctrl_c().await.ok();
//!     queue.stop_consumer().await;
//! }
//! ```
//!
//! ## Modules
//!
//! - [`command`]: IMAP command encoding and tag generation
//! - [`connection`]: Framing, command dispatch and the connection itself
//! - [`parser`]: Sans-I/O response parser
//! - [`queue`]: Folder-based polling queue
//! - [`types`]: Core IMAP types (tags, UIDs, capabilities, response codes)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod parser;
pub mod queue;
pub mod types;

pub use command::{Command, StoreAction, TagGenerator};
pub use connection::{
    Completion, ConnectionConfig, ConnectionConfigBuilder, ConnectionState, ImapConnection,
    ImapStream, ResponseReader, TlsVersion,
};
pub use error::{Error, Result};
pub use parser::{FetchAttribute, FetchedItem, Response, ResponseParser, UntaggedResponse};
pub use queue::{ImapQueue, MessageHandler, QueueFolders};
pub use types::{Capabilities, ResponseCode, Status, Tag, Uid};

/// IMAP protocol version spoken by the client.
pub const IMAP_VERSION: &str = "IMAP4rev1";
