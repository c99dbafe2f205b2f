//! One IMAP session over TCP or TLS.
//!
//! [`ImapConnection`] is the public face. Underneath, [`ResponseReader`]
//! cuts the byte stream into frames, a background task dispatches them,
//! and [`CommandTagRegistry`] plus [`CommandLocks`] pair every issued
//! command with its tagged completion.

mod client;
mod config;
mod framed;
mod reader;
mod registry;
mod stream;

pub use client::ImapConnection;
pub use config::{ConnectionConfig, ConnectionConfigBuilder, TlsVersion};
pub use framed::{Frame, ResponseReader, ResponseType};
pub use reader::ConnectionState;
pub use registry::{CommandLocks, CommandTagRegistry, Completion, PendingCommand};
pub use stream::{ImapStream, connect, create_tls_connector};
