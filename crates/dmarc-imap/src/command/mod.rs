//! IMAP command builder.
//!
//! Commands are encoded into chunks. Every chunk but the last ends with a
//! literal announcement `{n}\r\n`; the writer must wait for a continuation
//! request from the server before sending the next chunk.

mod tag_generator;

use crate::types::{Tag, Uid};

pub use tag_generator::TagGenerator;

/// Flag modification performed by `UID STORE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreAction {
    /// `+FLAGS`
    Add,
    /// `-FLAGS`
    Remove,
    /// `FLAGS`
    Replace,
}

/// IMAP command.
#[derive(Clone, PartialEq, Eq)]
pub enum Command {
    /// CAPABILITY command.
    Capability,
    /// LOGOUT command.
    Logout,
    /// LOGIN command; both credentials are sent as literals.
    Login {
        /// Username.
        username: String,
        /// Password.
        password: String,
    },
    /// SELECT command.
    Select {
        /// Mailbox name.
        mailbox: String,
    },
    /// CREATE command.
    Create {
        /// Mailbox name.
        mailbox: String,
    },
    /// DELETE command.
    Delete {
        /// Mailbox name.
        mailbox: String,
    },
    /// FETCH command.
    Fetch {
        /// Sequence set, e.g. `1:12`.
        sequence_set: String,
        /// Item list, e.g. `(UID RFC822)`.
        items: String,
    },
    /// UID COPY command.
    UidCopy {
        /// Message UID.
        uid: Uid,
        /// Destination mailbox.
        mailbox: String,
    },
    /// UID MOVE command (RFC 6851).
    UidMove {
        /// Message UID.
        uid: Uid,
        /// Destination mailbox.
        mailbox: String,
    },
    /// UID STORE command.
    UidStore {
        /// Message UID.
        uid: Uid,
        /// How the flags are applied.
        action: StoreAction,
        /// Flags, e.g. `\Deleted`.
        flags: Vec<String>,
        /// Suppress the untagged FETCH echo.
        silent: bool,
    },
    /// EXPUNGE command.
    Expunge,
}

enum Argument<'a> {
    Raw(String),
    Literal(&'a [u8]),
}

impl Command {
    /// Returns the command name, used for per-name serialization.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Capability => "CAPABILITY",
            Self::Logout => "LOGOUT",
            Self::Login { .. } => "LOGIN",
            Self::Select { .. } => "SELECT",
            Self::Create { .. } => "CREATE",
            Self::Delete { .. } => "DELETE",
            Self::Fetch { .. } => "FETCH",
            Self::UidCopy { .. } => "UID COPY",
            Self::UidMove { .. } => "UID MOVE",
            Self::UidStore { .. } => "UID STORE",
            Self::Expunge => "EXPUNGE",
        }
    }

    fn arguments(&self) -> Vec<Argument<'_>> {
        match self {
            Self::Capability | Self::Logout | Self::Expunge => Vec::new(),
            Self::Login { username, password } => vec![
                Argument::Literal(username.as_bytes()),
                Argument::Literal(password.as_bytes()),
            ],
            Self::Select { mailbox } | Self::Create { mailbox } | Self::Delete { mailbox } => {
                vec![Argument::Literal(mailbox.as_bytes())]
            }
            Self::Fetch {
                sequence_set,
                items,
            } => vec![
                Argument::Raw(sequence_set.clone()),
                Argument::Raw(items.clone()),
            ],
            Self::UidCopy { uid, mailbox } | Self::UidMove { uid, mailbox } => vec![
                Argument::Raw(uid.to_string()),
                Argument::Literal(mailbox.as_bytes()),
            ],
            Self::UidStore {
                uid,
                action,
                flags,
                silent,
            } => {
                let prefix = match action {
                    StoreAction::Add => "+FLAGS",
                    StoreAction::Remove => "-FLAGS",
                    StoreAction::Replace => "FLAGS",
                };
                let suffix = if *silent { ".SILENT" } else { "" };
                vec![
                    Argument::Raw(uid.to_string()),
                    Argument::Raw(format!("{prefix}{suffix}")),
                    Argument::Raw(format!("({})", flags.join(" "))),
                ]
            }
        }
    }

    /// Encodes the command line for `tag`, split at literal boundaries.
    #[must_use]
    pub fn encode(&self, tag: &Tag) -> Vec<Vec<u8>> {
        let mut chunks = Vec::new();
        let mut current = format!("{tag} {}", self.name()).into_bytes();

        for argument in self.arguments() {
            current.push(b' ');
            match argument {
                Argument::Raw(text) => current.extend_from_slice(text.as_bytes()),
                Argument::Literal(bytes) => {
                    current.extend_from_slice(format!("{{{}}}\r\n", bytes.len()).as_bytes());
                    chunks.push(std::mem::take(&mut current));
                    current.extend_from_slice(bytes);
                }
            }
        }

        current.extend_from_slice(b"\r\n");
        chunks.push(current);
        chunks
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Login { .. } => f
                .debug_struct("Login")
                .field("username", &"<redacted>")
                .field("password", &"<redacted>")
                .finish(),
            other => f.write_str(other.name()),
        }
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

    fn encode(command: &Command) -> Vec<String> {
        command
            .encode(&Tag::new("a3"))
            .into_iter()
            .map(|chunk| String::from_utf8(chunk).unwrap())
            .collect()
    }

    #[test]
    fn simple_commands_are_one_chunk() {
        assert_eq!(encode(&Command::Capability), vec!["a3 CAPABILITY\r\n"]);
        assert_eq!(encode(&Command::Expunge), vec!["a3 EXPUNGE\r\n"]);
        assert_eq!(
            encode(&Command::Fetch {
                sequence_set: "1:4".to_string(),
                items: "(UID RFC822)".to_string(),
            }),
            vec!["a3 FETCH 1:4 (UID RFC822)\r\n"]
        );
    }

    #[test]
    fn login_sends_two_literals() {
        let chunks = encode(&Command::Login {
            username: "user".to_string(),
            password: "päss".to_string(),
        });
        assert_eq!(chunks, vec!["a3 LOGIN {4}\r\n", "user {5}\r\n", "päss\r\n"]);
    }

    #[test]
    fn mailbox_names_are_literals() {
        assert_eq!(
            encode(&Command::Select {
                mailbox: "INBOX".to_string()
            }),
            vec!["a3 SELECT {5}\r\n", "INBOX\r\n"]
        );
        assert_eq!(
            encode(&Command::UidMove {
                uid: Uid::new(7).unwrap(),
                mailbox: "Archive".to_string()
            }),
            vec!["a3 UID MOVE 7 {7}\r\n", "Archive\r\n"]
        );
    }

    #[test]
    fn empty_literal() {
        assert_eq!(
            encode(&Command::Create {
                mailbox: String::new()
            }),
            vec!["a3 CREATE {0}\r\n", "\r\n"]
        );
    }

    #[test]
    fn store_flags() {
        assert_eq!(
            encode(&Command::UidStore {
                uid: Uid::new(12).unwrap(),
                action: StoreAction::Add,
                flags: vec!["\\Deleted".to_string()],
                silent: true,
            }),
            vec!["a3 UID STORE 12 +FLAGS.SILENT (\\Deleted)\r\n"]
        );
    }

    #[test]
    fn debug_redacts_credentials() {
        let debug = format!(
            "{:?}",
            Command::Login {
                username: "reports@example.com".to_string(),
                password: "hunter2".to_string(),
            }
        );
        assert!(debug.starts_with("Login"));
        assert!(!debug.contains("reports@example.com"));
        assert!(!debug.contains("hunter2"));
        assert_eq!(format!("{:?}", Command::Expunge), "EXPUNGE");
    }
}
