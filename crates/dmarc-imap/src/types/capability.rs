//! Completion statuses and server capabilities.

use std::collections::HashSet;

/// Status word of a tagged completion or untagged condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Command completed successfully.
    Ok,
    /// Command failed (operational error).
    No,
    /// Command was malformed or not understood.
    Bad,
    /// Connection begins already authenticated.
    PreAuth,
    /// Server is closing the connection.
    Bye,
}

impl Status {
    /// Parses a status word, ignoring case.
    #[must_use]
    pub fn parse(word: &str) -> Option<Self> {
        match word.to_ascii_uppercase().as_str() {
            "OK" => Some(Self::Ok),
            "NO" => Some(Self::No),
            "BAD" => Some(Self::Bad),
            "PREAUTH" => Some(Self::PreAuth),
            "BYE" => Some(Self::Bye),
            _ => None,
        }
    }

    /// Returns the canonical wire spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::No => "NO",
            Self::Bad => "BAD",
            Self::PreAuth => "PREAUTH",
            Self::Bye => "BYE",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capabilities advertised by the server.
///
/// Names are stored uppercased so lookups are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities(HashSet<String>);

impl Capabilities {
    /// Creates an empty capability set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a capability.
    pub fn insert(&mut self, name: &str) {
        self.0.insert(name.to_ascii_uppercase());
    }

    /// Returns true if the server advertised `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(&name.to_ascii_uppercase())
    }

    /// Returns true if the server supports `UID MOVE` (RFC 6851).
    #[must_use]
    pub fn supports_move(&self) -> bool {
        self.contains("MOVE")
    }

    /// Number of advertised capabilities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if nothing has been advertised yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the uppercased capability names.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: AsRef<str>> FromIterator<S> for Capabilities {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut caps = Self::new();
        for name in iter {
            caps.insert(name.as_ref());
        }
        caps
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
    fn status_parse_is_case_insensitive() {
        assert_eq!(Status::parse("ok"), Some(Status::Ok));
        assert_eq!(Status::parse("No"), Some(Status::No));
        assert_eq!(Status::parse("BAD"), Some(Status::Bad));
        assert_eq!(Status::parse("INVALID"), None);
    }

    #[test]
    fn capabilities_lookup_ignores_case() {
        let caps: Capabilities = ["IMAP4rev1", "move", "LITERAL+"].into_iter().collect();
        assert_eq!(caps.len(), 3);
        assert!(caps.contains("imap4REV1"));
        assert!(caps.supports_move());
        assert!(caps.contains("literal+"));
        assert!(!caps.contains("IDLE"));
    }

    #[test]
    fn empty_capabilities_do_not_support_move() {
        let caps = Capabilities::new();
        assert!(caps.is_empty());
        assert!(!caps.supports_move());
    }
}
