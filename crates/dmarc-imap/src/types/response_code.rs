//! Bracketed codes of status responses.

/// Code in square brackets at the start of a status text, as in
/// `a4 NO [TRYCREATE] no such mailbox`.
///
/// Only the codes this client acts on, or that carry data worth keeping,
/// get their own variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseCode {
    /// `[ALERT]`; the text is meant for a human.
    Alert,
    /// `[BADCHARSET (...)]` with the charsets the server accepts.
    BadCharset(Vec<String>),
    /// `[CAPABILITY ...]` sent along with a greeting or LOGIN completion.
    Capability(Vec<String>),
    /// `[PARSE]`; the server could not parse a stored message.
    Parse,
    /// `[PERMANENTFLAGS (...)]` of the selected mailbox.
    PermanentFlags(Vec<String>),
    /// `[READ-ONLY]` after SELECT.
    ReadOnly,
    /// `[READ-WRITE]` after SELECT.
    ReadWrite,
    /// `[TRYCREATE]`; the target mailbox is missing.
    TryCreate,
    /// `[UIDNEXT n]`
    UidNext(u32),
    /// `[UIDVALIDITY n]`
    UidValidity(u32),
    /// `[UNSEEN n]`
    Unseen(u32),
    /// Any other code, upper-cased, arguments dropped.
    Other(String),
}

impl ResponseCode {
    /// Capability names if this code carries them.
    #[must_use]
    pub fn capabilities(&self) -> Option<&[String]> {
        match self {
            Self::Capability(names) => Some(names),
            _ => None,
        }
    }
}
