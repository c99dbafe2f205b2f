//! Per-connection tag source.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::types::Tag;

/// Hands out `a0`, `a1`, ... in issue order.
///
/// Shared by every task issuing commands on one connection; the counter is
/// the only state, so no lock is needed.
#[derive(Debug, Default)]
pub struct TagGenerator {
    issued: AtomicU32,
}

impl TagGenerator {
    /// Next unused tag.
    #[must_use]
    pub fn next(&self) -> Tag {
        let n = self.issued.fetch_add(1, Ordering::Relaxed);
        Tag::new(format!("a{n}"))
    }

    /// Number of tags handed out so far.
    #[must_use]
    pub fn issued(&self) -> u32 {
        self.issued.load(Ordering::Relaxed)
    }
}
