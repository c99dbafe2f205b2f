//! Command bookkeeping shared by issuers and the reader task.
//!
//! [`CommandTagRegistry`] hands out tags and routes tagged completions to
//! the waiting issuer. [`CommandLocks`] serializes commands that share a
//! name while letting differently named commands run side by side.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{OwnedMutexGuard, oneshot};

use crate::command::TagGenerator;
use crate::types::{ResponseCode, Status, Tag};
use crate::{Error, Result};

/// Tagged completion of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Status word.
    pub status: Status,
    /// Optional response code.
    pub code: Option<ResponseCode>,
    /// Human-readable text.
    pub text: String,
}

type Waiter = oneshot::Sender<Result<Completion>>;

#[derive(Default)]
struct Pending {
    waiters: HashMap<Tag, Waiter>,
    closed: Option<String>,
}

/// Maps in-flight tags to their completion signals.
#[derive(Default)]
pub struct CommandTagRegistry {
    tags: TagGenerator,
    pending: Mutex<Pending>,
}

impl CommandTagRegistry {
    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocates a fresh tag and registers its completion signal.
    ///
    /// Fails once the registry was closed by [`fail_all`](Self::fail_all).
    pub fn register(&self) -> Result<PendingCommand<'_>> {
        let mut pending = self.pending();
        if let Some(reason) = &pending.closed {
            return Err(Error::ConnectionClosed(reason.clone()));
        }

        let tag = self.tags.next();
        let (sender, receiver) = oneshot::channel();
        pending.waiters.insert(tag.clone(), sender);

        Ok(PendingCommand {
            registry: self,
            tag,
            receiver,
        })
    }

    /// Delivers a tagged completion. Returns false for unknown tags.
    pub fn resolve(&self, tag: &Tag, completion: Completion) -> bool {
        let Some(waiter) = self.pending().waiters.remove(tag) else {
            return false;
        };
        // The issuer may have given up already
        let _ = waiter.send(Ok(completion));
        true
    }

    /// Fails every pending command and refuses new registrations.
    ///
    /// Returns how many commands were pending.
    pub fn fail_all(&self, reason: &str) -> usize {
        let waiters = {
            let mut pending = self.pending();
            pending.closed = Some(reason.to_string());
            std::mem::take(&mut pending.waiters)
        };

        let count = waiters.len();
        for (_, waiter) in waiters {
            let _ = waiter.send(Err(Error::ConnectionClosed(reason.to_string())));
        }
        count
    }

    /// Number of commands awaiting completion.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending().waiters.len()
    }

    /// Returns true if no command is awaiting completion.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, tag: &Tag) {
        self.pending().waiters.remove(tag);
    }
}

/// A registered command; unregisters its tag when dropped.
pub struct PendingCommand<'a> {
    registry: &'a CommandTagRegistry,
    tag: Tag,
    pub(crate) receiver: oneshot::Receiver<Result<Completion>>,
}

impl PendingCommand<'_> {
    /// The tag allocated for this command.
    #[must_use]
    pub const fn tag(&self) -> &Tag {
        &self.tag
    }
}

impl Drop for PendingCommand<'_> {
    fn drop(&mut self) {
        self.registry.remove(&self.tag);
    }
}

/// One FIFO lock per command name.
#[derive(Default)]
pub struct CommandLocks {
    locks: Mutex<HashMap<&'static str, Arc<tokio::sync::Mutex<()>>>>,
}

impl CommandLocks {
    /// Waits until no other command named `name` is in flight.
    ///
    /// Waiters are served in the order they called `acquire`.
    pub async fn acquire(&self, name: &'static str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name)
            .or_default()
            .clone();
        lock.lock_owned().await
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
    use std::time::Duration;

    use super::*;

    fn ok(text: &str) -> Completion {
        Completion {
            status: Status::Ok,
            code: None,
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn resolve_routes_by_tag() {
        let registry = CommandTagRegistry::default();
        let mut first = registry.register().unwrap();
        let mut second = registry.register().unwrap();
        assert_eq!(first.tag().as_str(), "a0");
        assert_eq!(second.tag().as_str(), "a1");

        assert!(registry.resolve(second.tag(), ok("second")));
        assert!(registry.resolve(first.tag(), ok("first")));
        assert!(!registry.resolve(&Tag::new("a9"), ok("unknown")));

        let second = (&mut second.receiver).await.unwrap().unwrap();
        let first = (&mut first.receiver).await.unwrap().unwrap();
        assert_eq!(second.text, "second");
        assert_eq!(first.text, "first");
    }

    #[test]
    fn dropping_a_pending_command_unregisters_it() {
        let registry = CommandTagRegistry::default();
        let pending = registry.register().unwrap();
        assert_eq!(registry.len(), 1);
        drop(pending);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn fail_all_completes_every_waiter_and_closes() {
        let registry = CommandTagRegistry::default();
        let first = registry.register().unwrap();
        let second = registry.register().unwrap();

        assert_eq!(registry.fail_all("reset by peer"), 2);

        for mut pending in [first, second] {
            let result = (&mut pending.receiver).await.unwrap();
            assert!(matches!(result, Err(Error::ConnectionClosed(ref r)) if r == "reset by peer"));
        }
        assert!(matches!(registry.register(), Err(Error::ConnectionClosed(_))));
    }

    #[tokio::test]
    async fn same_name_lock_is_exclusive_and_fifo() {
        let locks = Arc::new(CommandLocks::default());
        let order = Arc::new(Mutex::new(Vec::new()));

        let guard = locks.acquire("SELECT").await;
        let mut tasks = Vec::new();
        for i in 0..3 {
            let locks = locks.clone();
            let order = order.clone();
            tasks.push(tokio::spawn(async move {
                let _guard = locks.acquire("SELECT").await;
                order.lock().unwrap().push(i);
            }));
            // Let the task queue up before spawning the next one
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(order.lock().unwrap().is_empty());
        drop(guard);
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn different_names_do_not_block() {
        let locks = CommandLocks::default();
        let _select = locks.acquire("SELECT").await;
        let fetch = tokio::time::timeout(Duration::from_millis(100), locks.acquire("FETCH")).await;
        assert!(fetch.is_ok());
    }
}
