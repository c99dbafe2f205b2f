//! A set whose members expire after a fixed time to live.
//!
//! Used to remember which reports were already counted. Members are kept
//! in insertion order so expiry only ever looks at the front of the queue.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const FORMAT_VERSION: u32 = 0;

/// Source of the current time in seconds since the epoch.
pub type Clock = Arc<dyn Fn() -> f64 + Send + Sync>;

fn system_clock() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[derive(Serialize, Deserialize)]
struct Stored<T> {
    version: u32,
    expiry_queue: Vec<(f64, T)>,
}

/// Set of items that are forgotten `ttl` after they were inserted.
pub struct ExpiringSet<T> {
    ttl: f64,
    clock: Clock,
    items: HashSet<T>,
    expiry_queue: VecDeque<(f64, T)>,
}

impl<T> fmt::Debug for ExpiringSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpiringSet")
            .field("ttl", &self.ttl)
            .field("len", &self.expiry_queue.len())
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Eq + Hash> ExpiringSet<T> {
    /// Creates an empty set using the system clock.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(system_clock))
    }

    /// Creates an empty set with a custom clock.
    #[must_use]
    pub fn with_clock(ttl: Duration, clock: Clock) -> Self {
        Self {
            ttl: ttl.as_secs_f64(),
            clock,
            items: HashSet::new(),
            expiry_queue: VecDeque::new(),
        }
    }

    /// Inserts an item. Returns `false` if it was already present, in which
    /// case its expiry is left unchanged.
    pub fn insert(&mut self, item: T) -> bool {
        self.expire();
        if !self.items.insert(item.clone()) {
            return false;
        }
        self.expiry_queue.push_back(((self.clock)(), item));
        true
    }

    /// Whether the item was inserted less than `ttl` ago.
    pub fn contains(&mut self, item: &T) -> bool {
        self.expire();
        self.items.contains(item)
    }

    /// Number of live items.
    pub fn len(&mut self) -> usize {
        self.expire();
        self.items.len()
    }

    /// Whether no live items remain.
    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }

    fn expire(&mut self) {
        let now = (self.clock)();
        while let Some((inserted, _)) = self.expiry_queue.front() {
            if now - inserted < self.ttl {
                break;
            }
            if let Some((_, item)) = self.expiry_queue.pop_front() {
                self.items.remove(&item);
            }
        }
    }
}

impl<T: Clone + Eq + Hash + Serialize + DeserializeOwned> ExpiringSet<T> {
    /// Writes the live items to `path`.
    pub fn persist(&mut self, path: &Path) -> Result<()> {
        self.expire();
        let stored = Stored {
            version: FORMAT_VERSION,
            expiry_queue: self.expiry_queue.iter().cloned().collect(),
        };
        std::fs::write(path, serde_json::to_vec(&stored)?)?;
        Ok(())
    }

    /// Reads a set written by [`persist`](Self::persist), dropping items
    /// that expired in the meantime.
    pub fn load(path: &Path, ttl: Duration) -> Result<Self> {
        Self::load_with_clock(path, ttl, Arc::new(system_clock))
    }

    /// Like [`load`](Self::load) with a custom clock.
    pub fn load_with_clock(path: &Path, ttl: Duration, clock: Clock) -> Result<Self> {
        let stored: Stored<T> = serde_json::from_slice(&std::fs::read(path)?)?;
        if stored.version != FORMAT_VERSION {
            return Err(Error::Config(format!(
                "{}: unsupported format version {}",
                path.display(),
                stored.version
            )));
        }

        let mut set = Self::with_clock(ttl, clock);
        let now = (set.clock)();
        for (inserted, item) in stored.expiry_queue {
            if now - inserted < set.ttl && set.items.insert(item.clone()) {
                set.expiry_queue.push_back((inserted, item));
            }
        }
        Ok(set)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn manual_clock() -> (Arc<Mutex<f64>>, Clock) {
        let now = Arc::new(Mutex::new(0.0));
        let handle = Arc::clone(&now);
        (now, Arc::new(move || *handle.lock().unwrap()))
    }

    fn scratch_file(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("expiring-set-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    #[test]
    fn containment_with_ttl() {
        let (now, clock) = manual_clock();
        let mut set = ExpiringSet::with_clock(Duration::from_secs(1), clock);

        assert!(!set.contains(&"a"));
        assert!(set.insert("a"));
        assert!(set.contains(&"a"));
        assert!(!set.insert("a"));

        *now.lock().unwrap() += 1.0;
        assert!(!set.contains(&"a"));
        assert!(set.is_empty());
    }

    #[test]
    fn expires_in_insertion_order() {
        let (now, clock) = manual_clock();
        let mut set = ExpiringSet::with_clock(Duration::from_secs(10), clock);

        set.insert(1);
        *now.lock().unwrap() = 5.0;
        set.insert(2);
        *now.lock().unwrap() = 12.0;

        assert!(!set.contains(&1));
        assert!(set.contains(&2));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn persist_and_load_drop_expired_items() {
        let path = scratch_file("seen-reports.db");
        let (now, clock) = manual_clock();
        let mut set = ExpiringSet::with_clock(Duration::from_secs(10), Arc::clone(&clock));

        set.insert(("google.com".to_string(), "1".to_string()));
        *now.lock().unwrap() = 5.0;
        set.insert(("google.com".to_string(), "2".to_string()));
        set.persist(&path).unwrap();

        *now.lock().unwrap() = 11.0;
        let mut loaded: ExpiringSet<(String, String)> =
            ExpiringSet::load_with_clock(&path, Duration::from_secs(10), clock).unwrap();

        assert!(!loaded.contains(&("google.com".to_string(), "1".to_string())));
        assert!(loaded.contains(&("google.com".to_string(), "2".to_string())));

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn unknown_version_is_rejected() {
        let path = scratch_file("future.db");
        std::fs::write(&path, r#"{"version": 7, "expiry_queue": []}"#).unwrap();

        let result: Result<ExpiringSet<String>> = ExpiringSet::load(&path, Duration::from_secs(1));
        assert!(result.is_err());

        std::fs::remove_file(&path).unwrap();
    }
}
