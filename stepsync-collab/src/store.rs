//! In-memory registry of edit histories.
//!
//! Only document creation mutates the map; every other request is a
//! read-only lookup. Each history sits behind its own `RwLock`, which is
//! the per-document guard the coordinator takes for pushes and pulls.
//! Nothing is persisted: the store lives and dies with the process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::RwLock;

use crate::history::EditHistory;

/// A history together with its exclusive/shared guard.
pub type SharedHistory = Arc<RwLock<EditHistory>>;

/// Source of fresh document identifiers.
pub trait IdGenerator: Send + Sync {
    /// Produce a candidate identifier. Uniqueness is checked by the store.
    fn generate(&self) -> String;
}

/// Short random alphanumeric tokens.
#[derive(Debug, Clone)]
pub struct RandomIds {
    len: usize,
}

impl RandomIds {
    /// Tokens of `len` characters, at least one.
    pub fn new(len: usize) -> Self {
        Self { len: len.max(1) }
    }
}

impl Default for RandomIds {
    fn default() -> Self {
        Self::new(8)
    }
}

impl IdGenerator for RandomIds {
    fn generate(&self) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.len)
            .map(char::from)
            .collect()
    }
}

/// Deterministic `prefix-N` identifiers, for tests.
#[derive(Debug)]
pub struct SequentialIds {
    prefix: String,
    next: AtomicU64,
}

impl SequentialIds {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl IdGenerator for SequentialIds {
    fn generate(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}-{n}", self.prefix)
    }
}

/// Maps document identifiers to their histories.
pub struct HistoryStore {
    histories: RwLock<HashMap<String, SharedHistory>>,
    ids: Box<dyn IdGenerator>,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryStore {
    /// Store with random identifiers.
    pub fn new() -> Self {
        Self::with_generator(RandomIds::default())
    }

    /// Store with an injected identifier generator.
    pub fn with_generator(ids: impl IdGenerator + 'static) -> Self {
        Self {
            histories: RwLock::new(HashMap::new()),
            ids: Box::new(ids),
        }
    }

    /// Allocate a fresh identifier and register an empty history under it.
    ///
    /// The generator is asked again if it hands back an identifier
    /// that is already taken.
    pub async fn create_document(&self) -> SharedHistory {
        let mut histories = self.histories.write().await;
        let id = loop {
            let candidate = self.ids.generate();
            if !histories.contains_key(&candidate) {
                break candidate;
            }
            log::warn!("Document id {candidate} already taken, regenerating");
        };

        let history = Arc::new(RwLock::new(EditHistory::new(id.clone())));
        histories.insert(id, history.clone());
        history
    }

    /// Look up a history by identifier.
    pub async fn lookup(&self, id: &str) -> Option<SharedHistory> {
        self.histories.read().await.get(id).cloned()
    }

    /// Number of registered documents.
    pub async fn len(&self) -> usize {
        self.histories.read().await.len()
    }

    /// Whether no document has been created yet.
    pub async fn is_empty(&self) -> bool {
        self.histories.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Replays a fixed list of ids, to force collisions.
    struct ScriptedIds(Mutex<Vec<&'static str>>);

    impl IdGenerator for ScriptedIds {
        fn generate(&self) -> String {
            self.0.lock().unwrap().remove(0).to_string()
        }
    }

    #[test]
    fn test_random_ids_shape() {
        let ids = RandomIds::default();
        let a = ids.generate();
        let b = ids.generate();
        assert_eq!(a.len(), 8);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_sequential_ids() {
        let ids = SequentialIds::new("doc");
        assert_eq!(ids.generate(), "doc-1");
        assert_eq!(ids.generate(), "doc-2");
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let store = HistoryStore::with_generator(SequentialIds::new("doc"));
        assert!(store.is_empty().await);

        let history = store.create_document().await;
        let id = history.read().await.id().to_string();
        assert_eq!(id, "doc-1");
        assert_eq!(history.read().await.version(), 0);

        let found = store.lookup(&id).await.unwrap();
        assert!(Arc::ptr_eq(&history, &found));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_lookup_missing() {
        let store = HistoryStore::new();
        assert!(store.lookup("nope").await.is_none());
    }

    #[tokio::test]
    async fn test_create_skips_taken_ids() {
        let store = HistoryStore::with_generator(ScriptedIds(Mutex::new(vec!["a", "a", "b"])));

        let first = store.create_document().await;
        let second = store.create_document().await;

        assert_eq!(first.read().await.id(), "a");
        assert_eq!(second.read().await.id(), "b");
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_concurrent_creation() {
        let store = Arc::new(HistoryStore::new());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let history = store.create_document().await;
                let id = history.read().await.id().to_string();
                id
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 32);
        assert_eq!(store.len().await, 32);
    }
}
