//! Version-gated push/pull over shared edit histories.
//!
//! A push is accepted only when the client is exactly at the current
//! version. Otherwise nothing is written and the client gets back the
//! steps it is missing, so it can rebase its pending edits and retry.
//! Both outcomes are successes; merging is the client's job.
//!
//! ```text
//!            ┌────────── write lock ──────────┐
//! push ──►   │ client_version == version() ?  │
//!            │   yes: append, publish ────────┼──► Applied(steps just added)
//!            │   no:  leave history alone ────┼──► Rebase(steps client lacks)
//!            └────────────────────────────────┘
//! pull ──► read lock ──► steps_since(version)
//! ```

use serde_json::Value;

use crate::broadcast::{Broker, Subscriber, SubscriberId, TopicHandle};
use crate::error::{SyncError, SyncResult};
use crate::history::HistorySlice;
use crate::store::{HistoryStore, SharedHistory};

/// Live binding of one document's history, topic and guard.
#[derive(Clone)]
pub struct Instance {
    id: String,
    /// The `RwLock` here is the document's exclusive/shared guard.
    history: SharedHistory,
    topic: TopicHandle,
}

impl Instance {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn history(&self) -> &SharedHistory {
        &self.history
    }

    pub fn topic(&self) -> &TopicHandle {
        &self.topic
    }

    /// Steps committed after `version`, under the shared guard.
    pub async fn pull_updates(&self, version: i64) -> SyncResult<HistorySlice> {
        if version < 0 {
            return Err(SyncError::InvalidRequest(format!("invalid version: {version}")));
        }
        self.history.read().await.slice_since(version)
    }
}

/// Result of a push.
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    /// Steps were committed. Carries exactly the steps that were appended.
    Applied(HistorySlice),
    /// Client is behind. Carries the steps it must rebase onto.
    Rebase(HistorySlice),
}

impl PushOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, PushOutcome::Applied(_))
    }

    pub fn slice(&self) -> &HistorySlice {
        match self {
            PushOutcome::Applied(slice) | PushOutcome::Rebase(slice) => slice,
        }
    }

    pub fn into_slice(self) -> HistorySlice {
        match self {
            PushOutcome::Applied(slice) | PushOutcome::Rebase(slice) => slice,
        }
    }
}

/// Per-document synchronization logic over the history store and the
/// topic registry.
///
/// Constructed once and shared by every request handler.
pub struct SyncCoordinator {
    store: HistoryStore,
    broker: Broker,
}

impl Default for SyncCoordinator {
    fn default() -> Self {
        Self::new(HistoryStore::new(), Broker::default())
    }
}

impl SyncCoordinator {
    pub fn new(store: HistoryStore, broker: Broker) -> Self {
        Self { store, broker }
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    pub fn store(&self) -> &HistoryStore {
        &self.store
    }

    /// Create a document: fresh history, its topic, and the binding.
    ///
    /// Returns the (empty) version-0 slice.
    pub async fn create_document(&self) -> SyncResult<HistorySlice> {
        let history = self.store.create_document().await;
        let slice = history.read().await.slice_since(0)?;
        let id = slice.doc_id.clone();

        self.broker.new_topic(&id).await;

        log::info!("Document {id} created");
        Ok(slice)
    }

    /// Resolve a document identifier to its history and topic.
    pub async fn instance(&self, id: &str) -> SyncResult<Instance> {
        let history = self
            .store
            .lookup(id)
            .await
            .ok_or_else(|| SyncError::NotFound(id.to_string()))?;
        let topic = self.broker.topic(id).await?;
        Ok(Instance {
            id: id.to_string(),
            history,
            topic,
        })
    }

    /// Submit `steps` written by `client_id` against `client_version`.
    pub async fn push_update(
        &self,
        id: &str,
        client_id: i64,
        client_version: i64,
        steps: Vec<Value>,
    ) -> SyncResult<PushOutcome> {
        if client_id <= 0 {
            return Err(SyncError::InvalidRequest(format!(
                "invalid ClientID: {client_id}"
            )));
        }
        if id.is_empty() {
            return Err(SyncError::InvalidRequest("invalid FileName: \"\"".into()));
        }
        if client_version < 0 {
            return Err(SyncError::InvalidRequest(format!(
                "invalid ClientVersion: {client_version}"
            )));
        }

        let instance = self.instance(id).await?;
        let mut history = instance.history.write().await;
        let current = history.version();

        if usize::try_from(client_version).ok() == Some(current) {
            log::info!(
                "{id}: server += {} steps from client {client_id}",
                steps.len()
            );
            history.append_steps(steps, client_id.unsigned_abs());
            instance.topic.publish().await?;
            Ok(PushOutcome::Applied(history.slice_since(client_version)?))
        } else {
            log::info!("{id}: client {client_id} needs to rebase from {client_version} to {current}");
            Ok(PushOutcome::Rebase(history.slice_since(client_version)?))
        }
    }

    /// Steps committed after `version`.
    pub async fn pull_updates(&self, id: &str, version: i64) -> SyncResult<HistorySlice> {
        if id.is_empty() {
            return Err(SyncError::InvalidRequest("invalid fileName: \"\"".into()));
        }
        self.instance(id).await?.pull_updates(version).await
    }

    /// Current version of a document.
    pub async fn version(&self, id: &str) -> SyncResult<usize> {
        let instance = self.instance(id).await?;
        let version = instance.history.read().await.version();
        Ok(version)
    }

    /// Register a subscriber for change notifications on `id`.
    pub async fn subscribe(&self, id: &str, subscriber: Box<dyn Subscriber>) -> SyncResult<()> {
        self.broker.subscribe(id, subscriber).await
    }

    pub async fn unsubscribe(&self, id: &str, subscriber: SubscriberId) -> SyncResult<()> {
        self.broker.unsubscribe(id, subscriber).await
    }

    /// Number of documents created so far.
    pub async fn document_count(&self) -> usize {
        self.store.len().await
    }
}
