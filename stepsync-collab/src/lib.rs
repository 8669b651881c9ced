//! # stepsync-collab — Version-gated step synchronization for shared editors
//!
//! Clients push batches of opaque edit steps for a document and are told
//! when someone else's steps land, so they can pull and re-render.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   POST /update     ┌─────────────────┐
//! │ Editor      │ ─────────────────► │ SyncCoordinator │──► EditHistory (per doc,
//! │ (per user)  │ ◄───────────────── │ (version gate)  │    RwLock-guarded)
//! └──────▲──────┘  steps / rebase    └────────┬────────┘
//!        │                                    │ publish
//!        │  ws "hey"                  ┌───────▼───────┐
//!        └─────────────────────────── │ Broker/Topic  │
//!                                     │ (actor/doc)   │
//!                                     └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`history`] — append-only step log and version counter
//! - [`store`] — document registry and identifier generation
//! - [`broadcast`] — per-document topic actors for change notifications
//! - [`coordinator`] — push/pull version gate
//! - [`protocol`] — JSON wire shapes
//! - [`http`] — axum request API
//! - [`server`] — listeners and WebSocket notification relay
//!
//! Everything is in memory; nothing survives a restart.

pub mod broadcast;
pub mod coordinator;
pub mod error;
pub mod history;
pub mod http;
pub mod protocol;
pub mod server;
pub mod store;

// Re-exports for convenience
pub use broadcast::{
    Broker, ChannelSubscriber, Notification, Subscriber, SubscriberId, TopicHandle, TopicStats,
};
pub use coordinator::{Instance, PushOutcome, SyncCoordinator};
pub use error::{NotifyError, SyncError, SyncResult};
pub use history::{EditHistory, HistorySlice, Step};
pub use protocol::{DocumentQuery, UpdateRequest, NOTIFICATION_TEXT};
pub use server::{ServerConfig, SyncServer};
pub use store::{HistoryStore, IdGenerator, RandomIds, SequentialIds, SharedHistory};
