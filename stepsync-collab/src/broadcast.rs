//! Per-document change notification fan-out.
//!
//! Each topic is an actor: one tokio task owns the subscriber set and
//! drains a single command queue. Subscribe, unsubscribe and publish are
//! therefore totally ordered per topic, and the set is never touched
//! while it is being iterated.
//!
//! ```text
//!  push ──► Broker::publish(id) ──┐
//!  ws   ──► Broker::subscribe ────┼──► mpsc ──► Topic loop ──► notify() ─► sub A
//!  ws   ──► Broker::unsubscribe ──┘                         └─► notify() ─► sub B
//! ```
//!
//! Notifications carry no payload. A subscriber re-reads the history
//! through the pull path, so the channel needs no ordering or
//! consistency guarantees of its own. Delivery is best effort: a
//! subscriber whose `notify` fails is dropped from the set for good.

use std::collections::HashMap;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, RwLock};
use uuid::Uuid;

use crate::error::{NotifyError, SyncError, SyncResult};

/// Identity of a subscribed connection.
pub type SubscriberId = Uuid;

/// Anything that can be told "this document changed".
///
/// `notify` must not block; the topic loop calls it inline.
pub trait Subscriber: Send + Sync + 'static {
    fn id(&self) -> SubscriberId;
    fn notify(&self) -> Result<(), NotifyError>;
}

/// Payload-less change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification;

/// Subscriber backed by a bounded tokio channel.
///
/// The receiving half is usually drained by a connection writer task.
#[derive(Debug, Clone)]
pub struct ChannelSubscriber {
    id: SubscriberId,
    sender: mpsc::Sender<Notification>,
}

impl ChannelSubscriber {
    /// Create a subscriber and the receiver its notifications arrive on.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let subscriber = Self {
            id: Uuid::new_v4(),
            sender,
        };
        (subscriber, receiver)
    }
}

impl Subscriber for ChannelSubscriber {
    fn id(&self) -> SubscriberId {
        self.id
    }

    fn notify(&self) -> Result<(), NotifyError> {
        match self.sender.try_send(Notification) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(NotifyError::Full),
            Err(TrySendError::Closed(_)) => Err(NotifyError::Closed),
        }
    }
}

/// Snapshot of a topic's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicStats {
    pub subscribers: usize,
    pub publishes: u64,
    pub deliveries: u64,
    pub evictions: u64,
}

enum TopicCommand {
    Subscribe(Box<dyn Subscriber>),
    Unsubscribe(SubscriberId),
    Publish,
    Stats(oneshot::Sender<TopicStats>),
}

/// The control loop state. Lives inside its own task only.
struct Topic {
    name: String,
    subscribers: HashMap<SubscriberId, Box<dyn Subscriber>>,
    stats: TopicStats,
    commands: mpsc::Receiver<TopicCommand>,
}

impl Topic {
    fn spawn(name: &str, capacity: usize) -> TopicHandle {
        let (sender, commands) = mpsc::channel(capacity.max(1));
        let topic = Topic {
            name: name.to_string(),
            subscribers: HashMap::new(),
            stats: TopicStats::default(),
            commands,
        };
        tokio::spawn(topic.run());
        TopicHandle {
            name: name.to_string(),
            commands: sender,
        }
    }

    async fn run(mut self) {
        log::info!("Topic {} started", self.name);
        while let Some(command) = self.commands.recv().await {
            self.handle(command);
        }
        log::debug!("Topic {} stopped", self.name);
    }

    fn handle(&mut self, command: TopicCommand) {
        match command {
            TopicCommand::Subscribe(subscriber) => {
                let id = subscriber.id();
                self.subscribers.insert(id, subscriber);
                log::info!("Subscriber {id} added to topic {}", self.name);
            }
            TopicCommand::Unsubscribe(id) => {
                if self.subscribers.remove(&id).is_some() {
                    log::info!("Subscriber {id} removed from topic {}", self.name);
                }
            }
            TopicCommand::Publish => self.publish(),
            TopicCommand::Stats(reply) => {
                let mut stats = self.stats.clone();
                stats.subscribers = self.subscribers.len();
                let _ = reply.send(stats);
            }
        }
    }

    fn publish(&mut self) {
        let name = &self.name;
        let before = self.subscribers.len();

        self.subscribers.retain(|id, subscriber| match subscriber.notify() {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Dropping subscriber {id} from topic {name}: {e}");
                false
            }
        });

        let delivered = self.subscribers.len();
        self.stats.publishes += 1;
        self.stats.deliveries += delivered as u64;
        self.stats.evictions += (before - delivered) as u64;
        log::debug!("Published to {delivered} subscribers of topic {name}");
    }
}

/// Cloneable sending side of a topic's command queue.
///
/// Every method waits until the control loop has room to accept the
/// request, not until it has been processed (except `stats`).
#[derive(Clone)]
pub struct TopicHandle {
    name: String,
    commands: mpsc::Sender<TopicCommand>,
}

impl TopicHandle {
    /// Document this topic belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a notification to every current subscriber.
    pub async fn publish(&self) -> SyncResult<()> {
        self.send(TopicCommand::Publish).await
    }

    /// Add a subscriber. One with the same id is replaced.
    pub async fn subscribe(&self, subscriber: Box<dyn Subscriber>) -> SyncResult<()> {
        self.send(TopicCommand::Subscribe(subscriber)).await
    }

    /// Remove a subscriber. Unknown ids are ignored.
    pub async fn unsubscribe(&self, id: SubscriberId) -> SyncResult<()> {
        self.send(TopicCommand::Unsubscribe(id)).await
    }

    /// Counters as seen by the loop after every earlier command.
    pub async fn stats(&self) -> SyncResult<TopicStats> {
        let (reply, response) = oneshot::channel();
        self.send(TopicCommand::Stats(reply)).await?;
        response
            .await
            .map_err(|_| SyncError::TopicClosed(self.name.clone()))
    }

    async fn send(&self, command: TopicCommand) -> SyncResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SyncError::TopicClosed(self.name.clone()))
    }
}

/// Registry of topics, one per document.
pub struct Broker {
    topics: RwLock<HashMap<String, TopicHandle>>,
    capacity: usize,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Broker {
    /// `capacity` is the command queue depth of each topic.
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Start a topic for `id`. An existing topic is kept and returned.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn new_topic(&self, id: &str) -> TopicHandle {
        let mut topics = self.topics.write().await;
        if let Some(topic) = topics.get(id) {
            log::debug!("Topic {id} already exists");
            return topic.clone();
        }
        let topic = Topic::spawn(id, self.capacity);
        topics.insert(id.to_string(), topic.clone());
        topic
    }

    /// Look up the topic for `id`.
    pub async fn topic(&self, id: &str) -> SyncResult<TopicHandle> {
        self.topics
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::TopicNotFound(id.to_string()))
    }

    pub async fn publish(&self, id: &str) -> SyncResult<()> {
        self.topic(id).await?.publish().await
    }

    pub async fn subscribe(&self, id: &str, subscriber: Box<dyn Subscriber>) -> SyncResult<()> {
        self.topic(id).await?.subscribe(subscriber).await
    }

    pub async fn unsubscribe(&self, id: &str, subscriber: SubscriberId) -> SyncResult<()> {
        self.topic(id).await?.unsubscribe(subscriber).await
    }

    pub async fn stats(&self, id: &str) -> SyncResult<TopicStats> {
        self.topic(id).await?.stats().await
    }

    /// Number of live topics.
    pub async fn topic_count(&self) -> usize {
        self.topics.read().await.len()
    }

    /// Identifiers of all live topics.
    pub async fn active_topics(&self) -> Vec<String> {
        self.topics.read().await.keys().cloned().collect()
    }
}
