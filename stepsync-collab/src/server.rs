//! Server runner: HTTP request API plus the notification socket.
//!
//! Architecture:
//! ```text
//! Client A ──HTTP──┐                         ┌──► EditHistory (RwLock)
//!                  ├── axum router ── SyncCoordinator
//! Client B ──HTTP──┘                         └──► Broker ── Topic(doc) ──┐
//!                                                                       │
//! Client A ◄──ws "hey"── connection task ◄── ChannelSubscriber ◄────────┤
//! Client B ◄──ws "hey"── connection task ◄── ChannelSubscriber ◄────────┘
//! ```
//!
//! Both listeners share one coordinator. Each WebSocket connection is
//! registered as a subscriber on its document's topic and unregistered
//! when it closes.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::Query;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{StatusCode, Uri};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::broadcast::{Broker, ChannelSubscriber, Notification, Subscriber};
use crate::coordinator::SyncCoordinator;
use crate::error::SyncError;
use crate::protocol::{DocumentQuery, NOTIFICATION_TEXT};
use crate::store::HistoryStore;

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// Path the notification socket is served on.
pub const NOTIFICATION_PATH: &str = "/ws";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address of the HTTP request API
    pub http_addr: String,
    /// Address of the WebSocket notification listener
    pub ws_addr: String,
    /// Command queue depth of each topic control loop
    pub topic_capacity: usize,
    /// Pending notifications buffered per connection
    pub notify_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "127.0.0.1:8000".to_string(),
            ws_addr: "127.0.0.1:8001".to_string(),
            topic_capacity: 64,
            notify_buffer: 16,
        }
    }
}

impl ServerConfig {
    pub fn with_http_addr(mut self, addr: impl Into<String>) -> Self {
        self.http_addr = addr.into();
        self
    }

    pub fn with_ws_addr(mut self, addr: impl Into<String>) -> Self {
        self.ws_addr = addr.into();
        self
    }

    pub fn with_topic_capacity(mut self, capacity: usize) -> Self {
        self.topic_capacity = capacity;
        self
    }

    pub fn with_notify_buffer(mut self, buffer: usize) -> Self {
        self.notify_buffer = buffer;
        self
    }
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    coordinator: Arc<SyncCoordinator>,
}

impl SyncServer {
    /// Create a server with a fresh in-memory coordinator.
    pub fn new(config: ServerConfig) -> Self {
        let broker = Broker::new(config.topic_capacity);
        let coordinator = Arc::new(SyncCoordinator::new(HistoryStore::new(), broker));
        Self::with_coordinator(config, coordinator)
    }

    /// Create a server around an existing coordinator.
    pub fn with_coordinator(config: ServerConfig, coordinator: Arc<SyncCoordinator>) -> Self {
        Self {
            config,
            coordinator,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    /// Bind both configured addresses and serve until the HTTP side fails.
    pub async fn run(&self) -> Result<(), BoxError> {
        let http = TcpListener::bind(&self.config.http_addr).await?;
        let ws = TcpListener::bind(&self.config.ws_addr).await?;
        self.serve(http, ws).await
    }

    /// Serve on already bound listeners.
    pub async fn serve(&self, http: TcpListener, ws: TcpListener) -> Result<(), BoxError> {
        log::info!("Editor service starting at {}", http.local_addr()?);
        log::info!("Notifications served at ws://{}{NOTIFICATION_PATH}", ws.local_addr()?);

        let notifications = tokio::spawn(Self::accept_notifications(
            ws,
            self.coordinator.clone(),
            self.config.notify_buffer,
        ));

        let app = crate::http::router(self.coordinator.clone());
        let served = axum::serve(http, app).await;
        notifications.abort();
        served?;
        Ok(())
    }

    async fn accept_notifications(
        listener: TcpListener,
        coordinator: Arc<SyncCoordinator>,
        notify_buffer: usize,
    ) -> std::io::Result<()> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                if let Err(e) =
                    Self::handle_connection(stream, addr, coordinator, notify_buffer).await
                {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Upgrade, subscribe, then relay notifications until either side quits.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        coordinator: Arc<SyncCoordinator>,
        notify_buffer: usize,
    ) -> Result<(), BoxError> {
        let mut requested = None;
        let ws_stream = tokio_tungstenite::accept_hdr_async(
            stream,
            |request: &Request, response: Response| match requested_document(request.uri()) {
                Ok(doc_id) => {
                    requested = Some(doc_id);
                    Ok(response)
                }
                Err((status, reason)) => {
                    log::warn!("Error: {reason}");
                    let mut rejection = ErrorResponse::new(Some(reason));
                    *rejection.status_mut() = status;
                    Err(rejection)
                }
            },
        )
        .await?;
        let Some(doc_id) = requested else {
            return Ok(());
        };
        log::info!("ws connection requested for {doc_id}");

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (subscriber, mut notifications) = ChannelSubscriber::new(notify_buffer);
        let subscriber_id = subscriber.id();

        if let Err(e) = coordinator.subscribe(&doc_id, Box::new(subscriber)).await {
            log::warn!("Error: {e}");
            let frame = CloseFrame {
                code: CloseCode::Policy,
                reason: e.to_string().into(),
            };
            ws_sender.send(Message::Close(Some(frame))).await?;
            return Ok(());
        }
        log::info!("ws connection established for {doc_id}");

        let relayed = Self::relay(
            &mut ws_sender,
            &mut ws_receiver,
            &mut notifications,
            addr,
        )
        .await;

        match coordinator.unsubscribe(&doc_id, subscriber_id).await {
            Ok(()) | Err(SyncError::TopicNotFound(_)) => {}
            Err(e) => log::debug!("Unsubscribe from {doc_id} failed: {e}"),
        }
        log::info!("Connection closed from {addr}");
        relayed
    }

    async fn relay(
        ws_sender: &mut WsSink,
        ws_receiver: &mut WsSource,
        notifications: &mut mpsc::Receiver<Notification>,
        addr: SocketAddr,
    ) -> Result<(), BoxError> {
        loop {
            tokio::select! {
                notification = notifications.recv() => {
                    match notification {
                        Some(Notification) => {
                            ws_sender.send(Message::Text(NOTIFICATION_TEXT.into())).await?;
                        }
                        None => {
                            // Evicted by the topic after a failed delivery.
                            log::info!("Subscriber at {addr} dropped by topic, closing");
                            ws_sender.send(Message::Close(None)).await?;
                            return Ok(());
                        }
                    }
                }

                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => return Ok(()),
                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            return Ok(());
                        }
                        Some(Ok(_)) => {}
                    }
                }
            }
        }
    }
}

/// Document named by a notification upgrade request.
fn requested_document(uri: &Uri) -> Result<String, (StatusCode, String)> {
    if uri.path() != NOTIFICATION_PATH {
        return Err((StatusCode::NOT_FOUND, format!("no such path: {}", uri.path())));
    }
    let Query(query) = Query::<DocumentQuery>::try_from_uri(uri)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    query
        .doc_id()
        .map(str::to_string)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))
}
