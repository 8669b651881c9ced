//! stepsync server — collaborative editing backend.
//!
//! Serves the request API (`/new`, `/update`, `/?name=&version=`) over
//! HTTP and change notifications over a WebSocket listener.

use clap::Parser;
use log::info;
use stepsync_collab::{ServerConfig, SyncServer};

/// Step synchronization server for collaborative editors.
#[derive(Parser, Debug)]
#[command(name = "stepsync-server")]
#[command(version, about, long_about = None)]
struct Cli {
    /// HTTP service address
    #[arg(long, default_value = "127.0.0.1:8000")]
    addr: String,

    /// WebSocket notification address
    #[arg(long, default_value = "127.0.0.1:8001")]
    ws_addr: String,

    /// Queue depth in front of each document's topic
    #[arg(long, default_value_t = 64)]
    topic_capacity: usize,

    /// Notifications buffered per connection before it is dropped
    #[arg(long, default_value_t = 16)]
    notify_buffer: usize,
}

impl Cli {
    fn config(&self) -> ServerConfig {
        ServerConfig::default()
            .with_http_addr(&self.addr)
            .with_ws_addr(&self.ws_addr)
            .with_topic_capacity(self.topic_capacity)
            .with_notify_buffer(self.notify_buffer)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let server = SyncServer::new(cli.config());
    info!("Starting stepsync server...");
    server.run().await
}
