//! Connects to a DDP server, logs everything it pushes, and calls a method.
//!
//! ```text
//! DDP_URL=ws://localhost:3000/websocket \
//! DDP_SUBSCRIBE=tasks DDP_METHOD=tasks.count \
//! RUST_LOG=meteor_ddp=debug cargo run -p ddp-console
//! ```

use std::sync::Arc;
use std::time::Duration;

use meteor_ddp::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Logs every client event.
struct ConsoleObserver;

impl DdpObserver for ConsoleObserver {
    fn on_connect(&self, signed_in_automatically: bool) {
        info!(signed_in_automatically, "connected");
    }

    fn on_disconnect(&self) {
        warn!("disconnected");
    }

    fn on_exception(&self, error: &DdpError) {
        warn!(%error, "client error");
    }

    fn on_data_added(&self, change: &DocumentChange) {
        info!(collection = %change.collection, id = %change.id, fields = ?change.fields, "added");
    }

    fn on_data_changed(&self, change: &DocumentChange) {
        info!(
            collection = %change.collection,
            id = %change.id,
            fields = ?change.fields,
            cleared = ?change.cleared,
            "changed"
        );
    }

    fn on_data_removed(&self, change: &DocumentChange) {
        info!(collection = %change.collection, id = %change.id, "removed");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let url = std::env::var("DDP_URL")
        .unwrap_or_else(|_| "ws://localhost:3000/websocket".to_string());
    info!(%url, "starting DDP console");

    let session = DdpSession::builder()
        .url(&url)
        .build(MemoryCredentialStore::new())?;
    session.add_observer(Arc::new(ConsoleObserver));
    session.connect();

    if let Ok(publication) = std::env::var("DDP_SUBSCRIBE") {
        match session.subscribe_async(&publication, vec![]).await {
            Ok(id) => info!(%publication, %id, "subscription ready"),
            Err(error) => warn!(%publication, %error, "subscription failed"),
        }
    }

    if let Ok(method) = std::env::var("DDP_METHOD") {
        match session.call_async(&method, vec![]).await {
            Ok(result) => info!(%method, ?result, "method returned"),
            Err(error) => warn!(%method, %error, "method failed"),
        }
    }

    info!("watching for changes, press Ctrl-C to quit");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = tokio::time::sleep(Duration::from_secs(3600)) => {}
    }

    session.disconnect();
    // Give the close frame a moment to go out.
    tokio::time::sleep(Duration::from_millis(100)).await;
    Ok(())
}
