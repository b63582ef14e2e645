use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};
use sentry_log_hook::{
    client::Client,
    error::NotifyError,
    hook::Hook,
    init::init_tracing,
    packet::Packet,
    transport::Transport,
    Level,
};

/// Prints packets instead of posting them. Any destination that accepts a
/// Sentry packet can be plugged in the same way.
struct StdoutTransport;

#[async_trait]
impl Transport for StdoutTransport {
    async fn send(&self, packet: &Packet) -> Result<(), NotifyError> {
        let body = serde_json::to_string_pretty(packet).map_err(|e| NotifyError::Serialize(e.to_string()))?;
        println!("[stdout-sentry] {body}");
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    let tags = BTreeMap::from([("service".to_string(), "demo".to_string())]);
    let client = Client::new(Arc::new(StdoutTransport)).with_tags(tags);
    let hook = Arc::new(Hook::with_client(Arc::new(client), vec![Level::Error, Level::Warn]).expect("hook"));

    init_tracing(hook).expect("install subscriber");

    info!("custom transport example started");
    error!(db = "orders", tags = %serde_json::json!({"shard": "3"}), "simulated error sent via custom transport");
}
