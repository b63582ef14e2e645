use std::sync::Arc;
use std::time::Instant;
use tracing::error;

use sentry_log_hook::client::Client;
use sentry_log_hook::hook::{Hook, DEFAULT_LEVELS};
use sentry_log_hook::init::{init_tracing_with_config, LayerConfig};
use sentry_log_hook::noop_transport::NoopTransport;

#[tokio::main]
async fn main() {
    let client = Client::new(Arc::new(NoopTransport));
    let hook = Arc::new(
        Hook::with_client_async(Arc::new(client), DEFAULT_LEVELS.to_vec()).expect("hook"),
    );

    let layer_config = LayerConfig { enable_stdout: false };
    init_tracing_with_config(Arc::clone(&hook), layer_config).expect("install subscriber");

    let n: u64 = 10_000;
    let start = Instant::now();

    for i in 0..n {
        error!(iteration = i, "async load test error");
    }

    let fired = start.elapsed();
    hook.flush().await;
    let flushed = start.elapsed();

    println!(
        "async hook: fired {} events in {:?} (~{:.0} ev/s), all delivered after {:?}",
        n,
        fired,
        n as f64 / fired.as_secs_f64(),
        flushed
    );
}
