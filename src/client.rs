use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::dsn::Dsn;
use crate::error::{HookError, NotifyError};
use crate::packet::Packet;
use crate::transport::Transport;

/// Eventual outcome of one captured packet. Resolves exactly once.
pub type Delivery = oneshot::Receiver<Result<(), NotifyError>>;

/// Anything that accepts a packet and reports the delivery outcome later.
///
/// `capture` must return without waiting on the network.
pub trait Notifier: Send + Sync {
    fn capture(&self, packet: Packet) -> Delivery;
}

/// Default [`Notifier`]: adds client-wide tags and hands each packet to a
/// [`Transport`] on its own Tokio task.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    tags: BTreeMap<String, String>,
}

impl Client {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            tags: BTreeMap::new(),
        }
    }

    /// Tags added to every packet. Tags already on a packet take precedence.
    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    /// Create an HTTP client for the given DSN.
    ///
    /// Fails on a malformed DSN, or when the `http` feature is disabled.
    pub fn from_dsn(dsn: &str, tags: BTreeMap<String, String>) -> Result<Self, HookError> {
        let dsn: Dsn = dsn.parse()?;

        #[cfg(feature = "http")]
        {
            use crate::http::HttpTransport;

            let transport = HttpTransport::new(dsn)?;
            Ok(Client::new(Arc::new(transport)).with_tags(tags))
        }

        #[cfg(not(feature = "http"))]
        {
            let _ = (dsn, tags);
            Err(HookError::Client("http feature is not enabled".to_string()))
        }
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    fn apply_tags(&self, packet: &mut Packet) {
        if self.tags.is_empty() {
            return;
        }
        let tags = packet.tags.get_or_insert_with(BTreeMap::new);
        for (key, value) in &self.tags {
            tags.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
}

impl Notifier for Client {
    fn capture(&self, mut packet: Packet) -> Delivery {
        self.apply_tags(&mut packet);

        let (tx, rx) = oneshot::channel();
        match Handle::try_current() {
            Ok(runtime) => {
                let transport = Arc::clone(&self.transport);
                runtime.spawn(async move {
                    let outcome = transport.send(&packet).await;
                    // Nobody may be waiting any more; that is fine.
                    let _ = tx.send(outcome);
                });
            }
            Err(_) => {
                let _ = tx.send(Err(NotifyError::NoRuntime));
            }
        }
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noop_transport::NoopTransport;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        packets: Mutex<Vec<Packet>>,
    }

    #[async_trait]
    impl Transport for Recording {
        async fn send(&self, packet: &Packet) -> Result<(), NotifyError> {
            self.packets.lock().expect("lock").push(packet.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn capture_delivers_through_the_transport() {
        let transport = Arc::new(Recording::default());
        let client = Client::new(transport.clone()).with_tags(BTreeMap::from([
            ("service".to_string(), "auth".to_string()),
            ("region".to_string(), "eu".to_string()),
        ]));

        let mut packet = Packet::new("boom");
        packet.tags = Some(BTreeMap::from([("region".to_string(), "us".to_string())]));
        let outcome = client.capture(packet).await.expect("outcome");
        assert_eq!(outcome, Ok(()));

        let packets = transport.packets.lock().expect("lock");
        let tags = packets[0].tags.as_ref().expect("tags");
        assert_eq!(tags["service"], "auth");
        assert_eq!(tags["region"], "us");
    }

    #[test]
    fn capture_without_runtime_reports_an_error() {
        let client = Client::new(Arc::new(NoopTransport));
        let mut delivery = client.capture(Packet::new("boom"));
        assert_eq!(delivery.try_recv().expect("outcome"), Err(NotifyError::NoRuntime));
    }

    #[test]
    fn from_dsn_rejects_malformed_dsn() {
        let err = Client::from_dsn("not a dsn", BTreeMap::new()).err().expect("error");
        assert!(matches!(err, HookError::Dsn(_)));
    }
}
