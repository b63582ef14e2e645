use crate::error::NotifyError;
use crate::packet::Packet;
use crate::transport::Transport;
use async_trait::async_trait;

/// A transport that simply drops all packets.
///
/// Useful for measuring the overhead of packet construction without any
/// network I/O, and for tests that don't care about delivery.
#[derive(Clone, Default)]
pub struct NoopTransport;

#[async_trait]
impl Transport for NoopTransport {
    async fn send(&self, _packet: &Packet) -> Result<(), NotifyError> {
        Ok(())
    }
}
