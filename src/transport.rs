use crate::error::NotifyError;
use crate::packet::Packet;
use async_trait::async_trait;

/// Asynchronous destination for [`Packet`]s built by the hook.
///
/// Implementations are responsible for getting a packet to a concrete
/// server (HTTP store endpoint, a test double, etc). The [`Client`] calls
/// `send` from a background task and never on the logging thread.
///
/// [`Client`]: crate::client::Client
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a single packet.
    ///
    /// **Returns**
    /// - `Ok(())` if the server accepted the packet.
    /// - `Err(..)` if the server rejected it or it never got there. The
    ///   error is reported once and the packet is not retried.
    async fn send(&self, packet: &Packet) -> Result<(), NotifyError>;
}
