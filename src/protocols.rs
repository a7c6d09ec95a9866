//! Transport contract consumed by the overlay core.
//!
//! The core never dials sockets itself. Everything it needs from the host
//! node is captured by [`OverlayRpc`]: a one-shot request/response exchange
//! plus the local peer's ID. Keeping the trait here, away from any concrete
//! transport, lets the lookup engine and responder be exercised against
//! in-memory networks in tests and embedded behind whatever transport the
//! host provides in production.

use anyhow::Result;
use async_trait::async_trait;

use crate::codec::Message;
use crate::identity::Id;

/// One-shot request/response access to the overlay network.
///
/// Implementations are expected to encode `message` with the process codec,
/// deliver it to `address`, and hand back the decoded reply. Deadlines are
/// applied by callers around the returned future, so implementations may
/// block for as long as the underlying transport allows.
#[async_trait]
pub trait OverlayRpc: Send + Sync + 'static {
    /// Send `message` to the peer at `address` and await its reply.
    async fn request_message(
        &self,
        address: &str,
        message: Box<dyn Message>,
    ) -> Result<Box<dyn Message>>;

    /// The local peer's ID (public key and reachable address).
    fn local_id(&self) -> Id;
}
