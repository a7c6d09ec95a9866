//! Responder side of the overlay protocol.
//!
//! [`Overlay`] answers incoming FindNode requests out of the local routing
//! table and keeps that table fed with peers observed on the wire. The
//! transport hosting the overlay is expected to call [`observe_peer`] for
//! every authenticated peer it hears from, route decoded
//! [`FindNodeRequest`]s through [`handle_find_node`], and call
//! [`forget_address`] when a connection goes away.
//!
//! [`observe_peer`]: Overlay::observe_peer
//! [`handle_find_node`]: Overlay::handle_find_node
//! [`forget_address`]: Overlay::forget_address

use std::sync::Arc;

use tracing::debug;

use crate::identity::Id;
use crate::messages::{FindNodeRequest, FindNodeResponse};
use crate::table::{Table, BUCKET_SIZE};

/// Serves routing information from the local table.
#[derive(Debug, Clone)]
pub struct Overlay {
    table: Arc<Table>,
}

impl Overlay {
    /// Create an overlay with a fresh routing table owned by `self_id`.
    pub fn new(self_id: Id) -> Self {
        Self {
            table: Arc::new(Table::new(self_id)),
        }
    }

    /// Create an overlay over an existing shared routing table.
    pub fn with_table(table: Arc<Table>) -> Self {
        Self { table }
    }

    /// The routing table backing this overlay.
    pub fn table(&self) -> Arc<Table> {
        Arc::clone(&self.table)
    }

    /// Answer a FindNode request from `from`.
    ///
    /// Returns up to [`BUCKET_SIZE`] recorded IDs sorted by this node's XOR
    /// distance to the requested target. The requester and the target key
    /// itself are never included.
    pub fn handle_find_node(&self, from: &Id, request: &FindNodeRequest) -> FindNodeResponse {
        // Over-fetch by one so dropping the requester cannot leave a slot
        // empty while a farther peer was available.
        let mut results = self.table.find_closest(&request.target, BUCKET_SIZE + 1);
        results.retain(|id| id.public_key != from.public_key);
        results.truncate(BUCKET_SIZE);

        FindNodeResponse { results }
    }

    /// Record a peer observed on the wire.
    ///
    /// A full bucket drops the observation: the table keeps the peers it
    /// already knows, and eviction stays a caller policy.
    pub fn observe_peer(&self, id: Id) {
        if let Err(err) = self.table.update(id) {
            debug!(
                peer = %hex::encode(&err.public_key.as_bytes()[..8]),
                "bucket full, observed peer not recorded"
            );
        }
    }

    /// Evict the peer recorded at `address`, if any. Called on disconnect.
    pub fn forget_address(&self, address: &str) -> Option<Id> {
        let removed = self.table.remove_by_address(address);
        if let Some(id) = &removed {
            debug!(
                peer = %hex::encode(&id.public_key.as_bytes()[..8]),
                addr = address,
                "peer evicted from routing table"
            );
        }
        removed
    }
}
