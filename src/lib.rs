//! # Beacon - Structured Peer-to-Peer Overlay Core
//!
//! Beacon is the routing core of a structured overlay network: it finds
//! peers by public key. Three pieces do the heavy lifting:
//!
//! - **Routing table**: XOR-metric k-buckets tracking the peers this node
//!   has seen, closest-first queryable.
//! - **Iterative lookup**: parallel, deduplicated, timeout-bounded discovery
//!   of the closest live peers to any target key.
//! - **Typed codec**: a registry mapping message types to stable 16-bit
//!   op-codes so heterogeneous request/response objects share one stream.
//!
//! The crate deliberately owns no sockets. Hosts plug in a transport through
//! the [`OverlayRpc`] trait and route incoming requests through [`Overlay`];
//! everything else, including the mock networks used by the test suite, sits
//! on top of those two seams.
//!
//! ## Module Overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `identity` | Ed25519 keypairs, peer IDs, XOR distance metric |
//! | `table` | k-bucket routing table with closest-set queries |
//! | `lookup` | parallel iterative FindNode engine |
//! | `codec` | op-code registry and message framing |
//! | `messages` | overlay wire messages and their payload layouts |
//! | `protocols` | transport contract consumed by the core |
//! | `overlay` | responder answering FindNode from the local table |
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use beacon::{Id, IterativeLookup, Keypair, Overlay, OverlayRpc};
//!
//! # async fn run<T: OverlayRpc>(transport: Arc<T>) -> anyhow::Result<()> {
//! let keypair = Keypair::generate();
//! let self_id = Id::new(keypair.public_key(), "203.0.113.7".parse()?, 9000);
//!
//! let overlay = Overlay::new(self_id);
//! let lookup = IterativeLookup::new(transport, overlay.table());
//!
//! // Discover the peers closest to our own key to populate the table.
//! let found = lookup.find(keypair.public_key()).await;
//! for peer in &found {
//!     overlay.observe_peer(peer.clone());
//! }
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod identity;
pub mod lookup;
pub mod messages;
pub mod overlay;
pub mod protocols;
pub mod table;

pub use codec::{Codec, Message, WireError};
pub use identity::{
    distance_cmp, normalize_ip, prefix_len, sort_by_distance, Id, Keypair, PublicKey,
    SIZE_PUBLIC_KEY,
};
pub use lookup::IterativeLookup;
pub use messages::{
    register_all, FindNodeRequest, FindNodeResponse, OverlayOpcodes, Ping, Pong,
};
pub use overlay::Overlay;
pub use protocols::OverlayRpc;
pub use table::{BucketFullError, Table, BUCKET_SIZE, NUM_BUCKETS};
