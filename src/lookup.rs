//! Iterative parallel peer lookup.
//!
//! [`IterativeLookup::find`] discovers the closest live peers to a target
//! key by walking outward from the local routing table. Discovery is split
//! into a fixed number of independent lookup streams; each stream drains its
//! own work queue with a bounded set of in-flight FindNode requests and
//! feeds newly learned candidates back into that queue. A shared visited set
//! guarantees no key is ever queried twice across the whole call.
//!
//! ```text
//! table.peers() ── round robin ──> queue 0 ─> stream 0 ─┐
//!                                  queue 1 ─> stream 1 ─┼─> confirmed ─> sort, truncate
//!                                  queue 2 ─> stream 2 ─┘
//! ```
//!
//! Peers that answer a FindNode request within the per-request timeout are
//! confirmed; peers that fail or answer nonsense are silently skipped, so a
//! dead peer can never abort discovery. `find` returns once every stream has
//! exhausted its queue.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::debug;

use crate::identity::{sort_by_distance, Id, PublicKey};
use crate::messages::{FindNodeRequest, FindNodeResponse};
use crate::protocols::OverlayRpc;
use crate::table::{Table, BUCKET_SIZE};

/// Default number of independent lookup streams per `find`.
const DEFAULT_PARALLEL_LOOKUPS: usize = 3;

/// Default cap on in-flight requests within one stream.
const DEFAULT_REQUESTS_PER_LOOKUP: usize = 8;

/// Default wall-clock bound on a single FindNode request.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Parallel discovery of the closest live peers to a public key.
///
/// Bound to a transport and a routing table at construction; tunables are
/// adjusted builder-style:
///
/// ```no_run
/// # use std::sync::Arc;
/// # use beacon::{IterativeLookup, OverlayRpc, Table};
/// # fn wire<N: OverlayRpc>(transport: Arc<N>, table: Arc<Table>) {
/// let lookup = IterativeLookup::new(transport, table)
///     .with_parallel_lookups(4)
///     .with_request_timeout(std::time::Duration::from_secs(1));
/// # }
/// ```
///
/// A single instance serves one `find` at a time; every call owns its own
/// queues and visited set.
pub struct IterativeLookup<N: OverlayRpc> {
    transport: Arc<N>,
    table: Arc<Table>,

    max_results: usize,
    parallel_lookups: usize,
    requests_per_lookup: usize,
    request_timeout: Duration,
}

impl<N: OverlayRpc> IterativeLookup<N> {
    pub fn new(transport: Arc<N>, table: Arc<Table>) -> Self {
        Self {
            transport,
            table,
            max_results: BUCKET_SIZE,
            parallel_lookups: DEFAULT_PARALLEL_LOOKUPS,
            requests_per_lookup: DEFAULT_REQUESTS_PER_LOOKUP,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Cap on the number of peers returned by [`find`](Self::find).
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    /// Number of independent lookup streams. Clamped to at least one.
    pub fn with_parallel_lookups(mut self, parallel_lookups: usize) -> Self {
        self.parallel_lookups = parallel_lookups.max(1);
        self
    }

    /// In-flight request cap per stream. Clamped to at least one.
    pub fn with_requests_per_lookup(mut self, requests_per_lookup: usize) -> Self {
        self.requests_per_lookup = requests_per_lookup.max(1);
        self
    }

    /// Wall-clock bound applied to each FindNode request.
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Discover up to `max_results` live peers closest to `target`, sorted
    /// by ascending XOR distance.
    ///
    /// Neither the local key nor `target` ever appears in the result, and no
    /// peer is queried or reported more than once. Transport failures are
    /// absorbed: an unreachable peer costs at most one request timeout in
    /// its stream and is left out of the result.
    pub async fn find(&self, target: PublicKey) -> Vec<Id> {
        let self_key = self.transport.local_id().public_key;

        let mut state = LookupState {
            visited: HashSet::new(),
            queues: vec![VecDeque::new(); self.parallel_lookups],
        };
        state.visited.insert(self_key);
        state.visited.insert(target);

        // Seed the streams round-robin from the closest known peers. The
        // visited set already holds the local key and the target, so a table
        // that happens to record either one never queues it.
        let mut seeded = 0;
        for id in self.table.peers() {
            if state.visited.insert(id.public_key) {
                state.queues[seeded % self.parallel_lookups].push_back(id);
                seeded += 1;
            }
        }

        let run = Arc::new(LookupRun {
            transport: Arc::clone(&self.transport),
            target,
            requests_per_lookup: self.requests_per_lookup,
            request_timeout: self.request_timeout,
            state: Mutex::new(state),
        });

        // Confirmed responders flow through this channel while the streams
        // run. Each stream owns a sender clone; the receiver terminates once
        // the last clone is dropped, which cannot happen before the final
        // send completes.
        let (confirmed_tx, mut confirmed_rx) =
            mpsc::channel(self.max_results.clamp(1, BUCKET_SIZE * 8));

        let mut streams = JoinSet::new();
        for index in 0..self.parallel_lookups {
            streams.spawn(run_stream(Arc::clone(&run), index, confirmed_tx.clone()));
        }
        drop(confirmed_tx);

        let mut closest = Vec::new();
        while let Some(id) = confirmed_rx.recv().await {
            closest.push(id);
        }
        while streams.join_next().await.is_some() {}

        sort_by_distance(&target, &mut closest);
        closest.truncate(self.max_results);

        debug!(
            target = %hex::encode(&target.as_bytes()[..8]),
            found = closest.len(),
            "iterative lookup completed"
        );

        closest
    }
}

struct LookupState {
    visited: HashSet<PublicKey>,
    queues: Vec<VecDeque<Id>>,
}

struct LookupRun<N> {
    transport: Arc<N>,
    target: PublicKey,
    requests_per_lookup: usize,
    request_timeout: Duration,
    state: Mutex<LookupState>,
}

/// Drain one stream's queue, keeping at most `requests_per_lookup` requests
/// in flight, until the queue is empty and every request has settled.
async fn run_stream<N: OverlayRpc>(
    run: Arc<LookupRun<N>>,
    index: usize,
    confirmed: mpsc::Sender<Id>,
) {
    let mut inflight = JoinSet::new();

    loop {
        // Admit work up to the in-flight cap. The pop happens under the same
        // lock as candidate merging, so a queue length observed here cannot
        // go stale between check and dequeue.
        while inflight.len() < run.requests_per_lookup {
            let next = run.state.lock().unwrap().queues[index].pop_front();
            let Some(id) = next else { break };

            inflight.spawn(request_peer(Arc::clone(&run), id, confirmed.clone()));
        }

        let Some(settled) = inflight.join_next().await else {
            // Queue empty and nothing pending: the stream is exhausted.
            break;
        };
        let candidates = settled.unwrap_or_default();

        let mut state = run.state.lock().unwrap();
        for id in candidates {
            if state.visited.insert(id.public_key) {
                state.queues[index].push_back(id);
            }
        }
    }
}

/// Query one peer for the peers closest to itself. Confirms the peer on a
/// well-formed reply and returns the candidates it offered; any failure
/// yields no candidates.
async fn request_peer<N: OverlayRpc>(
    run: Arc<LookupRun<N>>,
    id: Id,
    confirmed: mpsc::Sender<Id>,
) -> Vec<Id> {
    let request = FindNodeRequest {
        target: id.public_key,
    };

    let response = match timeout(
        run.request_timeout,
        run.transport.request_message(id.address(), Box::new(request)),
    )
    .await
    {
        Ok(Ok(response)) => response,
        Ok(Err(err)) => {
            debug!(
                peer = %hex::encode(&id.public_key.as_bytes()[..8]),
                addr = id.address(),
                %err,
                "find node request failed"
            );
            return Vec::new();
        }
        Err(_) => {
            debug!(
                peer = %hex::encode(&id.public_key.as_bytes()[..8]),
                addr = id.address(),
                "find node request timed out"
            );
            return Vec::new();
        }
    };

    let Some(reply) = response.downcast_ref::<FindNodeResponse>() else {
        return Vec::new();
    };

    // The peer answered coherently, so report it as live. The channel stays
    // open for at least as long as this task runs.
    let _ = confirmed.send(id).await;

    reply.results.clone()
}
