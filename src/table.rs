//! XOR-metric routing table.
//!
//! The table keeps one bucket per bit position of the key space: bucket `i`
//! holds peers whose XOR distance to the local key has exactly `i` leading
//! zero bits. Bucket 0 covers the far half of the key space, bucket 255 the
//! peers closest to us (and the local ID itself).
//!
//! Buckets are newest-first: seeing a peer again moves it to the head, so
//! the tail is always the entry seen longest ago. A full bucket rejects new
//! entries with [`BucketFullError`]; whether to probe the tail and evict is
//! a policy decision left to the caller, the table stays consistent either
//! way.
//!
//! All operations go through one shared/exclusive lock. Reads take shared
//! access and return snapshots, so no caller ever holds the lock across a
//! network call.

use std::fmt;
use std::sync::RwLock;

use crate::identity::{prefix_len, sort_by_distance, Id, PublicKey, SIZE_PUBLIC_KEY};

/// Maximum number of entries per bucket. The `k` in k-buckets.
pub const BUCKET_SIZE: usize = 16;

/// One bucket per bit of the key space.
pub const NUM_BUCKETS: usize = SIZE_PUBLIC_KEY * 8;

/// Returned by [`Table::update`] when the target bucket is at capacity.
///
/// Advisory only: the table is left unchanged and remains consistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketFullError {
    pub public_key: PublicKey,
}

impl fmt::Display for BucketFullError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cannot insert id {} into routing table: bucket is full",
            self.public_key
        )
    }
}

impl std::error::Error for BucketFullError {}

struct Buckets {
    entries: Vec<Vec<Id>>,
    len: usize,
}

/// Routing table of known peers, bucketed by XOR distance to the local ID.
pub struct Table {
    self_id: Id,
    inner: RwLock<Buckets>,
}

impl Table {
    /// Create a table whose distance metric is defined with respect to
    /// `self_id`, and record `self_id` in its own bucket.
    pub fn new(self_id: Id) -> Self {
        let table = Self {
            self_id: self_id.clone(),
            inner: RwLock::new(Buckets {
                entries: vec![Vec::new(); NUM_BUCKETS],
                len: 0,
            }),
        };

        // A fresh bucket cannot be full.
        table
            .update(self_id)
            .expect("inserting self into an empty table");

        table
    }

    /// The ID this table's distance metric is defined against.
    pub fn self_id(&self) -> &Id {
        &self.self_id
    }

    /// Record a peer, or refresh it if already present.
    ///
    /// Returns `Ok(true)` when the peer was newly inserted at the head of
    /// its bucket, `Ok(false)` when it was already present (and has been
    /// moved back to the head) or carries the zero key, and
    /// [`BucketFullError`] when its bucket is at capacity.
    pub fn update(&self, id: Id) -> Result<bool, BucketFullError> {
        if id.public_key.is_zero() {
            return Ok(false);
        }

        let mut inner = self.inner.write().unwrap();
        let idx = self.bucket_index(&id.public_key);
        let bucket = &mut inner.entries[idx];

        if let Some(pos) = bucket.iter().position(|e| e.public_key == id.public_key) {
            bucket.remove(pos);
            bucket.insert(0, id);
            return Ok(false);
        }

        if bucket.len() < BUCKET_SIZE {
            bucket.insert(0, id);
            inner.len += 1;
            return Ok(true);
        }

        Err(BucketFullError {
            public_key: id.public_key,
        })
    }

    /// Remove the peer with the given key. Returns the removed ID if found.
    pub fn remove(&self, public_key: &PublicKey) -> Option<Id> {
        let mut inner = self.inner.write().unwrap();
        let idx = self.bucket_index(public_key);
        let bucket = &mut inner.entries[idx];

        let pos = bucket.iter().position(|e| e.public_key == *public_key)?;
        let removed = bucket.remove(pos);
        inner.len -= 1;

        Some(removed)
    }

    /// Remove the first peer whose cached `host:port` text equals `address`,
    /// scanning buckets in index order. Returns the removed ID if found.
    pub fn remove_by_address(&self, address: &str) -> Option<Id> {
        let mut guard = self.inner.write().unwrap();
        let inner = &mut *guard;

        for bucket in inner.entries.iter_mut() {
            if let Some(pos) = bucket.iter().position(|e| e.address() == address) {
                let removed = bucket.remove(pos);
                inner.len -= 1;
                return Some(removed);
            }
        }

        None
    }

    /// True if the key is recorded in its bucket.
    pub fn contains(&self, public_key: &PublicKey) -> bool {
        let inner = self.inner.read().unwrap();
        inner.entries[self.bucket_index(public_key)]
            .iter()
            .any(|e| e.public_key == *public_key)
    }

    /// Snapshot of the bucket the given key hashes into, newest first.
    pub fn bucket(&self, public_key: &PublicKey) -> Vec<Id> {
        let inner = self.inner.read().unwrap();
        inner.entries[self.bucket_index(public_key)].clone()
    }

    /// Up to `k` recorded peers nearest to `target`, sorted by ascending
    /// XOR distance. `target` itself is never included.
    ///
    /// Collection starts in the bucket `target` hashes into and expands
    /// outward one offset at a time until `k` candidates are gathered or
    /// the bucket range is exhausted, then sorts and truncates.
    pub fn find_closest(&self, target: &PublicKey, k: usize) -> Vec<Id> {
        let mut closest = Vec::new();

        {
            let inner = self.inner.read().unwrap();
            let idx = self.bucket_index(target);

            collect_excluding(&mut closest, &inner.entries[idx], target);

            let mut i = 1;
            while closest.len() < k && (i <= idx || idx + i < NUM_BUCKETS) {
                if i <= idx {
                    collect_excluding(&mut closest, &inner.entries[idx - i], target);
                }
                if idx + i < NUM_BUCKETS {
                    collect_excluding(&mut closest, &inner.entries[idx + i], target);
                }
                i += 1;
            }
        }

        sort_by_distance(target, &mut closest);
        closest.truncate(k);
        closest
    }

    /// The [`BUCKET_SIZE`] peers closest to the local ID.
    pub fn peers(&self) -> Vec<Id> {
        self.find_closest(&self.self_id.public_key, BUCKET_SIZE)
    }

    /// Snapshot of every recorded ID, in bucket-index order and
    /// newest-first within each bucket.
    pub fn entries(&self) -> Vec<Id> {
        let inner = self.inner.read().unwrap();
        let mut out = Vec::with_capacity(inner.len);
        for bucket in &inner.entries {
            out.extend(bucket.iter().cloned());
        }
        out
    }

    /// Total number of recorded IDs.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // The shared prefix length of target and self, clamped so that
    // target == self (a fully zero distance) maps to the last bucket.
    fn bucket_index(&self, target: &PublicKey) -> usize {
        let distance = self.self_id.public_key.xor_distance(target);
        prefix_len(&distance).min(NUM_BUCKETS - 1)
    }
}

fn collect_excluding(dst: &mut Vec<Id>, bucket: &[Id], target: &PublicKey) {
    for id in bucket {
        if id.public_key != *target {
            dst.push(id.clone());
        }
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("self_id", &self.self_id)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::distance_cmp;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;

    fn make_id(bytes: [u8; 32], port: u16) -> Id {
        Id::new(
            PublicKey::from_bytes(bytes),
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            port,
        )
    }

    fn seeded_id(seed: u32) -> Id {
        let mut bytes = [0u8; 32];
        bytes[..4].copy_from_slice(&seed.to_be_bytes());
        bytes[31] = 1;
        make_id(bytes, seed as u16)
    }

    fn zero_self_table() -> Table {
        Table::new(make_id([0u8; 32], 0))
    }

    #[test]
    fn new_table_records_self_in_last_bucket() {
        let self_id = seeded_id(42);
        let table = Table::new(self_id.clone());

        assert_eq!(table.self_id(), &self_id);
        assert_eq!(table.len(), 1);
        assert!(table.contains(&self_id.public_key));
        assert_eq!(table.bucket(&self_id.public_key), vec![self_id]);
    }

    #[test]
    fn zero_key_update_is_a_noop() {
        let table = zero_self_table();

        assert_eq!(table.update(make_id([0u8; 32], 7)), Ok(false));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn update_prepends_and_refresh_moves_to_head() {
        let table = zero_self_table();

        // Same leading bit, so all three land in bucket 0.
        let mut a = [0u8; 32];
        a[0] = 0x80;
        let mut b = [0u8; 32];
        b[0] = 0x81;
        let mut c = [0u8; 32];
        c[0] = 0x82;

        let (a, b, c) = (make_id(a, 1), make_id(b, 2), make_id(c, 3));

        assert_eq!(table.update(a.clone()), Ok(true));
        assert_eq!(table.update(b.clone()), Ok(true));
        assert_eq!(table.update(c.clone()), Ok(true));
        assert_eq!(
            table.bucket(&a.public_key),
            vec![c.clone(), b.clone(), a.clone()]
        );

        // Refreshing a moves it to the head and keeps relative order of the rest.
        assert_eq!(table.update(a.clone()), Ok(false));
        assert_eq!(table.bucket(&a.public_key), vec![a, c, b]);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn seventeenth_entry_overflows_the_bucket() {
        let table = zero_self_table();

        // All keys lead with bit 1 and therefore share bucket 0.
        let ids: Vec<Id> = (0..17)
            .map(|i| {
                let mut bytes = [0u8; 32];
                bytes[0] = 0x80;
                bytes[1] = i as u8;
                make_id(bytes, i)
            })
            .collect();

        for id in &ids[..16] {
            assert_eq!(table.update(id.clone()), Ok(true));
        }

        let err = table.update(ids[16].clone()).unwrap_err();
        assert_eq!(err.public_key, ids[16].public_key);

        assert_eq!(table.len(), 16);
        assert_eq!(table.bucket(&ids[0].public_key).len(), BUCKET_SIZE);
        assert!(!table.contains(&ids[16].public_key));
    }

    #[test]
    fn remove_by_key_and_address() {
        let table = zero_self_table();
        let a = seeded_id(1);
        let b = seeded_id(2);

        table.update(a.clone()).unwrap();
        table.update(b.clone()).unwrap();

        let removed = table.remove(&a.public_key).expect("a was recorded");
        assert_eq!(removed, a);
        assert!(!table.contains(&a.public_key));
        assert_eq!(table.len(), 1);

        assert!(table.remove(&a.public_key).is_none());

        let removed = table
            .remove_by_address(b.address())
            .expect("b was recorded");
        assert_eq!(removed, b);
        assert_eq!(table.len(), 0);
        assert!(table.remove_by_address("203.0.113.1:1").is_none());
    }

    #[test]
    fn find_closest_is_sorted_and_truncated() {
        let self_id = seeded_id(1000);
        let table = Table::new(self_id);

        let mut rng_state = 0x2545F4914F6CDD1Du64;
        let mut ids = Vec::new();
        for _ in 0..200 {
            let mut bytes = [0u8; 32];
            for chunk in bytes.chunks_mut(8) {
                // Cheap xorshift keeps the test deterministic.
                rng_state ^= rng_state << 13;
                rng_state ^= rng_state >> 7;
                rng_state ^= rng_state << 17;
                chunk.copy_from_slice(&rng_state.to_be_bytes());
            }
            let id = make_id(bytes, 1);
            if table.update(id.clone()) == Ok(true) {
                ids.push(id);
            }
        }

        let target = seeded_id(5000).public_key;
        let closest = table.find_closest(&target, 10);
        assert_eq!(closest.len(), 10);

        // Ascending distance.
        for pair in closest.windows(2) {
            let da = pair[0].public_key.xor_distance(&target);
            let db = pair[1].public_key.xor_distance(&target);
            assert_ne!(distance_cmp(&da, &db), std::cmp::Ordering::Greater);
        }

        // Nothing in the table is closer than the reported set.
        let worst = closest
            .last()
            .map(|id| id.public_key.xor_distance(&target))
            .unwrap();
        let in_set: Vec<PublicKey> = closest.iter().map(|id| id.public_key).collect();
        for entry in table.entries() {
            if in_set.contains(&entry.public_key) || entry.public_key == target {
                continue;
            }
            let d = entry.public_key.xor_distance(&target);
            assert_ne!(distance_cmp(&d, &worst), std::cmp::Ordering::Less);
        }
    }

    #[test]
    fn find_closest_with_sparse_table_returns_everything() {
        let table = zero_self_table();
        let a = seeded_id(1);
        let b = seeded_id(2);
        table.update(a).unwrap();
        table.update(b).unwrap();

        let target = seeded_id(9).public_key;
        let closest = table.find_closest(&target, BUCKET_SIZE);
        assert_eq!(closest.len(), 2);
    }

    #[test]
    fn find_closest_excludes_the_target_key() {
        let table = zero_self_table();
        let a = seeded_id(1);
        table.update(a.clone()).unwrap();
        table.update(seeded_id(2)).unwrap();

        let closest = table.find_closest(&a.public_key, BUCKET_SIZE);
        assert!(closest.iter().all(|id| id.public_key != a.public_key));
    }

    #[test]
    fn peers_excludes_self() {
        let self_id = seeded_id(77);
        let table = Table::new(self_id.clone());
        table.update(seeded_id(1)).unwrap();
        table.update(seeded_id(2)).unwrap();

        let peers = table.peers();
        assert_eq!(peers.len(), 2);
        assert!(peers.iter().all(|id| id.public_key != self_id.public_key));
    }

    #[test]
    fn len_matches_sum_of_buckets() {
        let table = Table::new(seeded_id(3));
        for i in 0..50 {
            let _ = table.update(seeded_id(i));
        }

        assert_eq!(table.entries().len(), table.len());
    }

    #[test]
    fn concurrent_updates_and_reads_stay_consistent() {
        let table = Arc::new(Table::new(seeded_id(123)));

        let writers: Vec<_> = (0..4)
            .map(|w| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let _ = table.update(seeded_id(w * 1000 + i));
                        let _ = table.peers();
                    }
                })
            })
            .collect();

        for writer in writers {
            writer.join().unwrap();
        }

        assert_eq!(table.entries().len(), table.len());
    }
}
