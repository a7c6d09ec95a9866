//! Keypairs, peer identities, and the XOR distance metric.
//!
//! A peer is identified by an [`Id`]: its Ed25519 [`PublicKey`] plus the
//! public host and port it is reachable at. The byte representation of an
//! `Id` is fixed-size and deterministic, which keeps the overlay's wire
//! messages trivially framable:
//!
//! ```text
//! [ public key : 32 bytes ][ host : 16 bytes, IPv6 form ][ port : u16 big-endian ]
//! ```
//!
//! Closeness between peers is the XOR of their public keys, compared
//! lexicographically from the most significant byte. [`prefix_len`] of that
//! distance is what buckets the routing table.

use std::fmt;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::codec::WireError;

/// Number of bytes in a public key.
pub const SIZE_PUBLIC_KEY: usize = 32;

/// An Ed25519 public key identifying a peer on the overlay.
///
/// The all-zero key is reserved as "absent" and is never recorded by the
/// routing table.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicKey([u8; SIZE_PUBLIC_KEY]);

impl PublicKey {
    /// The distinguished zero key.
    pub const ZERO: PublicKey = PublicKey([0u8; SIZE_PUBLIC_KEY]);

    #[inline]
    pub fn from_bytes(bytes: [u8; SIZE_PUBLIC_KEY]) -> Self {
        Self(bytes)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; SIZE_PUBLIC_KEY] {
        &self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Bitwise XOR of two keys. The basis of overlay closeness.
    #[inline]
    pub fn xor_distance(&self, other: &PublicKey) -> [u8; SIZE_PUBLIC_KEY] {
        let mut out = [0u8; SIZE_PUBLIC_KEY];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        out
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; SIZE_PUBLIC_KEY] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(arr))
    }

    /// Verify an Ed25519 signature made by the holder of this key.
    ///
    /// Returns false when the key bytes are not a valid curve point.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        match VerifyingKey::from_bytes(&self.0) {
            Ok(key) => key.verify(message, signature).is_ok(),
            Err(_) => false,
        }
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; SIZE_PUBLIC_KEY]> for PublicKey {
    fn from(bytes: [u8; SIZE_PUBLIC_KEY]) -> Self {
        Self(bytes)
    }
}

impl From<PublicKey> for [u8; SIZE_PUBLIC_KEY] {
    fn from(key: PublicKey) -> Self {
        key.0
    }
}

impl AsRef<[u8]> for PublicKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

// Keys render as lowercase hex in JSON, not as byte arrays.
impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        PublicKey::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// An Ed25519 keypair. The public half doubles as the peer's overlay identity.
#[derive(Clone)]
pub struct Keypair {
    signing: SigningKey,
}

impl Keypair {
    /// Generate a fresh keypair from the operating system's entropy source.
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Rebuild a keypair from its stored secret bytes. The same secret
    /// always yields the same public key.
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(bytes),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing.verifying_key().to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing.sign(message)
    }

    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        self.signing.verify(message, signature).is_ok()
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Collapse IPv4-mapped IPv6 addresses down to plain IPv4.
///
/// Hosts carrying the same numeric address must render the same `host:port`
/// text regardless of which notation a peer handed us.
pub fn normalize_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}

/// A peer ID: public key plus the public network address of its bearer.
///
/// Immutable after construction. The `host:port` text is computed once from
/// the normalized host so equality and logging never re-derive it.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Id {
    pub public_key: PublicKey,
    #[serde(skip)]
    host: IpAddr,
    #[serde(skip)]
    port: u16,
    address: String,
}

impl Id {
    /// Byte size of the wire representation.
    pub const WIRE_SIZE: usize = SIZE_PUBLIC_KEY + 16 + 2;

    pub fn new(public_key: PublicKey, host: IpAddr, port: u16) -> Self {
        let host = normalize_ip(host);
        let address = SocketAddr::new(host, port).to_string();
        Self {
            public_key,
            host,
            port,
            address,
        }
    }

    #[inline]
    pub fn host(&self) -> IpAddr {
        self.host
    }

    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The cached `host:port` text this peer is dialed at.
    #[inline]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Serialize into the fixed 50-byte wire layout.
    pub fn marshal(&self) -> Vec<u8> {
        let host = match self.host {
            IpAddr::V4(v4) => v4.to_ipv6_mapped(),
            IpAddr::V6(v6) => v6,
        };

        let mut buf = Vec::with_capacity(Self::WIRE_SIZE);
        buf.extend_from_slice(self.public_key.as_bytes());
        buf.extend_from_slice(&host.octets());
        buf.extend_from_slice(&self.port.to_be_bytes());
        buf
    }

    /// Deserialize from the wire layout, failing with
    /// [`WireError::UnexpectedEof`] when any of the three spans is short.
    pub fn unmarshal(buf: &[u8]) -> Result<Id, WireError> {
        let (key_bytes, rest) = split_span::<SIZE_PUBLIC_KEY>(buf)?;
        let (host_bytes, rest) = split_span::<16>(rest)?;
        let (port_bytes, _) = split_span::<2>(rest)?;

        let public_key = PublicKey::from_bytes(key_bytes);
        let host = IpAddr::V6(Ipv6Addr::from(host_bytes));
        let port = u16::from_be_bytes(port_bytes);

        Ok(Id::new(public_key, host, port))
    }
}

fn split_span<const N: usize>(buf: &[u8]) -> Result<([u8; N], &[u8]), WireError> {
    if buf.len() < N {
        return Err(WireError::UnexpectedEof);
    }
    let (span, rest) = buf.split_at(N);
    let mut out = [0u8; N];
    out.copy_from_slice(span);
    Ok((out, rest))
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Id")
            .field("public_key", &self.public_key)
            .field("address", &self.address)
            .finish()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        write!(f, "{json}")
    }
}

/// Compare two XOR distances, most significant byte first.
#[inline]
pub fn distance_cmp(a: &[u8; SIZE_PUBLIC_KEY], b: &[u8; SIZE_PUBLIC_KEY]) -> std::cmp::Ordering {
    a.cmp(b)
}

/// Count of leading zero bits in a distance.
pub fn prefix_len(distance: &[u8; SIZE_PUBLIC_KEY]) -> usize {
    for (i, byte) in distance.iter().enumerate() {
        if *byte != 0 {
            return i * 8 + byte.leading_zeros() as usize;
        }
    }
    SIZE_PUBLIC_KEY * 8
}

/// Sort IDs in place by ascending XOR distance to `target`.
pub fn sort_by_distance(target: &PublicKey, ids: &mut [Id]) {
    ids.sort_by(|a, b| {
        let da = a.public_key.xor_distance(target);
        let db = b.public_key.xor_distance(target);
        distance_cmp(&da, &db)
    });
}
