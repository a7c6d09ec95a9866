//! Overlay wire messages.
//!
//! Every message kind exchanged between peers lives here, together with its
//! hand-framed payload layout and the [`register_all`] helper that wires the
//! full set onto a [`Codec`] in a stable order.
//!
//! | Message | Payload |
//! |---------|---------|
//! | [`FindNodeRequest`]  | `[ target : 32 bytes ]` |
//! | [`FindNodeResponse`] | `[ count : u8 ][ count * Id wire form ]` |
//! | [`Ping`] / [`Pong`]  | empty |

use crate::codec::{Codec, Message, WireError};
use crate::identity::{Id, PublicKey, SIZE_PUBLIC_KEY};
use crate::table::BUCKET_SIZE;

/// Ask a peer for the closest peers it knows to `target`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FindNodeRequest {
    pub target: PublicKey,
}

impl Message for FindNodeRequest {
    fn marshal(&self) -> Vec<u8> {
        self.target.as_bytes().to_vec()
    }
}

impl FindNodeRequest {
    pub fn unmarshal(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < SIZE_PUBLIC_KEY {
            return Err(WireError::UnexpectedEof);
        }

        let mut bytes = [0u8; SIZE_PUBLIC_KEY];
        bytes.copy_from_slice(&buf[..SIZE_PUBLIC_KEY]);

        Ok(Self {
            target: PublicKey::from_bytes(bytes),
        })
    }
}

/// Reply to [`FindNodeRequest`]: up to [`BUCKET_SIZE`] IDs sorted by the
/// responder's XOR distance to the requested target.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FindNodeResponse {
    pub results: Vec<Id>,
}

impl Message for FindNodeResponse {
    fn marshal(&self) -> Vec<u8> {
        debug_assert!(self.results.len() <= BUCKET_SIZE);

        let mut buf = Vec::with_capacity(1 + self.results.len() * Id::WIRE_SIZE);
        buf.push(self.results.len() as u8);
        for id in &self.results {
            buf.extend_from_slice(&id.marshal());
        }
        buf
    }
}

impl FindNodeResponse {
    pub fn unmarshal(buf: &[u8]) -> Result<Self, WireError> {
        let (&count, mut rest) = buf.split_first().ok_or(WireError::UnexpectedEof)?;

        let mut results = Vec::with_capacity(count as usize);
        for _ in 0..count {
            if rest.len() < Id::WIRE_SIZE {
                return Err(WireError::UnexpectedEof);
            }
            results.push(Id::unmarshal(&rest[..Id::WIRE_SIZE])?);
            rest = &rest[Id::WIRE_SIZE..];
        }

        Ok(Self { results })
    }
}

/// Liveness probe. Carries no payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Ping;

impl Message for Ping {
    fn marshal(&self) -> Vec<u8> {
        Vec::new()
    }
}

impl Ping {
    pub fn unmarshal(_buf: &[u8]) -> Result<Self, WireError> {
        Ok(Self)
    }
}

/// Reply to [`Ping`]. Carries no payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Pong;

impl Message for Pong {
    fn marshal(&self) -> Vec<u8> {
        Vec::new()
    }
}

impl Pong {
    pub fn unmarshal(_buf: &[u8]) -> Result<Self, WireError> {
        Ok(Self)
    }
}

/// Op-codes assigned to the overlay message set by [`register_all`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OverlayOpcodes {
    pub find_node_request: u16,
    pub find_node_response: u16,
    pub ping: u16,
    pub pong: u16,
}

/// Register every overlay message on `codec`, in a fixed order so that all
/// peers agree on op-codes.
pub fn register_all(codec: &Codec) -> OverlayOpcodes {
    OverlayOpcodes {
        find_node_request: codec.register(FindNodeRequest::unmarshal),
        find_node_response: codec.register(FindNodeResponse::unmarshal),
        ping: codec.register(Ping::unmarshal),
        pong: codec.register(Pong::unmarshal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn make_id(seed: u8) -> Id {
        let mut bytes = [0u8; 32];
        bytes[0] = seed;
        Id::new(
            PublicKey::from_bytes(bytes),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, seed)),
            9000 + seed as u16,
        )
    }

    #[test]
    fn find_node_request_roundtrip() {
        let request = FindNodeRequest {
            target: make_id(42).public_key,
        };

        let decoded = FindNodeRequest::unmarshal(&request.marshal()).unwrap();
        assert_eq!(decoded, request);

        assert_eq!(
            FindNodeRequest::unmarshal(&[0u8; SIZE_PUBLIC_KEY - 1]),
            Err(WireError::UnexpectedEof)
        );
    }

    #[test]
    fn find_node_response_roundtrip() {
        let response = FindNodeResponse {
            results: (1..=5).map(make_id).collect(),
        };

        let bytes = response.marshal();
        assert_eq!(bytes.len(), 1 + 5 * Id::WIRE_SIZE);
        assert_eq!(bytes[0], 5);

        let decoded = FindNodeResponse::unmarshal(&bytes).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn find_node_response_empty() {
        let decoded = FindNodeResponse::unmarshal(&FindNodeResponse::default().marshal()).unwrap();
        assert!(decoded.results.is_empty());
    }

    #[test]
    fn find_node_response_truncated_fails() {
        let response = FindNodeResponse {
            results: vec![make_id(1), make_id(2)],
        };
        let bytes = response.marshal();

        assert_eq!(
            FindNodeResponse::unmarshal(&[]),
            Err(WireError::UnexpectedEof)
        );
        assert_eq!(
            FindNodeResponse::unmarshal(&bytes[..bytes.len() - 1]),
            Err(WireError::UnexpectedEof)
        );

        // Count byte promises more IDs than the payload carries.
        let mut short = bytes.clone();
        short[0] = 3;
        assert_eq!(
            FindNodeResponse::unmarshal(&short),
            Err(WireError::UnexpectedEof)
        );
    }

    #[test]
    fn register_all_assigns_stable_opcodes() {
        let codec = Codec::new();
        let opcodes = register_all(&codec);

        assert_eq!(opcodes.find_node_request, 0);
        assert_eq!(opcodes.find_node_response, 1);
        assert_eq!(opcodes.ping, 2);
        assert_eq!(opcodes.pong, 3);

        let request = FindNodeRequest {
            target: make_id(9).public_key,
        };
        let decoded = codec.decode(&codec.encode(&request).unwrap()).unwrap();
        assert_eq!(decoded.downcast_ref::<FindNodeRequest>(), Some(&request));

        let pong = codec.decode(&codec.encode(&Pong).unwrap()).unwrap();
        assert!(pong.is::<Pong>());
    }
}
