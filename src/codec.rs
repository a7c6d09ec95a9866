//! # Typed Wire-Message Codec
//!
//! A process-wide registry that assigns a stable 16-bit op-code to every
//! message kind and provides symmetric encode/decode between in-memory
//! message values and framed bytes.
//!
//! ## Wire Format
//!
//! ```text
//! [ op-code : u16 big-endian ][ payload : variable ]
//! ```
//!
//! Length framing of the payload belongs to the transport underneath; the
//! codec only tags payloads with the registered op-code of their type.
//!
//! ## Registration
//!
//! Op-codes are handed out monotonically from 0 in registration order, so
//! peers that register the same message set in the same order interoperate.
//! Registering the same message type twice is a wiring bug and panics.
//! All registrations happen during startup; afterwards the registry is
//! read-only and `encode`/`decode` take shared access.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

/// A message kind that can travel over the overlay wire.
///
/// Implementors provide their byte representation; the decode direction is
/// supplied separately at registration time so the codec can route an
/// op-code back to the right constructor.
pub trait Message: Any + Send + Sync + fmt::Debug {
    /// Serialize this message into its payload bytes (op-code excluded).
    fn marshal(&self) -> Vec<u8>;
}

impl dyn Message {
    /// Borrow this message as a concrete type, if it is one.
    pub fn downcast_ref<M: Message>(&self) -> Option<&M> {
        (self as &dyn Any).downcast_ref::<M>()
    }

    /// True if this message is of concrete type `M`.
    pub fn is<M: Message>(&self) -> bool {
        (self as &dyn Any).is::<M>()
    }
}

/// Errors produced while translating between messages and wire bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    /// The input ended before a complete value could be read.
    UnexpectedEof,
    /// A decoded op-code has no registered decoder.
    OpcodeNotRegistered(u16),
    /// The concrete type of a message handed to `encode` was never registered.
    TypeNotRegistered,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::UnexpectedEof => write!(f, "unexpected end of input"),
            WireError::OpcodeNotRegistered(opcode) => {
                write!(f, "opcode {opcode} is not registered")
            }
            WireError::TypeNotRegistered => {
                write!(f, "opcode not registered for message type")
            }
        }
    }
}

impl std::error::Error for WireError {}

type Decoder = Box<dyn Fn(&[u8]) -> Result<Box<dyn Message>, WireError> + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_opcode: u16,
    opcodes: HashMap<TypeId, u16>,
    decoders: HashMap<u16, Decoder>,
}

/// Registry mapping message types to op-codes and op-codes to decoders.
///
/// Both directions are kept in lockstep under one shared/exclusive lock:
/// `register` takes exclusive access, `encode` and `decode` shared access.
#[derive(Default)]
pub struct Codec {
    inner: RwLock<Registry>,
}

impl Codec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register message type `M` with its decode function, returning the
    /// op-code assigned to it.
    ///
    /// # Panics
    ///
    /// Panics if `M` has already been registered. Registration happens in
    /// static wiring code, so a duplicate is a programmer error worth
    /// failing fast on.
    pub fn register<M, F>(&self, decoder: F) -> u16
    where
        M: Message,
        F: Fn(&[u8]) -> Result<M, WireError> + Send + Sync + 'static,
    {
        let mut registry = self.inner.write().unwrap();

        if let Some(opcode) = registry.opcodes.get(&TypeId::of::<M>()) {
            panic!(
                "message type {} is already registered under opcode {}",
                type_name::<M>(),
                opcode
            );
        }

        let opcode = registry.next_opcode;
        registry.opcodes.insert(TypeId::of::<M>(), opcode);
        registry.decoders.insert(
            opcode,
            Box::new(move |payload: &[u8]| {
                decoder(payload).map(|msg| Box::new(msg) as Box<dyn Message>)
            }),
        );
        registry.next_opcode += 1;

        opcode
    }

    /// Frame a message as `[op-code][payload]`.
    ///
    /// Fails with [`WireError::TypeNotRegistered`] if the concrete type of
    /// `message` was never registered.
    pub fn encode(&self, message: &dyn Message) -> Result<Vec<u8>, WireError> {
        let registry = self.inner.read().unwrap();

        let type_id = (message as &dyn Any).type_id();
        let opcode = *registry
            .opcodes
            .get(&type_id)
            .ok_or(WireError::TypeNotRegistered)?;

        let payload = message.marshal();
        let mut buf = Vec::with_capacity(2 + payload.len());
        buf.extend_from_slice(&opcode.to_be_bytes());
        buf.extend_from_slice(&payload);

        Ok(buf)
    }

    /// Decode a framed message, dispatching on its leading op-code.
    ///
    /// Decoder errors are propagated as-is. The decoder runs under shared
    /// access, so decoders must not call back into `register`.
    pub fn decode(&self, data: &[u8]) -> Result<Box<dyn Message>, WireError> {
        if data.len() < 2 {
            return Err(WireError::UnexpectedEof);
        }

        let opcode = u16::from_be_bytes([data[0], data[1]]);

        let registry = self.inner.read().unwrap();
        let decoder = registry
            .decoders
            .get(&opcode)
            .ok_or(WireError::OpcodeNotRegistered(opcode))?;

        decoder(&data[2..])
    }
}

impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.inner.read().unwrap();
        f.debug_struct("Codec")
            .field("registered", &registry.next_opcode)
            .finish()
    }
}
