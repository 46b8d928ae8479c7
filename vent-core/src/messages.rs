//! Message envelope: a 1-byte type code followed by the serialized payload.
//! Type codes are resolved through a [`Registry`] built once at startup.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use log::debug;

use crate::error::{ConstructionError, DataError, ProtocolError};
use crate::sansio::{EventQueue, Filter};

pub const HEADER_SIZE: usize = 1;

/// A typed value that can travel inside a message envelope.
pub trait Payload: Clone + fmt::Debug {
    /// Fieldless tag naming the payload's schema.
    type Kind: Copy + Ord + fmt::Debug;

    fn kind(&self) -> Self::Kind;

    fn kind_name(kind: Self::Kind) -> &'static str;

    fn to_bytes(&self) -> Result<Vec<u8>, DataError>;

    fn from_bytes(kind: Self::Kind, bytes: &[u8]) -> Result<Self, DataError>;
}

/// Bidirectional `code <-> kind` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registry<K> {
    by_code: BTreeMap<u8, K>,
    by_kind: BTreeMap<K, u8>,
}

impl<K: Copy + Ord + fmt::Debug> Registry<K> {
    pub fn new(entries: impl IntoIterator<Item = (u8, K)>) -> Result<Self, ConstructionError> {
        let mut registry = Self {
            by_code: BTreeMap::new(),
            by_kind: BTreeMap::new(),
        };
        registry.insert_all(entries)?;
        Ok(registry)
    }

    /// Build from a built-in table whose entries are known to be distinct.
    pub(crate) fn from_table(table: &[(u8, K)]) -> Self {
        let mut registry = Self {
            by_code: BTreeMap::new(),
            by_kind: BTreeMap::new(),
        };
        registry.extend_table(table);
        registry
    }

    pub(crate) fn extend_table(&mut self, table: &[(u8, K)]) {
        for &(code, kind) in table {
            self.by_code.insert(code, kind);
            self.by_kind.insert(kind, code);
        }
    }

    /// A superset of `self` with `entries` added.
    pub fn extended(
        &self,
        entries: impl IntoIterator<Item = (u8, K)>,
    ) -> Result<Self, ConstructionError> {
        let mut registry = self.clone();
        registry.insert_all(entries)?;
        Ok(registry)
    }

    fn insert_all(
        &mut self,
        entries: impl IntoIterator<Item = (u8, K)>,
    ) -> Result<(), ConstructionError> {
        for (code, kind) in entries {
            if self.by_code.contains_key(&code) {
                return Err(ConstructionError::DuplicateCode(code));
            }
            if self.by_kind.contains_key(&kind) {
                return Err(ConstructionError::DuplicateKind(format!("{kind:?}")));
            }
            self.by_code.insert(code, kind);
            self.by_kind.insert(kind, code);
        }
        Ok(())
    }

    pub fn kind(&self, code: u8) -> Option<K> {
        self.by_code.get(&code).copied()
    }

    pub fn code(&self, kind: K) -> Option<u8> {
        self.by_kind.get(&kind).copied()
    }

    pub fn contains(&self, kind: K) -> bool {
        self.by_kind.contains_key(&kind)
    }

    /// Registered kinds in code order.
    pub fn kinds(&self) -> impl Iterator<Item = K> + '_ {
        self.by_code.values().copied()
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }
}

/// A type code plus its decoded payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Message<P> {
    pub type_code: u8,
    pub payload: P,
}

impl<P: Payload> Message<P> {
    /// Parse a message body, resolving its type code through `registry`.
    pub fn parse(buffer: &[u8], registry: &Registry<P::Kind>) -> Result<Self, DataError> {
        let (&type_code, body) = buffer.split_first().ok_or(DataError::MessageHeader)?;
        let kind = registry
            .kind(type_code)
            .ok_or(DataError::UnknownTypeCode(type_code))?;
        Ok(Self {
            type_code,
            payload: P::from_bytes(kind, body)?,
        })
    }

    /// Wrap `payload`, looking up its type code in `registry`.
    pub fn from_payload(payload: P, registry: &Registry<P::Kind>) -> Result<Self, DataError> {
        let kind = payload.kind();
        let type_code = registry
            .code(kind)
            .ok_or_else(|| DataError::UnregisteredType(P::kind_name(kind).to_string()))?;
        Ok(Self { type_code, payload })
    }

    /// Refresh `type_code` from the payload's runtime kind.
    pub fn update_from_payload(&mut self, registry: &Registry<P::Kind>) -> Result<(), DataError> {
        let kind = self.payload.kind();
        self.type_code = registry
            .code(kind)
            .ok_or_else(|| DataError::UnregisteredType(P::kind_name(kind).to_string()))?;
        Ok(())
    }

    /// `type_code | serialized payload`.
    pub fn body(&self) -> Result<Vec<u8>, DataError> {
        let payload = self.payload.to_bytes()?;
        let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
        out.push(self.type_code);
        out.extend_from_slice(&payload);
        Ok(out)
    }
}

/// Turns message bodies into typed payloads.
#[derive(Debug, Clone)]
pub struct MessageReceiver<P: Payload> {
    registry: Arc<Registry<P::Kind>>,
    buffer: EventQueue<Vec<u8>>,
}

impl<P: Payload> MessageReceiver<P> {
    pub fn new(registry: Arc<Registry<P::Kind>>) -> Self {
        Self {
            registry,
            buffer: EventQueue::new(),
        }
    }
}

impl<P: Payload> Filter for MessageReceiver<P> {
    type Input = Vec<u8>;
    type Output = P;

    fn input(&mut self, event: Option<Vec<u8>>) -> Result<(), ProtocolError> {
        self.buffer.input(event)
    }

    fn output(&mut self) -> Result<Option<P>, ProtocolError> {
        let Some(body) = self.buffer.pop() else {
            return Ok(None);
        };
        let message = Message::parse(&body, &self.registry)?;
        debug!("MessageReceiver: {message:?}");
        Ok(Some(message.payload))
    }
}

/// Turns typed payloads into message bodies.
#[derive(Debug, Clone)]
pub struct MessageSender<P: Payload> {
    registry: Arc<Registry<P::Kind>>,
    buffer: EventQueue<P>,
}

impl<P: Payload> MessageSender<P> {
    pub fn new(registry: Arc<Registry<P::Kind>>) -> Self {
        Self {
            registry,
            buffer: EventQueue::new(),
        }
    }
}

impl<P: Payload> Filter for MessageSender<P> {
    type Input = P;
    type Output = Vec<u8>;

    fn input(&mut self, event: Option<P>) -> Result<(), ProtocolError> {
        self.buffer.input(event)
    }

    fn output(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        let Some(payload) = self.buffer.pop() else {
            return Ok(None);
        };
        let message = Message::from_payload(payload, &self.registry)?;
        debug!("MessageSender: {message:?}");
        Ok(Some(message.body()?))
    }
}
