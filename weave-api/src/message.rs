//! # MSU Message
//!
//! The unit of data flowing between MSUs.
//!
//! A message is a [`MsgHeader`] plus an opaque payload. The header carries
//! everything the runtime needs to route the message without understanding
//! the payload: the routing key, the provenance chain used to send responses
//! back to the runtime a flow entered on, and the profiling flag.
//!
//! ## Ownership
//!
//! A message has exactly one owner at a time. Sending moves it into the
//! destination queue (or into the transport envelope); dropping it is the
//! release. No path in the runtime clones a message to deliver it twice.

use bytes::Bytes;
use std::fmt;

use crate::errors::ProvenanceError;
use crate::ids::{MsuId, MsuTypeId, RuntimeId};

/// Maximum number of hops recorded in a provenance chain.
pub const MAX_PROVENANCE_LEN: usize = 16;

/// Routing key of a message.
///
/// `flow` identifies the flow or session the message belongs to and is the
/// key used for per-flow state. `id` is the routing key consumed by the
/// key-based routing policy; it is `None` until a type assigns one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MsgKey {
    pub flow: u64,
    pub id: Option<u32>,
}

impl MsgKey {
    pub fn new(flow: u64) -> Self {
        Self { flow, id: None }
    }

    pub fn with_id(flow: u64, id: u32) -> Self {
        Self { flow, id: Some(id) }
    }
}

/// One step a message has taken: the MSU that sent it and where it ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hop {
    pub runtime: RuntimeId,
    pub msu: MsuId,
    pub type_id: MsuTypeId,
}

/// Bounded, ordered record of the hops a message has traveled.
///
/// The first hop is the origin: the runtime on which the flow entered the
/// system. Responses use it to find their way back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Provenance {
    hops: Vec<Hop>,
}

impl Provenance {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a chain from decoded hops, rejecting chains longer than the maximum.
    pub fn from_hops(hops: Vec<Hop>) -> Result<Self, ProvenanceError> {
        if hops.len() > MAX_PROVENANCE_LEN {
            return Err(ProvenanceError::Full { max: MAX_PROVENANCE_LEN });
        }
        Ok(Self { hops })
    }

    /// Appends a hop. A full chain is an error; the chain is left unchanged.
    pub fn push(&mut self, hop: Hop) -> Result<(), ProvenanceError> {
        if self.hops.len() >= MAX_PROVENANCE_LEN {
            return Err(ProvenanceError::Full { max: MAX_PROVENANCE_LEN });
        }
        self.hops.push(hop);
        Ok(())
    }

    /// The hop at which the flow entered the system.
    pub fn origin(&self) -> Option<&Hop> {
        self.hops.first()
    }

    /// The most recent sender.
    pub fn last(&self) -> Option<&Hop> {
        self.hops.last()
    }

    /// Type of the MSU that most recently sent this message.
    pub fn sender_type(&self) -> Option<MsuTypeId> {
        self.last().map(|hop| hop.type_id)
    }

    pub fn hops(&self) -> &[Hop] {
        &self.hops
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.hops.len() >= MAX_PROVENANCE_LEN
    }
}

/// Destination-independent part of a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MsgHeader {
    pub key: MsgKey,
    pub provenance: Provenance,
    pub do_profile: bool,
}

impl MsgHeader {
    pub fn new(key: MsgKey) -> Self {
        Self {
            key,
            ..Default::default()
        }
    }
}

/// A message travelling between MSUs.
pub struct MsuMessage {
    pub header: MsgHeader,
    pub payload: Bytes,
}

impl MsuMessage {
    pub fn new(key: MsgKey, payload: impl Into<Bytes>) -> Self {
        Self {
            header: MsgHeader::new(key),
            payload: payload.into(),
        }
    }

    pub fn with_header(header: MsgHeader, payload: impl Into<Bytes>) -> Self {
        Self {
            header,
            payload: payload.into(),
        }
    }

    pub fn key(&self) -> &MsgKey {
        &self.header.key
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

impl fmt::Debug for MsuMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MsuMessage")
            .field("header", &self.header)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hop(n: u32) -> Hop {
        Hop {
            runtime: RuntimeId(n),
            msu: MsuId(n * 10),
            type_id: MsuTypeId(100 + n),
        }
    }

    #[test]
    fn test_origin_is_first_hop() {
        let mut chain = Provenance::new();
        chain.push(hop(1)).unwrap();
        chain.push(hop(2)).unwrap();

        assert_eq!(chain.origin().unwrap().runtime, RuntimeId(1));
        assert_eq!(chain.sender_type(), Some(MsuTypeId(102)));
    }

    #[test]
    fn test_push_on_full_chain_is_rejected() {
        let mut chain = Provenance::new();
        for n in 0..MAX_PROVENANCE_LEN as u32 {
            chain.push(hop(n)).unwrap();
        }
        assert!(chain.is_full());

        let err = chain.push(hop(99)).unwrap_err();
        assert_eq!(err, ProvenanceError::Full { max: MAX_PROVENANCE_LEN });
        assert_eq!(chain.len(), MAX_PROVENANCE_LEN);
        assert_eq!(chain.origin().unwrap().runtime, RuntimeId(0));
    }

    #[test]
    fn test_from_hops_rejects_oversized_chain() {
        let hops: Vec<Hop> = (0..=MAX_PROVENANCE_LEN as u32).map(hop).collect();
        assert!(Provenance::from_hops(hops).is_err());
    }

    #[test]
    fn test_message_debug_hides_payload() {
        let msg = MsuMessage::new(MsgKey::new(3), vec![1u8, 2, 3]);
        let rendered = format!("{:?}", msg);
        assert!(rendered.contains("payload_len: 3"));
    }
}
