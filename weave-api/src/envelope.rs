//! Inter-runtime wire format.
//!
//! A message leaving its runtime is serialized into a [`RemoteEnvelope`] and
//! framed by a [`PeerHeader`] that tells the receiving side what kind of
//! traffic follows and how many bytes belong to it. All integers are
//! big-endian.
//!
//! ```text
//! PeerHeader (12 bytes)
//!   kind: u32 | data_size: u64
//!
//! RemoteEnvelope
//!   dst: u32 | src: u32 | proto: u32
//!   flow: u64 | has_id: u8 | id: u32
//!   do_profile: u8 | hop_count: u16
//!   hop_count * (runtime: u32 | msu: u32 | type: u32)
//!   payload_len: u32 | payload
//! ```

use byteorder::{BigEndian, ReadBytesExt};
use bytes::{BufMut, Bytes, BytesMut};
use std::io::Cursor;

use crate::errors::EnvelopeError;
use crate::ids::{MsuId, MsuTypeId, RuntimeId};
use crate::message::{Hop, MsgHeader, MsgKey, MsuMessage, Provenance, MAX_PROVENANCE_LEN};

/// Discriminator of the traffic carried by a peer frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PeerMsgType {
    /// Keep-alive or padding; carries nothing for the runtime.
    Nil = 0,
    /// A serialized [`RemoteEnvelope`].
    MsuMsg = 1,
}

impl PeerMsgType {
    pub fn from_u32(value: u32) -> Result<Self, EnvelopeError> {
        match value {
            0 => Ok(PeerMsgType::Nil),
            1 => Ok(PeerMsgType::MsuMsg),
            other => Err(EnvelopeError::UnknownPeerType(other)),
        }
    }
}

/// Frame header preceding every unit of inter-runtime traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerHeader {
    pub kind: PeerMsgType,
    pub data_size: u64,
}

impl PeerHeader {
    pub const ENCODED_LEN: usize = 12;

    pub fn new(kind: PeerMsgType, data_size: usize) -> Self {
        Self {
            kind,
            data_size: data_size as u64,
        }
    }

    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[..4].copy_from_slice(&(self.kind as u32).to_be_bytes());
        out[4..].copy_from_slice(&self.data_size.to_be_bytes());
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, EnvelopeError> {
        let mut cursor = Cursor::new(data);
        let kind = read_u32(&mut cursor, "peer header kind")?;
        let data_size = cursor
            .read_u64::<BigEndian>()
            .map_err(|_| EnvelopeError::Truncated { field: "peer header size" })?;
        Ok(Self {
            kind: PeerMsgType::from_u32(kind)?,
            data_size,
        })
    }
}

/// Serialized form of an [`MsuMessage`] travelling to another runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEnvelope {
    pub dst: MsuId,
    pub src: MsuId,
    /// Protocol tag of the destination type.
    pub proto: u32,
    pub key: MsgKey,
    pub provenance: Provenance,
    pub do_profile: bool,
    pub payload: Bytes,
}

impl RemoteEnvelope {
    /// Moves `msg` into an envelope addressed to `dst`.
    pub fn from_message(dst: MsuId, src: MsuId, proto: u32, msg: MsuMessage) -> Self {
        let MsuMessage { header, payload } = msg;
        Self {
            dst,
            src,
            proto,
            key: header.key,
            provenance: header.provenance,
            do_profile: header.do_profile,
            payload,
        }
    }

    /// Rebuilds the local message, returning the destination instance with it.
    pub fn into_message(self) -> (MsuId, MsuMessage) {
        let header = MsgHeader {
            key: self.key,
            provenance: self.provenance,
            do_profile: self.do_profile,
        };
        (self.dst, MsuMessage::with_header(header, self.payload))
    }

    pub fn encoded_len(&self) -> usize {
        4 + 4 + 4 + 8 + 1 + 4 + 1 + 2 + self.provenance.len() * 12 + 4 + self.payload.len()
    }

    /// Fails with [`EnvelopeError::TooLarge`] when the provenance or the
    /// payload does not fit its length field.
    pub fn encode(&self) -> Result<Bytes, EnvelopeError> {
        let hop_count: u16 = length_field("hop count", self.provenance.len())?;
        let payload_len: u32 = length_field("payload length", self.payload.len())?;
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u32(self.dst.get());
        buf.put_u32(self.src.get());
        buf.put_u32(self.proto);
        buf.put_u64(self.key.flow);
        match self.key.id {
            Some(id) => {
                buf.put_u8(1);
                buf.put_u32(id);
            }
            None => {
                buf.put_u8(0);
                buf.put_u32(0);
            }
        }
        buf.put_u8(self.do_profile as u8);
        buf.put_u16(hop_count);
        for hop in self.provenance.hops() {
            buf.put_u32(hop.runtime.get());
            buf.put_u32(hop.msu.get());
            buf.put_u32(hop.type_id.get());
        }
        buf.put_u32(payload_len);
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Encodes the envelope and wraps it in a `MsuMsg` peer header.
    pub fn frame(&self) -> Result<(PeerHeader, Bytes), EnvelopeError> {
        let body = self.encode()?;
        Ok((PeerHeader::new(PeerMsgType::MsuMsg, body.len()), body))
    }

    /// Decodes an envelope. The payload shares the frame's buffer.
    pub fn decode(frame: &Bytes) -> Result<Self, EnvelopeError> {
        let mut cursor = Cursor::new(frame.as_ref());

        let dst = MsuId(read_u32(&mut cursor, "dst")?);
        let src = MsuId(read_u32(&mut cursor, "src")?);
        let proto = read_u32(&mut cursor, "proto")?;
        let flow = cursor
            .read_u64::<BigEndian>()
            .map_err(|_| EnvelopeError::Truncated { field: "flow" })?;
        let has_id = read_u8(&mut cursor, "key flag")?;
        let id = read_u32(&mut cursor, "key id")?;
        let do_profile = read_u8(&mut cursor, "profile flag")? != 0;

        let hop_count = cursor
            .read_u16::<BigEndian>()
            .map_err(|_| EnvelopeError::Truncated { field: "hop count" })? as usize;
        if hop_count > MAX_PROVENANCE_LEN {
            return Err(EnvelopeError::TooManyHops(hop_count));
        }
        let mut hops = Vec::with_capacity(hop_count);
        for _ in 0..hop_count {
            hops.push(Hop {
                runtime: RuntimeId(read_u32(&mut cursor, "hop runtime")?),
                msu: MsuId(read_u32(&mut cursor, "hop msu")?),
                type_id: MsuTypeId(read_u32(&mut cursor, "hop type")?),
            });
        }
        let provenance =
            Provenance::from_hops(hops).map_err(|_| EnvelopeError::TooManyHops(hop_count))?;

        let declared = read_u32(&mut cursor, "payload length")? as usize;
        let start = cursor.position() as usize;
        let actual = frame.len() - start;
        if declared != actual {
            return Err(EnvelopeError::LengthMismatch { declared, actual });
        }

        Ok(Self {
            dst,
            src,
            proto,
            key: MsgKey {
                flow,
                id: (has_id != 0).then_some(id),
            },
            provenance,
            do_profile,
            payload: frame.slice(start..),
        })
    }
}

/// Narrows `len` to the integer type of its wire field.
pub(crate) fn length_field<T: TryFrom<usize>>(field: &'static str, len: usize) -> Result<T, EnvelopeError> {
    T::try_from(len).map_err(|_| EnvelopeError::TooLarge { field, len })
}

fn read_u32(cursor: &mut Cursor<&[u8]>, field: &'static str) -> Result<u32, EnvelopeError> {
    cursor
        .read_u32::<BigEndian>()
        .map_err(|_| EnvelopeError::Truncated { field })
}

fn read_u8(cursor: &mut Cursor<&[u8]>, field: &'static str) -> Result<u8, EnvelopeError> {
    cursor.read_u8().map_err(|_| EnvelopeError::Truncated { field })
}
