//! Seam between the runtime and whatever carries frames to peer runtimes.
//!
//! The runtime only ever hands a framed envelope to a [`PeerTransport`];
//! connection management belongs to the implementation. Two are provided:
//! [`ChannelTransport`] connects runtimes hosted in the same process over
//! flume channels, [`NullTransport`] serves single-runtime deployments.

use bytes::Bytes;
use flume::{Receiver, Sender, TrySendError};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use weave_api::{PeerHeader, RuntimeId};

use crate::error::TransportError;

/// Hands framed envelopes to peer runtimes.
pub trait PeerTransport: Send + Sync {
    /// Queues one frame for `runtime`. Must not block; a frame that cannot be
    /// queued is reported and dropped by the caller.
    fn send_to_peer(&self, runtime: RuntimeId, header: PeerHeader, frame: Bytes) -> Result<(), TransportError>;
}

/// A frame as it arrives from a peer.
#[derive(Debug, Clone)]
pub struct PeerFrame {
    pub from: RuntimeId,
    pub header: PeerHeader,
    pub frame: Bytes,
}

/// Bounded channel carrying frames into one runtime.
pub fn peer_channel(capacity: usize) -> (Sender<PeerFrame>, Receiver<PeerFrame>) {
    flume::bounded(capacity)
}

/// In-process transport: one channel per peer runtime.
pub struct ChannelTransport {
    local: RuntimeId,
    peers: RwLock<HashMap<RuntimeId, Sender<PeerFrame>>>,
}

impl ChannelTransport {
    /// A transport sending on behalf of runtime `local`.
    pub fn new(local: RuntimeId) -> Self {
        Self {
            local,
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Registers the inbound channel of `runtime`, replacing any previous one.
    pub fn add_peer(&self, runtime: RuntimeId, sender: Sender<PeerFrame>) {
        self.peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(runtime, sender);
    }

    pub fn remove_peer(&self, runtime: RuntimeId) -> bool {
        self.peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&runtime)
            .is_some()
    }

    pub fn has_peer(&self, runtime: RuntimeId) -> bool {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&runtime)
    }
}

impl PeerTransport for ChannelTransport {
    fn send_to_peer(&self, runtime: RuntimeId, header: PeerHeader, frame: Bytes) -> Result<(), TransportError> {
        let peers = self.peers.read().unwrap_or_else(PoisonError::into_inner);
        let sender = peers.get(&runtime).ok_or(TransportError::NoPeer(runtime))?;
        let frame = PeerFrame {
            from: self.local,
            header,
            frame,
        };
        sender.try_send(frame).map_err(|err| match err {
            TrySendError::Full(_) => TransportError::Backpressure(runtime),
            TrySendError::Disconnected(_) => TransportError::Disconnected(runtime),
        })
    }
}

impl std::fmt::Debug for ChannelTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let peers = self.peers.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<_> = peers.keys().copied().collect();
        ids.sort();
        f.debug_struct("ChannelTransport")
            .field("local", &self.local)
            .field("peers", &ids)
            .finish()
    }
}

/// Transport of a runtime without peers. Every hand-off fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

impl PeerTransport for NullTransport {
    fn send_to_peer(&self, runtime: RuntimeId, _header: PeerHeader, _frame: Bytes) -> Result<(), TransportError> {
        Err(TransportError::NoPeer(runtime))
    }
}
