//! # Dispatch Engine
//!
//! Runs one data message through an instance and carries the result to the
//! next hop.
//!
//! ## Flow
//! 1. The instance's type processes the message (`receive`).
//! 2. If it names a next type, the destination type assigns the routing key
//!    (`generate_id`), the sender is appended to the provenance chain, and the
//!    destination type's `route` policy picks an endpoint from the sender's
//!    route set.
//! 3. The endpoint's locality decides the send path: the sender type's
//!    `send_local` for an instance on this runtime, `send_remote` for one on
//!    a peer.
//!
//! A message is owned by exactly one party at every step. Whatever fails
//! drops it right there, so it is released exactly once on every path.

use std::sync::Arc;
use tracing::warn;
use weave_api::{Hop, MsuError, MsuId, MsuMessage, MsuTypeId, RemoteEnvelope, RuntimeId, StatKind};

use crate::error::{DispatchError, SendError};
use crate::msu::{catch_panic, LocalMsu, MsuType, Next};
use crate::queue::QueueHandle;
use crate::routing::{EndpointKind, RouteSet};
use crate::runtime::RuntimeShared;
use crate::transport::PeerTransport;
use crate::{log_dispatch, log_error, msu_span};

/// Number of payload bytes hashed by [`default_generate_id`].
pub const GENERATE_ID_PREFIX: usize = 96;

/// Addressing of a message leaving for a peer runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteTarget {
    pub runtime: RuntimeId,
    pub msu: MsuId,
    pub src: MsuId,
    /// Protocol tag of the destination type.
    pub proto: u32,
}

/// Where a message ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Enqueued on an instance of this runtime.
    Local { msu: MsuId },
    /// Handed to the transport for an instance on a peer.
    Remote { runtime: RuntimeId, msu: MsuId },
    /// Processing finished and the message was released.
    Completed,
    /// The type kept or forwarded the message itself.
    Consumed,
}

/// Processes `msg` on `msu` and forwards whatever comes out.
pub fn receive(shared: &RuntimeShared, msu: &mut LocalMsu, msg: MsuMessage) -> Result<Delivery, DispatchError> {
    let stats = shared.stats();
    let item = msu.id.get();
    let msu_type = msu.msu_type.clone();
    let _span = msu_span!(msu.id, msu_type.name()).entered();

    shared.profiler().record(stats, StatKind::ProfDequeue, &msg.header);
    stats.end_duration(StatKind::MsuInterimTime, item);
    stats.start_duration(StatKind::MsuFullTime, item);
    stats.start_duration(StatKind::MsuInternalTime, item);

    let received = catch_panic("receive", || msu_type.receive(&mut msu.context(shared), msg)).and_then(|r| r);
    stats.end_duration(StatKind::MsuInternalTime, item);

    let outcome = match received {
        Ok(Next::Route { type_id, msg }) => {
            // Covers the destination's generate_id and route and the sender's send path.
            catch_panic("forward", || msu.context(shared).call_type(type_id, msg))
                .unwrap_or_else(|err| Err(DispatchError::Type(err)))
        }
        Ok(Next::Done(msg)) => {
            shared.profiler().record(stats, StatKind::ProfExit, &msg.header);
            drop(msg);
            Ok(Delivery::Completed)
        }
        Ok(Next::Consumed) => Ok(Delivery::Consumed),
        Err(MsuError::MissingCapability("receive")) => Err(DispatchError::MissingCapability(msu_type.id())),
        Err(err) => Err(DispatchError::Type(err)),
    };

    stats.end_duration(StatKind::MsuFullTime, item);
    stats.start_duration(StatKind::MsuInterimTime, item);

    match &outcome {
        Ok(delivery) => {
            stats.increment(StatKind::ItemsProcessed, item, 1.0);
            log_dispatch!(msu.id, "delivered", delivery = ?delivery);
        }
        Err(err) => {
            stats.increment(StatKind::ErrorCount, item, 1.0);
            log_error!(err, msu.id, msu_type.name(), category = err.category().as_str());
        }
    }
    outcome
}

/// Routes `msg`, sent by instance `sender` of `sender_type`, to an instance
/// of `type_id` chosen from `routes`.
pub(crate) fn forward(
    shared: &RuntimeShared,
    sender: MsuId,
    sender_type: &Arc<dyn MsuType>,
    routes: &mut RouteSet,
    type_id: MsuTypeId,
    mut msg: MsuMessage,
) -> Result<Delivery, DispatchError> {
    let dst_type = shared
        .registry()
        .lookup(type_id)
        .ok_or(DispatchError::UnknownType(type_id))?;

    if let Some(id) = dst_type.generate_id(&msg) {
        if let Some(previous) = msg.header.key.id {
            warn!(
                msu_id = %sender,
                type_name = dst_type.name(),
                previous,
                id,
                "overwriting routing key"
            );
        }
        msg.header.key.id = Some(id);
    }

    msg.header.provenance.push(Hop {
        runtime: shared.runtime_id(),
        msu: sender,
        type_id: sender_type.id(),
    })?;

    let endpoint = dst_type.route(routes, &msg)?;
    match endpoint.kind {
        EndpointKind::Local(queue) => {
            shared.profiler().record(shared.stats(), StatKind::ProfEnqueue, &msg.header);
            sender_type.send_local(&queue, msg)?;
            Ok(Delivery::Local { msu: endpoint.msu })
        }
        EndpointKind::Remote => {
            shared.profiler().record(shared.stats(), StatKind::ProfRemoteSend, &msg.header);
            let target = RemoteTarget {
                runtime: endpoint.runtime,
                msu: endpoint.msu,
                src: sender,
                proto: dst_type.proto_number(),
            };
            let sent = sender_type.send_remote(shared.transport(), target, msg)?;
            shared.stats().increment(StatKind::BytesSent, sender.get(), sent as f64);
            Ok(Delivery::Remote {
                runtime: endpoint.runtime,
                msu: endpoint.msu,
            })
        }
    }
}

/// Non-blocking enqueue onto a local data queue. A full or closed queue
/// drops the message and reports why.
pub fn default_send_local(queue: &QueueHandle<MsuMessage>, msg: MsuMessage) -> Result<(), SendError> {
    queue.try_push(msg)?;
    Ok(())
}

/// Serializes `msg` into a [`RemoteEnvelope`] and hands the frame to the
/// transport. Returns the frame size.
pub fn default_send_remote(
    transport: &dyn PeerTransport,
    target: RemoteTarget,
    msg: MsuMessage,
) -> Result<usize, SendError> {
    let envelope = RemoteEnvelope::from_message(target.msu, target.src, target.proto, msg);
    let (header, frame) = envelope.frame()?;
    let size = frame.len();
    transport.send_to_peer(target.runtime, header, frame)?;
    Ok(size)
}

/// CRC-32 of the first [`GENERATE_ID_PREFIX`] bytes of the payload.
pub fn default_generate_id(msg: &MsuMessage) -> u32 {
    let end = msg.payload.len().min(GENERATE_ID_PREFIX);
    crc32fast::hash(&msg.payload[..end])
}
