//! Endpoint selection policies.
//!
//! A type's `route` capability picks one of these, or composes its own from
//! the accessors on [`Route`]. All of them take the sender's route set and
//! the destination type, and never mutate anything but the round-robin
//! cursor.

use std::net::Ipv4Addr;

use weave_api::{MsuId, MsuMessage, MsuTypeId};

use super::{Endpoint, Route, RouteSet};
use crate::error::RouteError;

/// Routing key of a message: its id when one was assigned, its flow otherwise.
pub fn routing_key(msg: &MsuMessage) -> u64 {
    let key = msg.key();
    key.id.map_or(key.flow, u64::from)
}

fn route_of(routes: &RouteSet, type_id: MsuTypeId) -> Result<&Route, RouteError> {
    routes
        .get(type_id)
        .filter(|route| !route.is_empty())
        .ok_or(RouteError::NoRoute(type_id))
}

/// The policy used when a type does not provide its own.
pub fn default_route(routes: &mut RouteSet, type_id: MsuTypeId, msg: &MsuMessage) -> Result<Endpoint, RouteError> {
    key_based(routes, type_id, msg)
}

/// Maps the routing key onto the cumulative key ranges of the route. The same
/// key always reaches the same endpoint while the route is unchanged.
pub fn key_based(routes: &mut RouteSet, type_id: MsuTypeId, msg: &MsuMessage) -> Result<Endpoint, RouteError> {
    route_of(routes, type_id)?
        .endpoint_for_key(routing_key(msg))
        .cloned()
        .ok_or(RouteError::NoRoute(type_id))
}

/// The local endpoint with the fewest queued messages. Ties go to the
/// endpoint listed first.
pub fn shortest_queue(routes: &mut RouteSet, type_id: MsuTypeId) -> Result<Endpoint, RouteError> {
    let route = route_of(routes, type_id)?;
    let mut best: Option<(usize, &Endpoint)> = None;
    for endpoint in route.endpoints() {
        let Some(len) = endpoint.queue_len() else {
            continue;
        };
        match best {
            Some((best_len, _)) if best_len <= len => {}
            _ => best = Some((len, endpoint)),
        }
    }
    best.map(|(_, endpoint)| endpoint.clone())
        .ok_or(RouteError::AllRemote(type_id))
}

/// Cycles through the endpoints reachable at `target`, resuming after the
/// endpoint chosen last time. The unspecified address selects endpoints local
/// to this runtime.
pub fn round_robin_within_address(
    routes: &mut RouteSet,
    type_id: MsuTypeId,
    target: Ipv4Addr,
) -> Result<Endpoint, RouteError> {
    let route = routes
        .get_mut(type_id)
        .filter(|route| !route.is_empty())
        .ok_or(RouteError::NoRoute(type_id))?;

    let n = route.len();
    let start = route.last_chosen().map_or(0, |last| (last + 1) % n);
    for offset in 0..n {
        let index = (start + offset) % n;
        let Some(endpoint) = route.get(index) else {
            continue;
        };
        let matches = endpoint.address == target || (target.is_unspecified() && endpoint.is_local());
        if matches {
            let endpoint = endpoint.clone();
            route.set_last_chosen(index);
            return Ok(endpoint);
        }
    }
    Err(RouteError::NoMatchingAddress {
        type_id,
        address: target,
    })
}

/// The endpoint of one specific instance.
pub fn by_id(routes: &mut RouteSet, type_id: MsuTypeId, msu: MsuId) -> Result<Endpoint, RouteError> {
    route_of(routes, type_id)?
        .find(msu)
        .cloned()
        .ok_or(RouteError::NoSuchEndpoint { type_id, msu })
}

/// An endpoint on the runtime the message first entered the system through,
/// chosen among that runtime's endpoints by routing key.
pub fn origin_runtime(routes: &mut RouteSet, type_id: MsuTypeId, msg: &MsuMessage) -> Result<Endpoint, RouteError> {
    let origin = msg
        .header
        .provenance
        .origin()
        .ok_or(RouteError::NoProvenance(type_id))?
        .runtime;
    let candidates: Vec<&Endpoint> = route_of(routes, type_id)?
        .endpoints()
        .filter(|endpoint| endpoint.runtime == origin)
        .collect();
    if candidates.is_empty() {
        return Err(RouteError::NoOriginEndpoint {
            type_id,
            runtime: origin,
        });
    }
    let index = (routing_key(msg) % candidates.len() as u64) as usize;
    Ok(candidates[index].clone())
}
