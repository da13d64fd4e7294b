//! # Routing Table
//!
//! Each instance keeps a [`RouteSet`]: for every destination type it knows,
//! an ordered [`Route`] of concrete [`Endpoint`]s. The table is mutated only
//! by the instance's own control commands and read by its own dispatches, on
//! the same worker thread, so it needs no lock.
//!
//! ## Key ranges
//! Every endpoint of a route carries the exclusive upper bound of the routing
//! keys it serves. Endpoints are kept sorted by that bound; the key-based
//! policy maps a key into `[0, max bound)` and picks the first endpoint whose
//! bound exceeds it.

pub mod strategies;

use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;

use weave_api::{MsuId, MsuMessage, MsuTypeId, RuntimeId};

use crate::error::RouteError;
use crate::queue::QueueHandle;

/// Where an endpoint lives.
#[derive(Clone)]
pub enum EndpointKind {
    /// On this runtime; messages are enqueued directly.
    Local(QueueHandle<MsuMessage>),
    /// On a peer runtime; messages go through the transport.
    Remote,
}

impl fmt::Debug for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointKind::Local(queue) => write!(f, "Local(len={})", queue.len()),
            EndpointKind::Remote => f.write_str("Remote"),
        }
    }
}

/// A concrete destination instance.
#[derive(Clone, Debug)]
pub struct Endpoint {
    pub msu: MsuId,
    pub runtime: RuntimeId,
    pub address: Ipv4Addr,
    pub kind: EndpointKind,
}

impl Endpoint {
    pub fn local(msu: MsuId, runtime: RuntimeId, address: Ipv4Addr, queue: QueueHandle<MsuMessage>) -> Self {
        Self {
            msu,
            runtime,
            address,
            kind: EndpointKind::Local(queue),
        }
    }

    /// A remote endpoint must be reachable, so its address must be specified.
    pub fn remote(msu: MsuId, runtime: RuntimeId, address: Ipv4Addr) -> Result<Self, RouteError> {
        if address.is_unspecified() {
            return Err(RouteError::MalformedEndpoint(format!(
                "remote endpoint {} on {} has no address",
                msu, runtime
            )));
        }
        Ok(Self {
            msu,
            runtime,
            address,
            kind: EndpointKind::Remote,
        })
    }

    pub fn is_local(&self) -> bool {
        matches!(self.kind, EndpointKind::Local(_))
    }

    /// Current depth of the destination queue, for local endpoints.
    pub fn queue_len(&self) -> Option<usize> {
        match &self.kind {
            EndpointKind::Local(queue) => Some(queue.len()),
            EndpointKind::Remote => None,
        }
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        let same_kind = match (&self.kind, &other.kind) {
            (EndpointKind::Local(a), EndpointKind::Local(b)) => a.same_queue(b),
            (EndpointKind::Remote, EndpointKind::Remote) => true,
            _ => false,
        };
        same_kind && self.msu == other.msu && self.runtime == other.runtime && self.address == other.address
    }
}

#[derive(Clone, Debug, PartialEq)]
struct RouteEntry {
    endpoint: Endpoint,
    key_bound: u32,
}

/// The endpoints of one destination type, with the round-robin cursor.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Route {
    entries: Vec<RouteEntry>,
    last_chosen: Option<usize>,
}

impl Route {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Endpoints in table order.
    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> + '_ {
        self.entries.iter().map(|entry| &entry.endpoint)
    }

    pub fn get(&self, index: usize) -> Option<&Endpoint> {
        self.entries.get(index).map(|entry| &entry.endpoint)
    }

    pub fn find(&self, msu: MsuId) -> Option<&Endpoint> {
        self.endpoints().find(|endpoint| endpoint.msu == msu)
    }

    pub fn key_bound(&self, msu: MsuId) -> Option<u32> {
        self.entries
            .iter()
            .find(|entry| entry.endpoint.msu == msu)
            .map(|entry| entry.key_bound)
    }

    /// Largest key bound, the modulus of key-based routing.
    pub fn max_key_bound(&self) -> u32 {
        self.entries.last().map_or(0, |entry| entry.key_bound)
    }

    /// Endpoint serving `key`, after reducing it modulo the largest bound.
    pub fn endpoint_for_key(&self, key: u64) -> Option<&Endpoint> {
        let max = self.max_key_bound();
        if max == 0 {
            return None;
        }
        let key = (key % u64::from(max)) as u32;
        self.entries
            .iter()
            .find(|entry| key < entry.key_bound)
            .map(|entry| &entry.endpoint)
    }

    /// Index of the endpoint chosen by the previous round-robin pick.
    pub fn last_chosen(&self) -> Option<usize> {
        self.last_chosen
    }

    pub(crate) fn set_last_chosen(&mut self, index: usize) {
        self.last_chosen = Some(index);
    }

    fn insert(&mut self, endpoint: Endpoint, key_bound: Option<u32>) -> Result<(), RouteError> {
        let key_bound = match key_bound {
            Some(0) => {
                return Err(RouteError::MalformedEndpoint(format!(
                    "key bound of {} must be positive",
                    endpoint.msu
                )))
            }
            Some(bound) => bound,
            None => self.max_key_bound().checked_add(1).ok_or_else(|| {
                RouteError::MalformedEndpoint("key range exhausted".to_string())
            })?,
        };
        if self.entries.iter().any(|entry| entry.key_bound == key_bound) {
            return Err(RouteError::MalformedEndpoint(format!(
                "key bound {} is already taken",
                key_bound
            )));
        }
        let at = self.entries.partition_point(|entry| entry.key_bound < key_bound);
        self.entries.insert(at, RouteEntry { endpoint, key_bound });
        Ok(())
    }

    fn remove(&mut self, msu: MsuId) -> Option<Endpoint> {
        let at = self.entries.iter().position(|entry| entry.endpoint.msu == msu)?;
        Some(self.entries.remove(at).endpoint)
    }
}

/// Destination type → route, owned by one instance.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RouteSet {
    routes: HashMap<MsuTypeId, Route>,
}

impl RouteSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, type_id: MsuTypeId) -> Option<&Route> {
        self.routes.get(&type_id)
    }

    pub fn get_mut(&mut self, type_id: MsuTypeId) -> Option<&mut Route> {
        self.routes.get_mut(&type_id)
    }

    /// Destination types with at least one endpoint.
    pub fn type_ids(&self) -> impl Iterator<Item = MsuTypeId> + '_ {
        self.routes.keys().copied()
    }

    pub fn contains(&self, type_id: MsuTypeId, msu: MsuId) -> bool {
        self.get(type_id).map_or(false, |route| route.find(msu).is_some())
    }

    /// Total endpoints across all types.
    pub fn endpoint_count(&self) -> usize {
        self.routes.values().map(Route::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Adds `endpoint` under `type_id`. An instance appears at most once per type.
    pub fn add(&mut self, type_id: MsuTypeId, endpoint: Endpoint, key_bound: Option<u32>) -> Result<(), RouteError> {
        if self.contains(type_id, endpoint.msu) {
            return Err(RouteError::DuplicateEndpoint {
                type_id,
                msu: endpoint.msu,
            });
        }
        let mut route = self.routes.remove(&type_id).unwrap_or_default();
        let result = route.insert(endpoint, key_bound);
        if !route.is_empty() {
            self.routes.insert(type_id, route);
        }
        result
    }

    /// Removes the endpoint of `msu`. The type entry disappears with its last
    /// endpoint.
    pub fn remove(&mut self, type_id: MsuTypeId, msu: MsuId) -> Result<Endpoint, RouteError> {
        let route = self
            .routes
            .get_mut(&type_id)
            .ok_or(RouteError::NoSuchEndpoint { type_id, msu })?;
        let endpoint = route
            .remove(msu)
            .ok_or(RouteError::NoSuchEndpoint { type_id, msu })?;
        if route.is_empty() {
            self.routes.remove(&type_id);
        }
        Ok(endpoint)
    }

    /// Moves the key bound of an existing endpoint.
    pub fn modify(&mut self, type_id: MsuTypeId, msu: MsuId, key_bound: u32) -> Result<(), RouteError> {
        let route = self
            .routes
            .get_mut(&type_id)
            .ok_or(RouteError::NoSuchEndpoint { type_id, msu })?;
        let previous = route.key_bound(msu).ok_or(RouteError::NoSuchEndpoint { type_id, msu })?;
        let endpoint = route
            .remove(msu)
            .ok_or(RouteError::NoSuchEndpoint { type_id, msu })?;
        if let Err(err) = route.insert(endpoint.clone(), Some(key_bound)) {
            // Put it back where it was.
            route.insert(endpoint, Some(previous))?;
            return Err(err);
        }
        Ok(())
    }

    /// Drops every endpoint, returning how many there were.
    pub fn clear(&mut self) -> usize {
        let n = self.endpoint_count();
        self.routes.clear();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(msu: u32, runtime: u32, last_octet: u8) -> Endpoint {
        Endpoint::remote(MsuId(msu), RuntimeId(runtime), Ipv4Addr::new(10, 0, 0, last_octet)).unwrap()
    }

    #[test]
    fn test_remote_endpoint_needs_address() {
        let err = Endpoint::remote(MsuId(1), RuntimeId(2), Ipv4Addr::UNSPECIFIED).unwrap_err();
        assert!(matches!(err, RouteError::MalformedEndpoint(_)));
    }

    #[test]
    fn test_endpoints_sorted_by_key_bound() {
        let mut routes = RouteSet::new();
        let ty = MsuTypeId(5);
        routes.add(ty, remote(1, 2, 1), Some(30)).unwrap();
        routes.add(ty, remote(2, 2, 1), Some(10)).unwrap();
        routes.add(ty, remote(3, 2, 1), None).unwrap();

        let order: Vec<u32> = routes.get(ty).unwrap().endpoints().map(|e| e.msu.get()).collect();
        assert_eq!(order, vec![2, 1, 3]);
        assert_eq!(routes.get(ty).unwrap().max_key_bound(), 31);

        let route = routes.get(ty).unwrap();
        assert_eq!(route.endpoint_for_key(5).unwrap().msu, MsuId(2));
        assert_eq!(route.endpoint_for_key(10).unwrap().msu, MsuId(1));
        assert_eq!(route.endpoint_for_key(30).unwrap().msu, MsuId(3));
        assert_eq!(route.endpoint_for_key(31 + 5).unwrap().msu, MsuId(2));
    }

    #[test]
    fn test_duplicate_endpoint_rejected() {
        let mut routes = RouteSet::new();
        routes.add(MsuTypeId(1), remote(4, 2, 1), None).unwrap();
        let err = routes.add(MsuTypeId(1), remote(4, 2, 1), None).unwrap_err();
        assert_eq!(
            err,
            RouteError::DuplicateEndpoint {
                type_id: MsuTypeId(1),
                msu: MsuId(4)
            }
        );
        assert_eq!(routes.endpoint_count(), 1);
    }

    #[test]
    fn test_failed_first_add_leaves_no_type_entry() {
        let mut routes = RouteSet::new();
        assert!(routes.add(MsuTypeId(1), remote(4, 2, 1), Some(0)).is_err());
        assert!(routes.is_empty());
    }

    #[test]
    fn test_add_then_remove_restores_table() {
        let mut routes = RouteSet::new();
        routes.add(MsuTypeId(1), remote(4, 2, 1), None).unwrap();
        let before = routes.clone();

        routes.add(MsuTypeId(1), remote(5, 2, 1), None).unwrap();
        routes.add(MsuTypeId(2), remote(6, 3, 2), None).unwrap();
        routes.remove(MsuTypeId(2), MsuId(6)).unwrap();
        routes.remove(MsuTypeId(1), MsuId(5)).unwrap();

        assert_eq!(routes, before);
    }

    #[test]
    fn test_modify_moves_endpoint() {
        let mut routes = RouteSet::new();
        let ty = MsuTypeId(1);
        routes.add(ty, remote(1, 2, 1), Some(10)).unwrap();
        routes.add(ty, remote(2, 2, 1), Some(20)).unwrap();

        routes.modify(ty, MsuId(1), 30).unwrap();
        let order: Vec<u32> = routes.get(ty).unwrap().endpoints().map(|e| e.msu.get()).collect();
        assert_eq!(order, vec![2, 1]);

        // A taken bound is refused and the endpoint keeps its old one.
        assert!(routes.modify(ty, MsuId(1), 20).is_err());
        assert_eq!(routes.get(ty).unwrap().key_bound(MsuId(1)), Some(30));
    }
}
