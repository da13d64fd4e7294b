use std::any::Any;
use std::sync::Arc;

use weave_api::{MsuId, MsuMessage, MsuTypeId, RuntimeId};

use super::{KeyedState, MsuType};
use crate::dispatch::{self, Delivery};
use crate::error::DispatchError;
use crate::routing::RouteSet;
use crate::runtime::RuntimeShared;
use crate::stats::StatsEngine;

/// View of one instance, and of the runtime hosting it, handed to the
/// capabilities that run on the instance's behalf.
pub struct MsuContext<'a> {
    shared: &'a RuntimeShared,
    msu_id: MsuId,
    msu_type: &'a Arc<dyn MsuType>,
    routes: &'a mut RouteSet,
    state: &'a mut KeyedState,
    msu_state: &'a mut Option<Box<dyn Any + Send>>,
}

impl<'a> MsuContext<'a> {
    pub(crate) fn new(
        shared: &'a RuntimeShared,
        msu_id: MsuId,
        msu_type: &'a Arc<dyn MsuType>,
        routes: &'a mut RouteSet,
        state: &'a mut KeyedState,
        msu_state: &'a mut Option<Box<dyn Any + Send>>,
    ) -> Self {
        Self {
            shared,
            msu_id,
            msu_type,
            routes,
            state,
            msu_state,
        }
    }

    pub fn msu_id(&self) -> MsuId {
        self.msu_id
    }

    pub fn type_id(&self) -> MsuTypeId {
        self.msu_type.id()
    }

    pub fn runtime_id(&self) -> RuntimeId {
        self.shared.runtime_id()
    }

    pub fn stats(&self) -> &StatsEngine {
        self.shared.stats()
    }

    pub fn routes(&self) -> &RouteSet {
        self.routes
    }

    pub fn routes_mut(&mut self) -> &mut RouteSet {
        self.routes
    }

    /// Per-flow state of the instance.
    pub fn state(&mut self) -> &mut KeyedState {
        self.state
    }

    /// Instance-wide state, if set and of type `T`.
    pub fn msu_state<T: Any + Send>(&self) -> Option<&T> {
        self.msu_state.as_ref()?.downcast_ref()
    }

    pub fn msu_state_mut<T: Any + Send>(&mut self) -> Option<&mut T> {
        self.msu_state.as_mut()?.downcast_mut()
    }

    /// Replaces the instance-wide state.
    pub fn set_msu_state<T: Any + Send>(&mut self, value: T) {
        *self.msu_state = Some(Box::new(value));
    }

    /// Removes the instance-wide state if it is a `T`.
    pub fn take_msu_state<T: Any + Send>(&mut self) -> Option<T> {
        if !self.msu_state.as_ref()?.is::<T>() {
            return None;
        }
        let boxed = self.msu_state.take()?;
        boxed.downcast().ok().map(|value| *value)
    }

    /// Routes `msg` to an instance of `type_id` from inside a capability,
    /// exactly as if `receive` had returned [`Next::Route`](super::Next::Route).
    /// The message is consumed whatever the outcome.
    pub fn call_type(&mut self, type_id: MsuTypeId, msg: MsuMessage) -> Result<Delivery, DispatchError> {
        dispatch::forward(self.shared, self.msu_id, self.msu_type, self.routes, type_id, msg)
    }
}

impl std::fmt::Debug for MsuContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MsuContext")
            .field("msu_id", &self.msu_id)
            .field("type_id", &self.type_id())
            .field("routes", &self.routes.endpoint_count())
            .field("keyed_state", &self.state.len())
            .finish()
    }
}
