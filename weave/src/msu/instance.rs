use std::any::Any;
use std::sync::Arc;

use tracing::warn;
use weave_api::{ControlMsg, InitData, MsuId, MsuMessage, MsuTypeId};

use super::{catch_panic, KeyedState, MsuContext, MsuType};
use crate::error::CreateError;
use crate::queue::{Doorbell, MsuQueue};
use crate::routing::RouteSet;
use crate::runtime::{RuntimeEvent, RuntimeShared};
use crate::directory::DirectoryEntry;
use crate::{log_error, log_lifecycle};

/// A live instance, owned by the worker that schedules it.
pub struct LocalMsu {
    pub(crate) id: MsuId,
    pub(crate) msu_type: Arc<dyn MsuType>,
    pub(crate) routes: RouteSet,
    pub(crate) data: MsuQueue<MsuMessage>,
    pub(crate) ctrl: MsuQueue<ControlMsg>,
    pub(crate) state: KeyedState,
    pub(crate) msu_state: Option<Box<dyn Any + Send>>,
    pub(crate) weight: u32,
}

impl LocalMsu {
    /// Builds an instance of `type_id`, registers it with the runtime and
    /// runs the type's `init`. Every failure is also published as a
    /// [`RuntimeEvent::CreationFailed`].
    pub(crate) fn create(
        shared: &RuntimeShared,
        worker: usize,
        type_id: MsuTypeId,
        msu_id: MsuId,
        init_data: &InitData,
        doorbell: &Doorbell,
    ) -> Result<LocalMsu, CreateError> {
        match Self::build(shared, worker, type_id, msu_id, init_data, doorbell) {
            Ok(msu) => {
                log_lifecycle!(msu_id, msu.msu_type.name(), "created", worker = worker);
                shared.publish(RuntimeEvent::Created {
                    msu: msu_id,
                    type_id,
                    worker,
                });
                Ok(msu)
            }
            Err(err) => {
                warn!(msu_id = %msu_id, type_id = %type_id, error = %err, "instance creation failed");
                shared.publish(RuntimeEvent::CreationFailed {
                    msu: msu_id,
                    type_id,
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    fn build(
        shared: &RuntimeShared,
        worker: usize,
        type_id: MsuTypeId,
        msu_id: MsuId,
        init_data: &InitData,
        doorbell: &Doorbell,
    ) -> Result<LocalMsu, CreateError> {
        let msu_type = shared
            .registry()
            .lookup(type_id)
            .ok_or(CreateError::UnknownType(type_id))?;

        let config = shared.config();
        let data = MsuQueue::weighed(config.data_queue_capacity, doorbell.clone(), |msg: &MsuMessage| msg.payload.len());
        let ctrl = MsuQueue::new(config.ctrl_queue_capacity, doorbell.clone());
        shared.directory().insert(
            msu_id,
            DirectoryEntry {
                type_id,
                worker,
                data: data.handle(),
                ctrl: ctrl.handle(),
            },
        )?;

        let mut msu = LocalMsu {
            id: msu_id,
            msu_type: msu_type.clone(),
            routes: RouteSet::new(),
            data,
            ctrl,
            state: KeyedState::new(),
            msu_state: None,
            weight: 1,
        };
        let initialized = catch_panic("init", || msu_type.init(&mut msu.context(shared), init_data)).and_then(|r| r);
        if let Err(source) = initialized {
            shared.directory().remove(msu_id);
            return Err(CreateError::CreationFailed { msu: msu_id, source });
        }
        Ok(msu)
    }

    /// Runs the type's `destroy`, unregisters the instance and releases
    /// everything still queued for it.
    pub(crate) fn destroy(mut self, shared: &RuntimeShared) {
        let msu_type = self.msu_type.clone();
        if let Err(err) = catch_panic("destroy", || msu_type.destroy(&mut self.context(shared))) {
            log_error!(err, self.id, msu_type.name());
        }
        shared.directory().remove(self.id);

        let dropped = self.data.close() + self.ctrl.close();
        if !self.state.is_empty() {
            warn!(
                msu_id = %self.id,
                type_name = msu_type.name(),
                entries = self.state.len(),
                "keyed state left behind at destroy"
            );
        }
        log_lifecycle!(self.id, msu_type.name(), "destroyed", dropped = dropped);
        shared.publish(RuntimeEvent::Destroyed {
            msu: self.id,
            type_id: msu_type.id(),
        });
    }

    pub(crate) fn context<'a>(&'a mut self, shared: &'a RuntimeShared) -> MsuContext<'a> {
        MsuContext::new(
            shared,
            self.id,
            &self.msu_type,
            &mut self.routes,
            &mut self.state,
            &mut self.msu_state,
        )
    }

    pub fn id(&self) -> MsuId {
        self.id
    }

    pub fn type_id(&self) -> MsuTypeId {
        self.msu_type.id()
    }

    pub fn msu_type(&self) -> &Arc<dyn MsuType> {
        &self.msu_type
    }

    pub fn routes(&self) -> &RouteSet {
        &self.routes
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn keyed_state(&self) -> &KeyedState {
        &self.state
    }

    pub fn data_len(&self) -> usize {
        self.data.len()
    }

    pub fn ctrl_len(&self) -> usize {
        self.ctrl.len()
    }
}

impl std::fmt::Debug for LocalMsu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalMsu")
            .field("id", &self.id)
            .field("type", &self.msu_type)
            .field("routes", &self.routes.endpoint_count())
            .field("data_len", &self.data.len())
            .field("ctrl_len", &self.ctrl.len())
            .field("weight", &self.weight)
            .finish()
    }
}
