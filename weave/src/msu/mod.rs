//! # MSU Types and Instances
//!
//! An MSU (micro-service unit) is one schedulable processing stage. Its
//! behavior comes from an [`MsuType`] shared by every instance of that type;
//! its data lives in a [`LocalMsu`] owned by exactly one worker thread.
//!
//! ## Key Concepts
//! - **Capabilities**: every method of [`MsuType`] except `id` and `name` is
//!   optional. The defaults either do nothing, report the capability as
//!   missing, or delegate to the default helpers of the routing and send
//!   paths.
//! - **Context**: capabilities that run on behalf of an instance receive an
//!   [`MsuContext`] giving access to the instance's state and to the rest of
//!   the runtime (statistics, further dispatch through `call_type`).
//! - **State**: per-flow state lives in [`KeyedState`], instance-wide state in
//!   a single type-erased slot. Both are owned by the instance and dropped
//!   with it.

mod context;
mod guard;
mod instance;
mod state;

pub use context::MsuContext;
pub(crate) use guard::{catch_panic, panic_message};
pub use instance::LocalMsu;
pub use state::KeyedState;

use bytes::Bytes;
use weave_api::{InitData, MsuError, MsuMessage, MsuResult, MsuTypeId};

use crate::dispatch::{self, RemoteTarget};
use crate::error::{RouteError, SendError};
use crate::queue::QueueHandle;
use crate::routing::{strategies, Endpoint, RouteSet};
use crate::transport::PeerTransport;

/// What `receive` wants done with the message it was given.
#[derive(Debug)]
pub enum Next {
    /// Route `msg` to an instance of `type_id`.
    Route { type_id: MsuTypeId, msg: MsuMessage },
    /// Processing finished; the runtime releases `msg`.
    Done(MsuMessage),
    /// The capability took ownership of the message (stored it in keyed
    /// state, forwarded it with `call_type`, ...). Nothing is left to release.
    Consumed,
}

impl Next {
    pub fn route(type_id: MsuTypeId, msg: MsuMessage) -> Self {
        Next::Route { type_id, msg }
    }
}

/// Behavior shared by every instance of one MSU type.
///
/// A type is registered once at startup and never changes afterwards.
/// Implementations provide the subset of capabilities they need:
///
/// ```rust
/// use weave::msu::{MsuContext, MsuType, Next};
/// use weave_api::{MsuMessage, MsuResult, MsuTypeId};
///
/// struct Uppercase;
///
/// impl MsuType for Uppercase {
///     fn id(&self) -> MsuTypeId {
///         MsuTypeId(20)
///     }
///
///     fn name(&self) -> &str {
///         "uppercase"
///     }
///
///     fn receive(&self, _ctx: &mut MsuContext<'_>, mut msg: MsuMessage) -> MsuResult<Next> {
///         msg.payload = msg.payload.to_ascii_uppercase().into();
///         Ok(Next::route(MsuTypeId(21), msg))
///     }
/// }
/// ```
pub trait MsuType: Send + Sync + 'static {
    fn id(&self) -> MsuTypeId;

    fn name(&self) -> &str;

    /// Protocol tag stamped on envelopes addressed to this type.
    fn proto_number(&self) -> u32 {
        self.id().get()
    }

    /// One-time, process-wide setup, run at registration.
    fn init_type(&self) -> MsuResult<()> {
        Ok(())
    }

    /// One-time, process-wide teardown, run at runtime shutdown.
    fn destroy_type(&self) {}

    /// Per-instance setup. Failure aborts the creation of the instance.
    fn init(&self, _ctx: &mut MsuContext<'_>, _data: &InitData) -> MsuResult<()> {
        Ok(())
    }

    /// Per-instance teardown. Keyed state left behind is dropped with the
    /// instance; release anything that needs more than a drop here.
    fn destroy(&self, _ctx: &mut MsuContext<'_>) {}

    /// Processes one data message.
    fn receive(&self, _ctx: &mut MsuContext<'_>, _msg: MsuMessage) -> MsuResult<Next> {
        Err(MsuError::MissingCapability("receive"))
    }

    /// Handles a type-specific control action.
    fn receive_ctrl(&self, _ctx: &mut MsuContext<'_>, _code: u32, _payload: Bytes) -> MsuResult<()> {
        Err(MsuError::MissingCapability("receive_ctrl"))
    }

    /// Picks the endpoint of *this* type that `msg` should go to, from the
    /// sender's route set.
    fn route(&self, routes: &mut RouteSet, msg: &MsuMessage) -> Result<Endpoint, RouteError> {
        strategies::key_based(routes, self.id(), msg)
    }

    /// Delivers `msg` to a local destination queue.
    fn send_local(&self, queue: &QueueHandle<MsuMessage>, msg: MsuMessage) -> Result<(), SendError> {
        dispatch::default_send_local(queue, msg)
    }

    /// Hands `msg` to the transport for a remote destination. Returns the
    /// number of bytes handed off.
    fn send_remote(
        &self,
        transport: &dyn PeerTransport,
        target: RemoteTarget,
        msg: MsuMessage,
    ) -> Result<usize, SendError> {
        dispatch::default_send_remote(transport, target, msg)
    }

    /// Computes the routing key of a message about to be routed to this type.
    /// `None` leaves the key untouched.
    fn generate_id(&self, _msg: &MsuMessage) -> Option<u32> {
        None
    }
}

impl std::fmt::Debug for dyn MsuType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MsuType")
            .field("id", &self.id())
            .field("name", &self.name())
            .finish()
    }
}
