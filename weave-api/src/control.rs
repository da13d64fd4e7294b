//! Control-plane commands.
//!
//! The external controller configures live instances by pushing
//! [`ControlMsg`] values onto their control queues. Commands for one instance
//! are applied strictly in order; they carry no ordering relation to data
//! messages.

use bytes::Bytes;
use std::net::Ipv4Addr;

use crate::ids::{MsuId, MsuTypeId, RuntimeId};

/// Description of a destination endpoint as the controller sees it.
///
/// The receiving runtime decides locality: an endpoint whose `runtime` is the
/// runtime applying the command is resolved to the destination's queue,
/// anything else becomes a remote endpoint reached through `address`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointSpec {
    pub msu: MsuId,
    pub runtime: RuntimeId,
    pub address: Ipv4Addr,
    /// Exclusive upper bound of the routing keys served by this endpoint.
    /// `None` places it one past the current maximum of the route.
    pub key_range: Option<u32>,
}

impl EndpointSpec {
    pub fn local(msu: MsuId, runtime: RuntimeId) -> Self {
        Self {
            msu,
            runtime,
            address: Ipv4Addr::UNSPECIFIED,
            key_range: None,
        }
    }

    pub fn remote(msu: MsuId, runtime: RuntimeId, address: Ipv4Addr) -> Self {
        Self {
            msu,
            runtime,
            address,
            key_range: None,
        }
    }

    pub fn with_key_range(mut self, upper_bound: u32) -> Self {
        self.key_range = Some(upper_bound);
        self
    }
}

/// Operation carried by a control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAction {
    /// Make `endpoint` reachable as a destination of type `type_id`.
    AddRoute { type_id: MsuTypeId, endpoint: EndpointSpec },
    /// Forget the endpoint of instance `msu` under type `type_id`.
    RemoveRoute { type_id: MsuTypeId, msu: MsuId },
    /// Move the key-range upper bound of an existing endpoint.
    ModifyRoute {
        type_id: MsuTypeId,
        msu: MsuId,
        key_range: u32,
    },
    /// Number of data messages processed per scheduling pass.
    SetWeight(u32),
    /// Type-specific action, handed to the type's control capability.
    Custom { code: u32, payload: Bytes },
}

impl ControlAction {
    pub const ADD_ROUTE: u32 = 1;
    pub const REMOVE_ROUTE: u32 = 2;
    pub const MODIFY_ROUTE: u32 = 3;
    pub const SET_WEIGHT: u32 = 4;

    /// Numeric operation code, as logged and reported in errors.
    pub fn code(&self) -> u32 {
        match self {
            ControlAction::AddRoute { .. } => Self::ADD_ROUTE,
            ControlAction::RemoveRoute { .. } => Self::REMOVE_ROUTE,
            ControlAction::ModifyRoute { .. } => Self::MODIFY_ROUTE,
            ControlAction::SetWeight(_) => Self::SET_WEIGHT,
            ControlAction::Custom { code, .. } => *code,
        }
    }
}

/// A control command addressed to one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMsg {
    pub msu: MsuId,
    pub action: ControlAction,
}

impl ControlMsg {
    pub fn new(msu: MsuId, action: ControlAction) -> Self {
        Self { msu, action }
    }
}

/// Opaque initialization payload handed to a type's `init` capability.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitData(pub Bytes);

impl InitData {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The payload as UTF-8, for types configured with a textual argument.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }
}

impl From<&'static str> for InitData {
    fn from(value: &'static str) -> Self {
        InitData(Bytes::from_static(value.as_bytes()))
    }
}

impl From<Vec<u8>> for InitData {
    fn from(value: Vec<u8>) -> Self {
        InitData(Bytes::from(value))
    }
}
