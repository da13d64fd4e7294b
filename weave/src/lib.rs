// Weave Dataflow Runtime
//
// This crate hosts MSU instances on worker threads, routes messages between
// them (locally or to peer runtimes), applies control-plane updates and
// records per-instance statistics. The shared data model lives in weave-api.

pub mod config;
pub mod control;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod msu;
pub mod profiler;
pub mod queue;
pub mod registry;
pub mod routing;
pub mod runtime;
pub mod stats;
pub mod transport;
mod worker;

// Re-export commonly used types
pub use config::{RuntimeConfig, StatsConfig};
pub use dispatch::{Delivery, RemoteTarget};
pub use error::*;
pub use msu::{KeyedState, LocalMsu, MsuContext, MsuType, Next};
pub use registry::TypeRegistry;
pub use routing::{Endpoint, EndpointKind, Route, RouteSet};
pub use runtime::{Runtime, RuntimeEvent, RuntimeShared};
pub use stats::{ItemInfo, StatsEngine};
pub use transport::{ChannelTransport, NullTransport, PeerFrame, PeerTransport};
pub use worker::WorkerState;
pub use weave_api;

#[doc(hidden)]
pub use tracing;
