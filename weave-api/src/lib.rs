//! # Weave API
//!
//! Shared data model of the weave dataflow runtime. Everything in this crate is
//! plain data that crosses a boundary: between MSUs on one runtime, between
//! runtimes over the inter-runtime transport, or between a runtime and the
//! external control plane / telemetry pipeline.
//!
//! ## Core Components
//!
//! - **Identifiers**: [`MsuId`], [`MsuTypeId`], [`RuntimeId`]
//! - **Messages**: [`MsuMessage`] with its [`MsgHeader`] (routing key, bounded
//!   provenance chain, profiling flag) and an opaque byte payload
//! - **Control**: [`ControlMsg`] route updates and type-specific actions
//! - **Wire**: [`RemoteEnvelope`] and [`PeerHeader`] framing between runtimes
//! - **Statistics**: [`StatKind`] and the [`StatSample`] record stream
//!
//! ## Module Organization
//!
//! - [`ids`]: Identifier newtypes
//! - [`message`]: Message, header, key and provenance
//! - [`control`]: Control-plane commands and initialization data
//! - [`envelope`]: Inter-runtime envelope and peer framing
//! - [`stats`]: Statistic kinds and sample wire records
//! - [`errors`]: Error types shared by type implementations and codecs
//! - [`types`]: Common aliases

pub mod control;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod message;
pub mod stats;
pub mod types;

pub use control::{ControlAction, ControlMsg, EndpointSpec, InitData};
pub use envelope::{PeerHeader, PeerMsgType, RemoteEnvelope};
pub use errors::{EnvelopeError, MsuError, ProvenanceError};
pub use ids::{MsuId, MsuTypeId, RuntimeId};
pub use message::{Hop, MsgHeader, MsgKey, MsuMessage, Provenance, MAX_PROVENANCE_LEN};
pub use stats::{StatKind, StatSample, TimedStat};
pub use types::MsuResult;
