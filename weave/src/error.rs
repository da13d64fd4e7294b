use std::net::Ipv4Addr;
use thiserror::Error;

use weave_api::{EnvelopeError, MsuError, MsuId, MsuTypeId, ProvenanceError, RuntimeId, StatKind};

/// Errors raised while registering MSU types at startup.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("type {0} is already registered")]
    DuplicateType(MsuTypeId),
    #[error("init_type failed for {type_id}: {source}")]
    TypeInitFailed {
        type_id: MsuTypeId,
        #[source]
        source: MsuError,
    },
}

/// Errors related to creating an MSU instance.
#[derive(Error, Debug)]
pub enum CreateError {
    #[error("no registered type {0}")]
    UnknownType(MsuTypeId),
    #[error("instance {0} already exists on this runtime")]
    DuplicateId(MsuId),
    #[error("init failed for {msu}: {source}")]
    CreationFailed {
        msu: MsuId,
        #[source]
        source: MsuError,
    },
}

/// Errors related to queue operations. Enqueue never blocks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is full (capacity: {capacity})")]
    Full { capacity: usize },
    #[error("queue is closed")]
    Closed,
}

/// Routing failures. All of them are fatal to the message being routed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("no route to type {0}")]
    NoRoute(MsuTypeId),
    #[error("every endpoint of type {0} is remote")]
    AllRemote(MsuTypeId),
    #[error("no endpoint of type {type_id} at {address}")]
    NoMatchingAddress { type_id: MsuTypeId, address: Ipv4Addr },
    #[error("no endpoint {msu} for type {type_id}")]
    NoSuchEndpoint { type_id: MsuTypeId, msu: MsuId },
    #[error("message for type {0} carries no provenance")]
    NoProvenance(MsuTypeId),
    #[error("no endpoint of type {type_id} on origin runtime {runtime}")]
    NoOriginEndpoint { type_id: MsuTypeId, runtime: RuntimeId },
    #[error("endpoint {msu} already routed for type {type_id}")]
    DuplicateEndpoint { type_id: MsuTypeId, msu: MsuId },
    #[error("malformed endpoint: {0}")]
    MalformedEndpoint(String),
}

/// Failures handing an envelope to the inter-runtime transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("no connection to runtime {0}")]
    NoPeer(RuntimeId),
    #[error("connection to runtime {0} is closed")]
    Disconnected(RuntimeId),
    #[error("connection to runtime {0} is full")]
    Backpressure(RuntimeId),
}

/// Failures of the local or remote send path.
#[derive(Error, Debug)]
pub enum SendError {
    #[error("local enqueue failed: {0}")]
    Queue(#[from] QueueError),
    #[error("remote hand-off failed: {0}")]
    Transport(#[from] TransportError),
    #[error("send capability failed: {0}")]
    Type(#[from] MsuError),
    #[error("message cannot be framed: {0}")]
    Envelope(#[from] EnvelopeError),
}

/// Error classes reported with every dispatch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Unknown type, missing capability.
    Configuration,
    /// No route, exhausted or missing provenance.
    Topology,
    /// Full or closed queue.
    Resource,
    /// Remote hand-off failure.
    Transport,
    /// The type's own logic failed.
    Type,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Topology => "topology",
            ErrorCategory::Resource => "resource",
            ErrorCategory::Transport => "transport",
            ErrorCategory::Type => "type",
        }
    }
}

/// Errors ending the dispatch of one message. The message has been released
/// by the time one of these is returned.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("type {0} has no receive capability")]
    MissingCapability(MsuTypeId),
    #[error("receive failed: {0}")]
    Type(#[source] MsuError),
    #[error("next-hop type {0} is not registered")]
    UnknownType(MsuTypeId),
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error(transparent)]
    Provenance(#[from] ProvenanceError),
    #[error(transparent)]
    Send(#[from] SendError),
}

impl DispatchError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            DispatchError::MissingCapability(_) | DispatchError::UnknownType(_) => {
                ErrorCategory::Configuration
            }
            DispatchError::Type(_) => ErrorCategory::Type,
            DispatchError::Route(_) | DispatchError::Provenance(_) => ErrorCategory::Topology,
            DispatchError::Send(SendError::Queue(_)) => ErrorCategory::Resource,
            DispatchError::Send(SendError::Transport(_)) => ErrorCategory::Transport,
            DispatchError::Send(SendError::Type(_)) => ErrorCategory::Type,
            DispatchError::Send(SendError::Envelope(_)) => ErrorCategory::Resource,
        }
    }
}

/// Errors applying a control command. None of them stop the instance.
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("command for {got} delivered to {expected}")]
    Misaddressed { expected: MsuId, got: MsuId },
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error("scheduling weight must be positive")]
    InvalidWeight,
    #[error("unhandled control code {0}")]
    Unhandled(u32),
    #[error("receive_ctrl failed: {0}")]
    Type(#[source] MsuError),
}

/// Errors from the statistics engine.
#[derive(Error, Debug)]
pub enum StatsError {
    #[error("statistic {0} is disabled")]
    Disabled(StatKind),
    #[error("no data recorded for {kind} item {item}")]
    NoData { kind: StatKind, item: u32 },
    #[error("all {max} item slots of {kind} are in use")]
    SlotsExhausted { kind: StatKind, max: usize },
    #[error("sample count must be at least 1")]
    InvalidCount,
    #[error("failed to write stat log: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode samples: {0}")]
    Encode(#[from] EnvelopeError),
}

/// Errors related to the runtime itself.
#[derive(Error, Debug)]
pub enum SystemError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("no worker with index {0}")]
    NoSuchWorker(usize),
    #[error("no instance {0} on this runtime")]
    UnknownMsu(MsuId),
    #[error("runtime is shutting down")]
    ShuttingDown,
    #[error("thread setup error: {0}")]
    ThreadSetup(String),
    #[error(transparent)]
    Create(#[from] CreateError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("malformed peer frame: {0}")]
    Envelope(#[from] EnvelopeError),
    #[error("peer frame for {msu} carries protocol {got}, its type expects {expected}")]
    ProtoMismatch { msu: MsuId, expected: u32, got: u32 },
    #[error("internal runtime error: {0}")]
    Other(#[from] anyhow::Error),
}
