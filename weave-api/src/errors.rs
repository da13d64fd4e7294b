//! # Shared Error Types
//!
//! Errors that cross the boundary between the runtime and the code it hosts
//! or talks to.
//!
//! ## Core Components
//!
//! - `MsuError`: returned by MSU type capabilities (`init`, `receive`, ...)
//! - `ProvenanceError`: the bounded provenance chain refused a hop
//! - `EnvelopeError`: inter-runtime or statistics wire data could not be
//!   encoded or decoded
//!
//! ## Usage Example
//!
//! ```rust
//! use weave_api::errors::MsuError;
//!
//! fn parse_request(payload: &[u8]) -> Result<&str, MsuError> {
//!     std::str::from_utf8(payload)
//!         .map_err(|e| MsuError::InvalidPayload(e.to_string()))
//! }
//! ```

use thiserror::Error;

/// Error reported by an MSU type capability.
///
/// The runtime never inspects the cause beyond logging it; what matters is
/// that the capability failed. The message that triggered the failure has
/// already been released by the time the runtime sees this value.
#[derive(Error, Debug)]
pub enum MsuError {
    /// The type does not implement a capability the runtime needed.
    #[error("capability `{0}` is not provided by this type")]
    MissingCapability(&'static str),

    /// The payload could not be interpreted by the type.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Keyed state expected for a flow was absent or of the wrong type.
    #[error("no state for flow {0}")]
    MissingState(u64),

    /// Type-specific numeric error code.
    #[error("type returned error code {0}")]
    Code(i32),

    /// The capability panicked. The runtime caught the unwind at the
    /// capability boundary; the instance and its worker keep running.
    #[error("capability `{capability}` panicked: {message}")]
    Panic { capability: &'static str, message: String },

    /// Catch-all wrapping any other failure, keeping its source chain.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The provenance chain is bounded; appending to a full chain is refused
/// instead of silently dropping the origin.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvenanceError {
    #[error("provenance chain is full ({max} hops)")]
    Full { max: usize },
}

/// Encoding and decoding failures for inter-runtime frames and statistics
/// records.
#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("frame truncated while reading {field}")]
    Truncated { field: &'static str },

    #[error("unknown peer message type {0}")]
    UnknownPeerType(u32),

    #[error("unknown statistic kind {0}")]
    UnknownStatKind(u32),

    #[error("provenance of {0} hops exceeds the maximum")]
    TooManyHops(usize),

    #[error("declared payload length {declared} does not match {actual} available bytes")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("{0} trailing bytes after record")]
    TrailingBytes(usize),

    /// A length does not fit the width of its wire field.
    #[error("{field} of {len} does not fit its wire field")]
    TooLarge { field: &'static str, len: usize },
}
