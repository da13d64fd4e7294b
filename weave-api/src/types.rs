use crate::errors::MsuError;

/// Result type returned by MSU type capabilities.
pub type MsuResult<T> = Result<T, MsuError>;
