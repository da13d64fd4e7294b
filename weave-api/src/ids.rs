//! Identifier newtypes.
//!
//! All identifiers are small integers assigned by the control plane. They are
//! wrapped so an MSU instance id can never be passed where a type id is
//! expected.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            /// Returns the raw numeric value.
            pub const fn get(self) -> u32 {
                self.0
            }
        }

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }

        impl From<$name> for u32 {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

numeric_id!(
    /// Identifier of one MSU instance. Unique within its runtime for the
    /// instance's lifetime.
    MsuId,
    "msu-"
);

numeric_id!(
    /// Identifier of an MSU type, shared by every instance of that type.
    MsuTypeId,
    "type-"
);

numeric_id!(
    /// Identifier of a runtime process participating in the dataflow.
    RuntimeId,
    "rt-"
);
