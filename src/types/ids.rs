//! TypeID-backed identifiers used on the sandbox wire and in logs.
//!
//! `RequestId` correlates an `uploadFile` relay with its response
//! (`upload_01h455vb4pex5vsknk084sn02q`); `SandboxId` names one worker
//! execution context (`sandbox_01h455vb4pex5vsknk084sn02q`).

use mti::prelude::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Error returned when a string is not a valid identifier of the expected kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidId {
    /// TypeID parsing failed
    Parse(String),
    /// The TypeID carried a different prefix
    WrongPrefix {
        /// The expected prefix
        expected: &'static str,
        /// The prefix that was found
        actual: String,
    },
}

impl fmt::Display for InvalidId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(e) => write!(f, "invalid identifier: {e}"),
            Self::WrongPrefix { expected, actual } => {
                write!(f, "expected prefix '{expected}', got '{actual}'")
            }
        }
    }
}

impl std::error::Error for InvalidId {}

macro_rules! typeid_newtype {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub struct $name(MagicTypeId);

        impl $name {
            /// The TypeID prefix for this identifier.
            pub const PREFIX: &'static str = $prefix;

            /// Creates a fresh, time-sortable identifier (UUIDv7).
            #[must_use]
            pub fn new() -> Self {
                Self(Self::PREFIX.create_type_id::<V7>())
            }

            /// Parses an identifier, validating its prefix.
            ///
            /// # Errors
            ///
            /// Returns `InvalidId::Parse` for malformed input and
            /// `InvalidId::WrongPrefix` when the prefix does not match.
            pub fn parse(s: &str) -> Result<Self, InvalidId> {
                let id = MagicTypeId::from_str(s).map_err(|e| InvalidId::Parse(e.to_string()))?;
                let prefix = id.prefix().as_str();
                if prefix != Self::PREFIX {
                    return Err(InvalidId::WrongPrefix {
                        expected: Self::PREFIX,
                        actual: prefix.to_string(),
                    });
                }
                Ok(Self(id))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = InvalidId;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                self.0.to_string().serialize(serializer)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::parse(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

typeid_newtype!(
    /// Correlation token shared by an `uploadFile` request and its response.
    RequestId,
    "upload"
);

typeid_newtype!(
    /// Identity of one sandbox (worker execution context).
    SandboxId,
    "sandbox"
);
