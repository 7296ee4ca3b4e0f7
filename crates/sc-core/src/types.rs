//! Identifier newtypes and validation errors shared across the core.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    /// A site radius was zero, negative or not a number.
    #[error("radius must be a positive number of meters, got {value}")]
    InvalidRadius { value: f64 },

    /// A coordinate was outside WGS84 bounds or not finite.
    #[error("invalid coordinate ({latitude}, {longitude})")]
    InvalidCoordinate { latitude: f64, longitude: f64 },

    /// A closed pause ended before it started.
    #[error("pause ends at {end} before it starts at {start}")]
    PauseEndsBeforeStart { start: String, end: String },

    /// A persisted shift violates a lifecycle invariant.
    #[error("shift {shift_id} is inconsistent: {reason}")]
    InconsistentShift {
        shift_id: String,
        reason: &'static str,
    },
}

/// Generates a validated string ID newtype with common trait implementations.
macro_rules! define_string_id {
    (
        $(#[$meta:meta])*
        $name:ident, $field_name:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new ID after validation.
            pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
                let id = id.into();
                if id.trim().is_empty() {
                    return Err(ValidationError::Empty { field: $field_name });
                }
                Ok(Self(id))
            }

            /// Returns the ID as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_string_id!(
    /// A validated work site identifier.
    SiteId, "site ID"
);

define_string_id!(
    /// A validated shift identifier.
    ///
    /// Shift IDs are generated by the caller (the CLI uses UUIDs); the core
    /// only requires them to be non-empty.
    ShiftId, "shift ID"
);

define_string_id!(
    /// A validated user identifier.
    UserId, "user ID"
);

define_string_id!(
    /// A validated tenant identifier, owning a set of sites.
    TenantId, "tenant ID"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_id_rejects_empty() {
        assert!(SiteId::new("").is_err());
        assert!(SiteId::new("site1").is_ok());
    }

    #[test]
    fn ids_reject_whitespace_only() {
        let err = UserId::new("   ").unwrap_err();
        assert_eq!(err, ValidationError::Empty { field: "user ID" });
        assert_eq!(err.to_string(), "user ID cannot be empty");
    }

    #[test]
    fn shift_id_serializes_as_plain_string() {
        let id = ShiftId::new("shift-123").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"shift-123\"");
        let parsed: ShiftId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn tenant_id_serde_rejects_empty() {
        let result: Result<TenantId, _> = serde_json::from_str("\"\"");
        assert!(result.is_err());
    }

    #[test]
    fn user_id_as_ref() {
        let id = UserId::new("worker-2").unwrap();
        let s: &str = id.as_ref();
        assert_eq!(s, "worker-2");
    }
}
