//! Branded ID newtypes.
//!
//! Connection and run IDs are minted by the server as UUID v7 (time-ordered).
//! Principal IDs are never minted here; they come from the identity resolver
//! and are treated as opaque strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

macro_rules! generated_id {
    ($(#[$meta:meta])* $name:ident) => {
        branded_id! { $(#[$meta])* $name }

        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7().to_string())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

branded_id! {
    /// Identity of an authenticated principal; also the key of its room.
    PrincipalId
}

impl PrincipalId {
    /// Parse an optional raw identity, treating empty or whitespace-only
    /// values as "no principal".
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        raw.map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Self::from)
    }

    /// Whether this ID carries an identity at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

generated_id! {
    /// Unique identifier for one live transport session.
    ConnectionId
}

generated_id! {
    /// Unique identifier for one analysis task run.
    RunId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn generated_id_is_uuid() {
        let id = ConnectionId::new();
        assert!(Uuid::parse_str(id.as_str()).is_ok());
    }

    #[test]
    fn principal_parse_trims_and_rejects_empty() {
        assert_eq!(PrincipalId::parse(Some("  alice ")).unwrap().as_str(), "alice");
        assert!(PrincipalId::parse(Some("")).is_none());
        assert!(PrincipalId::parse(Some("   ")).is_none());
        assert!(PrincipalId::parse(None).is_none());
    }

    #[test]
    fn principal_is_empty() {
        assert!(PrincipalId::from("").is_empty());
        assert!(!PrincipalId::from("bob").is_empty());
    }

    #[test]
    fn serde_is_transparent() {
        let id = PrincipalId::from("user_1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"user_1\"");
        let back: PrincipalId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn display_and_deref() {
        let id = ConnectionId::from("conn_1");
        assert_eq!(id.to_string(), "conn_1");
        assert!(id.starts_with("conn"));
        let s: String = id.into();
        assert_eq!(s, "conn_1");
    }
}
