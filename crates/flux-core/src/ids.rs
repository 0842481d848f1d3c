//! Branded ID newtypes.
//!
//! IDs are UUID v7 strings so they sort by creation time. Wrapping them keeps
//! a connection ID from being passed where a change request ID is expected.

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
            /// Create a fresh time-ordered ID.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            /// Borrow the inner string.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
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
    };
}

branded_id! {
    /// Identifier assigned to a WebSocket connection at accept time.
    ConnectionId
}

branded_id! {
    /// Identifier of a proposed change set.
    ChangeRequestId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ids_are_uuid_v7() {
        let id = ChangeRequestId::new();
        let parsed = Uuid::parse_str(id.as_str()).unwrap();
        assert_eq!(parsed.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[test]
    fn later_ids_sort_after_earlier_ones() {
        let first = ChangeRequestId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = ChangeRequestId::new();
        assert!(first < second);
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = ConnectionId::from("conn-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"conn-1\"");
        let back: ConnectionId = serde_json::from_str("\"conn-1\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn display_matches_inner() {
        let id = ChangeRequestId::from("abc".to_owned());
        assert_eq!(id.to_string(), "abc");
    }
}
