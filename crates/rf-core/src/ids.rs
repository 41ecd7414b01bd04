//! Typed ID wrappers providing compile-time safety for entity identifiers.
//!
//! Run and owner identifiers are caller-supplied strings (the submitting
//! system names its own runs); internal identifiers are newtypes over `Uuid`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Generate a newtype ID wrapper over a caller-supplied `String`.
///
/// The macro produces a struct with:
/// - `new()` taking any `Into<String>`
/// - `as_str()` borrowing the inner value
/// - `Display` and `From<&str>`/`From<String>` conversions
macro_rules! string_id {
    ($($(#[doc = $doc:expr])* $name:ident),+ $(,)?) => {
        $(
            $(#[doc = $doc])*
            #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
            #[serde(transparent)]
            pub struct $name(String);

            impl $name {
                /// Wrap a caller-supplied identifier.
                #[must_use]
                pub fn new(id: impl Into<String>) -> Self {
                    Self(id.into())
                }

                /// Borrow the inner identifier string.
                #[must_use]
                pub fn as_str(&self) -> &str {
                    &self.0
                }

                /// True when the identifier is empty.
                #[must_use]
                pub fn is_empty(&self) -> bool {
                    self.0.is_empty()
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }

            impl From<&str> for $name {
                fn from(s: &str) -> Self {
                    Self(s.to_string())
                }
            }

            impl From<String> for $name {
                fn from(s: String) -> Self {
                    Self(s)
                }
            }
        )+
    };
}

/// Generate a newtype ID wrapper over `Uuid`.
///
/// The macro produces a struct with:
/// - `new()` to create a random v4 UUID
/// - `Display` and `FromStr` delegating to the inner UUID
/// - `From<Uuid>` and `Into<Uuid>` conversions
/// - `Default` that generates a new random ID
macro_rules! typed_id {
    ($($(#[doc = $doc:expr])* $name:ident),+ $(,)?) => {
        $(
            $(#[doc = $doc])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(Uuid);

            impl $name {
                /// Create a new random ID.
                #[must_use]
                pub fn new() -> Self {
                    Self(Uuid::new_v4())
                }

                /// Return the inner UUID value.
                #[must_use]
                pub fn as_uuid(&self) -> &Uuid {
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
                    write!(f, "{}", self.0)
                }
            }

            impl FromStr for $name {
                type Err = uuid::Error;

                fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                    Uuid::parse_str(s).map(Self)
                }
            }

            impl From<Uuid> for $name {
                fn from(uuid: Uuid) -> Self {
                    Self(uuid)
                }
            }

            impl From<$name> for Uuid {
                fn from(id: $name) -> Self {
                    id.0
                }
            }
        )+
    };
}

string_id! {
    /// Caller-supplied identifier for a generation run.
    RunId,
    /// Caller-supplied identifier for the owner (account) submitting runs.
    OwnerId,
}

typed_id! {
    /// Unique identifier for a broadcast lifecycle event.
    EventId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_display_and_str() {
        let id = RunId::new("run-42");
        assert_eq!(id.to_string(), "run-42");
        assert_eq!(id.as_str(), "run-42");
    }

    #[test]
    fn run_id_serde_transparent() {
        let id = RunId::new("r1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"r1\"");
        let back: RunId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn owner_id_empty_detection() {
        assert!(OwnerId::new("").is_empty());
        assert!(!OwnerId::new("u1").is_empty());
    }

    #[test]
    fn run_ids_hashable() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(RunId::new("a"));
        assert!(set.contains(&RunId::new("a")));
        assert!(!set.contains(&RunId::new("b")));
    }

    #[test]
    fn event_ids_are_unique() {
        let a = EventId::new();
        let b = EventId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn event_id_roundtrip_uuid() {
        let uuid = Uuid::new_v4();
        let id = EventId::from(uuid);
        let back: Uuid = id.into();
        assert_eq!(uuid, back);
    }

    #[test]
    fn event_id_display_and_from_str() {
        let id = EventId::new();
        let s = id.to_string();
        let parsed: EventId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn invalid_event_id_from_str() {
        let result = EventId::from_str("not-a-uuid");
        assert!(result.is_err());
    }
}
