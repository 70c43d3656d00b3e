//! Newtype identifiers.
//!
//! Plain `String`s are easy to transpose (pass a `FallbackId` where a
//! `MessageId` was expected); these newtypes make that a compile error
//! instead of a 3am page.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(MessageId, "A message's identifier: the primary-store id once persisted, or a client-supplied placeholder before that.");
string_id!(ConversationId, "A conversation's identifier.");
string_id!(UserId, "A user's identifier.");
string_id!(WalId, "An append-only WAL entry's identifier.");
string_id!(FallbackId, "A parked fallback entry's identifier, shaped `fb_<ts>_<rand>`.");

impl FallbackId {
    /// Generate a new fallback id in the `fb_<ts_millis>_<rand>` shape spec.md §3 requires.
    pub fn generate(now_millis: u64) -> Self {
        let rand_suffix: u32 = rand::random();
        Self(format!("fb_{}_{:08x}", now_millis, rand_suffix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_id_has_expected_shape() {
        let id = FallbackId::generate(1_700_000_000_000);
        assert!(id.as_str().starts_with("fb_1700000000000_"));
    }

    #[test]
    fn ids_round_trip_through_serde() {
        let id = MessageId::new("m1");
        let json = serde_json::to_string(&id).unwrap();
        let back: MessageId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
