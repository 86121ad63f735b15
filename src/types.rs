//! NewType wrappers for the identifiers that flow between components.
//!
//! These types prevent accidental mixing of semantically different strings
//! (e.g., passing a key id where a client id is expected).

use serde::{Deserialize, Serialize};
use std::fmt;

/// String identifier newtype with the conversions the crate needs.
macro_rules! newtype_string {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
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
    };
}

newtype_string!(
    /// OAuth2 / LTI client identifier issued by the platform.
    ///
    /// For LTI this is both the audience inbound launches must carry and
    /// the subject of the client assertions this tool signs.
    ClientId
);

newtype_string!(
    /// JWK key id (`kid`).
    ///
    /// Stable for the process lifetime; published in the JWKS document and
    /// stamped into the header of every assertion we sign.
    KeyId
);

newtype_string!(
    /// Space separated OAuth2 scope string.
    Scope
);
