//! Macros for defining UUID-backed ID types.

/// Macro to define a typed ID backed by a UUID.
///
/// This generates a newtype wrapper around `Uuid` with:
/// - `new()` to generate a fresh random ID
/// - `parse()` accepting only the canonical 36-char hyphenated form
/// - `Display` (lowercase hyphenated) and `FromStr` implementations
/// - `Serialize` and `Deserialize` implementations (as strings)
/// - `Ord`, `Hash`, and other standard traits
///
/// # Example
///
/// ```ignore
/// define_uuid_id!(InstanceUuid);
///
/// let id: InstanceUuid = "0f8fad5b-d9cb-469f-a165-70867728950e".parse()?;
/// ```
#[macro_export]
macro_rules! define_uuid_id {
    ($name:ident) => {
        /// A typed UUID identifier.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name($crate::Uuid);

        impl $name {
            /// Length of the canonical hyphenated form.
            pub const CANONICAL_LEN: usize = 36;

            /// Creates a new random ID.
            #[must_use]
            pub fn new() -> Self {
                Self($crate::Uuid::new_v4())
            }

            /// Creates an ID from a raw UUID.
            #[must_use]
            pub const fn from_uuid(uuid: $crate::Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            #[must_use]
            pub const fn uuid(&self) -> $crate::Uuid {
                self.0
            }

            /// Parses an ID from its canonical hyphenated form.
            pub fn parse(s: &str) -> Result<Self, $crate::IdError> {
                if s.is_empty() {
                    return Err($crate::IdError::Empty);
                }

                if s.len() != Self::CANONICAL_LEN {
                    return Err($crate::IdError::InvalidUuid {
                        value: s.to_string(),
                        message: format!(
                            "expected {} characters, got {}",
                            Self::CANONICAL_LEN,
                            s.len()
                        ),
                    });
                }

                let uuid = $crate::Uuid::try_parse(s).map_err(|e| $crate::IdError::InvalidUuid {
                    value: s.to_string(),
                    message: e.to_string(),
                })?;

                Ok(Self(uuid))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0.hyphenated())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::parse(&s).map_err(serde::de::Error::custom)
            }
        }

        impl AsRef<$crate::Uuid> for $name {
            fn as_ref(&self) -> &$crate::Uuid {
                &self.0
            }
        }
    };
}
