//! Typed ID definitions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{define_uuid_id, IdError};

// =============================================================================
// Virtual machines and ports
// =============================================================================

define_uuid_id!(InstanceUuid);
define_uuid_id!(PortId);

impl PortId {
    /// Returns the first `len` characters of the canonical form.
    ///
    /// Host-side network devices are named after this prefix because
    /// interface names are limited to 15 bytes.
    #[must_use]
    pub fn short(&self, len: usize) -> String {
        let mut s = self.to_string();
        s.truncate(len.min(Self::CANONICAL_LEN));
        s
    }
}

// =============================================================================
// Hosts
// =============================================================================

/// Name of a compute host as registered in the inventory store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostId(String);

impl HostId {
    /// Maximum length of a host name (DNS limit).
    pub const MAX_LEN: usize = 255;

    /// Parses and validates a host name.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }

        if s.len() > Self::MAX_LEN {
            return Err(IdError::TooLong {
                len: s.len(),
                max: Self::MAX_LEN,
            });
        }

        if let Some(character) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')))
        {
            return Err(IdError::InvalidCharacter {
                character,
                value: s.to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }

    /// Returns the host name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for HostId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for HostId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for HostId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for HostId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================
