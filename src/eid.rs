use rusty_ulid::{DecodingError, Ulid};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

/// Sortable unique identifier (ULID) of a logged interaction.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
#[serde(transparent)]
pub struct Eid(String);

impl Eid {
    #[inline]
    pub fn new() -> Eid {
        Eid(rusty_ulid::generate_ulid_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Milliseconds since the epoch encoded in the id.
    pub fn timestamp_ms(&self) -> Option<u64> {
        Ulid::from_str(&self.0).ok().map(|u| u.timestamp())
    }
}

impl Default for Eid {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for Eid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Eid {
    type Err = DecodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_str(s).map(|ulid| Eid(ulid.to_string()))
    }
}

impl From<Eid> for String {
    fn from(eid: Eid) -> Self {
        eid.0
    }
}
