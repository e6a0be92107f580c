use serde::{Deserialize, Serialize};

/// Identifier of a stored record.
///
/// Two disjoint spaces share one integer type:
/// - **server ids** are strictly positive and assigned by the server-of-record;
/// - **placeholder ids** are strictly negative and assigned by a client-local
///   store for records created before a successful server round-trip.
///
/// A placeholder can therefore never collide with an id the server hands out
/// later, and `remap` on the store swaps one for the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl RecordId {
    pub fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> i64 {
        self.0
    }

    /// `true` for ids minted locally while offline.
    pub fn is_placeholder(self) -> bool {
        self.0 < 0
    }

    pub fn is_server_assigned(self) -> bool {
        self.0 > 0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RecordId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

/// Which identifier space a store allocates new ids from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdSpace {
    /// Server-of-record: 1, 2, 3, ...
    Server,
    /// Client-local: -1, -2, -3, ...
    Placeholder,
}
