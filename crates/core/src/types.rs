use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a queued request.
///
/// Assigned by the store when the row is inserted. Values grow
/// monotonically but callers should treat them as opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(i64);

impl RequestId {
    /// Wrap a raw store-assigned id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Return the raw id.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
