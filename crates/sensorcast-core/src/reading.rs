//! Decoded sensor readings.

use serde::{Deserialize, Serialize};

/// One value attributed to one sensor at one point in time.
///
/// Readings carry no identity beyond their value and their position in
/// the stream they were published on. A source failure is delivered as
/// an ordinary value, [`Reading::Disconnected`], so consumers observe it
/// in stream order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reading {
    /// A decoded numeric value.
    Value(i64),

    /// The physical source backing this sensor became unavailable.
    Disconnected,
}

impl Reading {
    /// Returns the numeric value, if this is not a disconnect marker.
    pub fn value(&self) -> Option<i64> {
        match self {
            Reading::Value(v) => Some(*v),
            Reading::Disconnected => None,
        }
    }

    /// Returns true for the disconnect marker.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Reading::Disconnected)
    }
}

impl From<i64> for Reading {
    fn from(value: i64) -> Self {
        Reading::Value(value)
    }
}
