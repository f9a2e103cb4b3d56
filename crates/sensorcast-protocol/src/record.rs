//! Records written to stream subscribers.

use sensorcast_core::{Reading, SensorName};
use serde::{Deserialize, Serialize};

/// The JSON form of one delivered reading.
///
/// A value is written as `{"reading":12}` and a disconnect marker as
/// `{"disconnected":true}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReadingRecord {
    /// A decoded value.
    Reading {
        /// The numeric reading
        reading: i64,
    },

    /// The sensor's source went away.
    Disconnected {
        /// Always `true`
        disconnected: bool,
    },
}

impl ReadingRecord {
    /// Serializes the record as a single newline-terminated line.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

impl From<Reading> for ReadingRecord {
    fn from(reading: Reading) -> Self {
        match reading {
            Reading::Value(reading) => ReadingRecord::Reading { reading },
            Reading::Disconnected => ReadingRecord::Disconnected { disconnected: true },
        }
    }
}

impl From<ReadingRecord> for Reading {
    fn from(record: ReadingRecord) -> Self {
        match record {
            ReadingRecord::Reading { reading } => Reading::Value(reading),
            ReadingRecord::Disconnected { .. } => Reading::Disconnected,
        }
    }
}

/// Body of the discovery endpoint: every known sensor, in configuration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorList(pub Vec<SensorName>);

impl SensorList {
    /// Returns the names as plain strings.
    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(SensorName::as_str).collect()
    }
}
