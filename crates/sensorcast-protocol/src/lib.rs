//! sensorcast Protocol - Wire records for sensor streams
//!
//! This crate provides the records written to HTTP subscribers and the
//! header values the gateway attaches to its responses.

pub mod headers;
pub mod record;

pub use record::{ReadingRecord, SensorList};
