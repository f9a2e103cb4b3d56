//! sensorcast Core - Shared types for sensor relaying
//!
//! This crate provides the domain types shared between the daemon
//! (sensorcastd) and the wire protocol (sensorcast-protocol).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod reading;
pub mod sensor;
pub mod spec;

// Re-exports for convenience
pub use error::{DomainError, DomainResult};
pub use reading::Reading;
pub use sensor::SensorName;
pub use spec::{DecoderKind, SensorSpec};
