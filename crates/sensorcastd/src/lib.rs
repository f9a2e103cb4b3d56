//! sensorcast Daemon - Sensor ingestion and broadcast server
//!
//! This crate provides the core infrastructure for the sensorcast daemon:
//! - `decoder` - Byte stream decoders producing reading tuples
//! - `source` - Reconnecting reader task per physical source
//! - `stream` - Per-sensor broadcast to bounded subscriber queues
//! - `registry` - Read-only sensor name to stream lookup
//! - `server` - HTTP gateway streaming readings to clients
//! - `config` - File and command line configuration
//! - `monitor` - Resource and stream usage logging
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       sensorcastd                            │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  ┌──────────────┐  tuples  ┌──────────────┐                  │
//! │  │ SourceReader │────────▶ │ SensorStream │ ×N per source    │
//! │  │ (per source) │ position │ (per sensor) │                  │
//! │  └──────┬───────┘    i     └──────┬───────┘                  │
//! │         │ decoder                 │ bounded queues           │
//! │         ▼                         ▼                          │
//! │  ┌──────────────┐          ┌──────────────┐                  │
//! │  │ /dev/ttyUSB0 │          │GatewayServer │──▶ HTTP clients  │
//! │  │  file, fifo  │          │ (axum)       │                  │
//! │  └──────────────┘          └──────────────┘                  │
//! │                                                              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod config;
pub mod decoder;
pub mod monitor;
pub mod registry;
pub mod server;
pub mod source;
pub mod stream;
