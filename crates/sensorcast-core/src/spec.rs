//! Sensor specs: which sensors share a source, and how it is decoded.
//!
//! A spec names one physical source, the sensors that share it, and the
//! decoder that splits its byte stream into readings:
//!
//! ```text
//! touch+sound:/dev/ttyUSB0:readings-per-line
//! ─────┬───── ──────┬───── ────────┬────────
//!   sensors      source         decoder
//! ```
//!
//! The sensor list ends at the first `:` and the decoder starts after the
//! last one, so the source path itself may contain colons.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::sensor::SensorName;

/// Separator between sensor names sharing one source.
pub const SENSOR_SEPARATOR: char = '+';

/// Separator between the three spec fields.
pub const FIELD_SEPARATOR: char = ':';

/// The built-in decoders, selected once at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecoderKind {
    /// One line per unit, comma separated integers, one per sensor.
    ReadingsPerLine,

    /// One byte per unit, a single reading.
    Bytes,
}

impl DecoderKind {
    /// All decoders, in the order they are listed in help and errors.
    pub const ALL: [DecoderKind; 2] = [DecoderKind::ReadingsPerLine, DecoderKind::Bytes];

    /// Returns the configuration name of this decoder.
    pub fn as_str(&self) -> &'static str {
        match self {
            DecoderKind::ReadingsPerLine => "readings-per-line",
            DecoderKind::Bytes => "bytes",
        }
    }

    /// Number of readings each decoded unit carries, if fixed.
    ///
    /// `None` means the arity is taken from the data itself.
    pub fn fixed_arity(&self) -> Option<usize> {
        match self {
            DecoderKind::ReadingsPerLine => None,
            DecoderKind::Bytes => Some(1),
        }
    }
}

impl fmt::Display for DecoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DecoderKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DecoderKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| DomainError::UnknownDecoder {
                name: s.to_string(),
                expected: DecoderKind::ALL
                    .iter()
                    .map(DecoderKind::as_str)
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

/// One physical source with the ordered sensors it feeds.
///
/// Parsed once at startup and never mutated. Position `i` of every
/// decoded unit belongs to `sensors()[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorSpec {
    sensors: Vec<SensorName>,
    source: PathBuf,
    decoder: DecoderKind,
}

impl SensorSpec {
    /// Builds a spec from parts, validating the sensor list.
    pub fn new(
        sensors: Vec<SensorName>,
        source: impl Into<PathBuf>,
        decoder: DecoderKind,
    ) -> DomainResult<Self> {
        let source = source.into();
        let describe = || {
            let names: Vec<&str> = sensors.iter().map(SensorName::as_str).collect();
            format!("{}:{}:{}", names.join("+"), source.display(), decoder)
        };

        if sensors.is_empty() {
            return Err(DomainError::MalformedSpec {
                spec: describe(),
                reason: "no sensors listed".to_string(),
            });
        }

        if source.as_os_str().is_empty() {
            return Err(DomainError::MalformedSpec {
                spec: describe(),
                reason: "source path is empty".to_string(),
            });
        }

        let mut seen = HashSet::new();
        if let Some(dup) = sensors.iter().find(|name| !seen.insert(*name)) {
            return Err(DomainError::MalformedSpec {
                spec: describe(),
                reason: format!("sensor '{dup}' listed twice"),
            });
        }

        if let Some(arity) = decoder.fixed_arity() {
            if sensors.len() > arity {
                return Err(DomainError::DecoderArity {
                    decoder: decoder.to_string(),
                    arity,
                    sensors: sensors.len(),
                });
            }
        }

        Ok(Self {
            sensors,
            source,
            decoder,
        })
    }

    /// Sensors fed by this source, in tuple position order.
    pub fn sensors(&self) -> &[SensorName] {
        &self.sensors
    }

    /// Path of the physical source.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Decoder applied to the source's byte stream.
    pub fn decoder(&self) -> DecoderKind {
        self.decoder
    }
}

impl fmt::Display for SensorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, name) in self.sensors.iter().enumerate() {
            if i > 0 {
                write!(f, "{SENSOR_SEPARATOR}")?;
            }
            write!(f, "{name}")?;
        }
        write!(
            f,
            "{FIELD_SEPARATOR}{}{FIELD_SEPARATOR}{}",
            self.source.display(),
            self.decoder
        )
    }
}

impl FromStr for SensorSpec {
    type Err = DomainError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let spec = spec.trim();
        let malformed = |reason: &str| DomainError::MalformedSpec {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };

        let (sensors, rest) = spec
            .split_once(FIELD_SEPARATOR)
            .ok_or_else(|| malformed("expected sensors:path:decoder"))?;
        let (path, decoder) = rest
            .rsplit_once(FIELD_SEPARATOR)
            .ok_or_else(|| malformed("expected sensors:path:decoder"))?;

        let sensors = sensors
            .split(SENSOR_SEPARATOR)
            .map(SensorName::new)
            .collect::<DomainResult<Vec<_>>>()?;
        let decoder = decoder.parse::<DecoderKind>()?;

        Self::new(sensors, path, decoder)
    }
}
