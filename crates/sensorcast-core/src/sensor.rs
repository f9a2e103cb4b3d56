//! Sensor naming.

use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Characters that carry meaning in sensor specs or URL paths.
const RESERVED_CHARS: &[char] = &['+', ':', ',', '/', '?', '#'];

/// Name of a logical sensor channel (e.g. `touch`, `sound`).
///
/// Names appear as URL path segments and inside sensor specs, so they
/// must be non-empty and free of whitespace and spec separators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SensorName(String);

impl SensorName {
    /// Validates and wraps a sensor name.
    pub fn new(name: impl Into<String>) -> DomainResult<Self> {
        let name = name.into();

        if name.is_empty() {
            return Err(DomainError::InvalidSensorName {
                name,
                reason: "name is empty".to_string(),
            });
        }

        if let Some(c) = name
            .chars()
            .find(|c| c.is_whitespace() || RESERVED_CHARS.contains(c))
        {
            return Err(DomainError::InvalidSensorName {
                reason: format!("contains reserved character {c:?}"),
                name,
            });
        }

        Ok(Self(name))
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SensorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SensorName {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for SensorName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SensorName> for String {
    fn from(name: SensorName) -> Self {
        name.0
    }
}

impl Borrow<str> for SensorName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for SensorName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
