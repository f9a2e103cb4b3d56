//! Sensor name to stream lookup.
//!
//! The registry is built once at startup from every configured
//! [`SensorSet`] and is read-only afterwards, so lookups take no lock.
//! Names are listed in configuration order.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use sensorcast_core::{SensorName, SensorSpec};

use crate::source::{self, ByteSource, SourceReader};
use crate::stream::{SensorStream, StreamStats, DEFAULT_SUBSCRIBER_BUFFER};

/// Errors from building or querying the registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Unknown sensor: {0}")]
    UnknownSensor(String),

    #[error("Sensor '{name}' is configured by both '{first}' and '{second}'")]
    DuplicateSensor {
        name: SensorName,
        first: String,
        second: String,
    },
}

/// One configured source together with the streams of its sensors.
#[derive(Debug, Clone)]
pub struct SensorSet {
    spec: SensorSpec,
    streams: Vec<SensorStream>,
}

impl SensorSet {
    /// Creates one stream per sensor of `spec`.
    pub fn new(spec: SensorSpec) -> Self {
        Self::with_buffer(spec, DEFAULT_SUBSCRIBER_BUFFER)
    }

    /// Creates the streams with a custom per-subscriber buffer.
    pub fn with_buffer(spec: SensorSpec, buffer: usize) -> Self {
        let streams = spec
            .sensors()
            .iter()
            .map(|name| SensorStream::with_buffer(name.clone(), buffer))
            .collect();
        Self { spec, streams }
    }

    /// Returns the sensor spec this set was built from.
    pub fn spec(&self) -> &SensorSpec {
        &self.spec
    }

    /// Streams in tuple position order.
    pub fn streams(&self) -> &[SensorStream] {
        &self.streams
    }

    /// Builds the reader for this set's source path. Serial devices are
    /// opened at `baud_rate`.
    pub fn reader(&self, baud_rate: u32) -> SourceReader {
        self.reader_for(source::source_for(self.spec.source(), baud_rate))
    }

    /// Builds a reader feeding this set's streams from `source`.
    pub fn reader_for(&self, source: Arc<dyn ByteSource>) -> SourceReader {
        SourceReader::new(source, self.spec.decoder(), self.streams.clone())
    }
}

/// Read-only mapping from sensor name to stream.
#[derive(Debug, Clone, Default)]
pub struct StreamRegistry {
    order: Vec<SensorName>,
    streams: HashMap<SensorName, SensorStream>,
}

impl StreamRegistry {
    /// Merges the streams of every set.
    ///
    /// # Errors
    ///
    /// - `RegistryError::DuplicateSensor` if two sets name the same sensor
    pub fn build<'a>(sets: impl IntoIterator<Item = &'a SensorSet>) -> Result<Self, RegistryError> {
        let mut registry = Self::default();
        let mut owners: HashMap<SensorName, String> = HashMap::new();

        for set in sets {
            let owner = set.spec().to_string();
            for stream in set.streams() {
                let name = stream.name().clone();
                if let Some(first) = owners.get(&name) {
                    return Err(RegistryError::DuplicateSensor {
                        name,
                        first: first.clone(),
                        second: owner,
                    });
                }
                owners.insert(name.clone(), owner.clone());
                registry.order.push(name.clone());
                registry.streams.insert(name, stream.clone());
            }
        }

        Ok(registry)
    }

    /// All sensor names in configuration order.
    pub fn sensor_names(&self) -> &[SensorName] {
        &self.order
    }

    /// Looks up the stream for `name`.
    ///
    /// # Errors
    ///
    /// - `RegistryError::UnknownSensor` if no sensor has that name
    pub fn lookup(&self, name: &str) -> Result<&SensorStream, RegistryError> {
        self.streams
            .get(name)
            .ok_or_else(|| RegistryError::UnknownSensor(name.to_string()))
    }

    /// Number of sensors.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if no sensors are configured.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Stats for every stream, in configuration order.
    pub fn stats(&self) -> Vec<(SensorName, StreamStats)> {
        self.order
            .iter()
            .filter_map(|name| {
                self.streams
                    .get(name)
                    .map(|stream| (name.clone(), stream.stats()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(spec: &str) -> SensorSet {
        SensorSet::new(spec.parse().unwrap())
    }

    #[test]
    fn test_names_in_configuration_order() {
        let sets = [
            set("touch+sound:/dev/ttyUSB0:readings-per-line"),
            set("imu:/dev/ttyUSB1:bytes"),
        ];
        let registry = StreamRegistry::build(&sets).unwrap();

        let names: Vec<&str> = registry.sensor_names().iter().map(|n| n.as_str()).collect();
        assert_eq!(names, vec!["touch", "sound", "imu"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_lookup_shares_stream_with_set() {
        let sets = [set("touch:/dev/x:readings-per-line")];
        let registry = StreamRegistry::build(&sets).unwrap();

        let mut sub = registry.lookup("touch").unwrap().subscribe();
        sets[0].streams()[0].publish(sensorcast_core::Reading::Value(3));
        assert_eq!(sub.try_recv(), Some(sensorcast_core::Reading::Value(3)));
    }

    #[test]
    fn test_reader_feeds_set_streams() {
        let set = set("touch+sound:/dev/ttyUSB0:readings-per-line");
        let reader = set.reader(9600);
        let names: Vec<&str> = reader.streams().iter().map(|s| s.name().as_str()).collect();
        assert_eq!(names, vec!["touch", "sound"]);
    }

    #[test]
    fn test_unknown_sensor() {
        let registry = StreamRegistry::build(&[set("touch:/dev/x:bytes")]).unwrap();
        assert_eq!(
            registry.lookup("sound").unwrap_err(),
            RegistryError::UnknownSensor("sound".to_string())
        );
    }

    #[test]
    fn test_duplicate_sensor_rejected() {
        let sets = [
            set("touch:/dev/ttyUSB0:readings-per-line"),
            set("touch:/dev/ttyUSB1:readings-per-line"),
        ];
        let err = StreamRegistry::build(&sets).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateSensor { .. }));
        assert!(err.to_string().contains("/dev/ttyUSB0"));
        assert!(err.to_string().contains("/dev/ttyUSB1"));
    }

    #[test]
    fn test_empty_registry() {
        let registry = StreamRegistry::build(std::iter::empty()).unwrap();
        assert!(registry.is_empty());
        assert!(registry.lookup("touch").is_err());
    }
}
