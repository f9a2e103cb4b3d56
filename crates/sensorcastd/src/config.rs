//! Daemon configuration.
//!
//! Settings come from an optional TOML file and from command line
//! overrides. Command line values win; sensor specs from both sources are
//! concatenated, file first.
//!
//! ```toml
//! port = 9000
//! bind = "0.0.0.0"
//! retry_backoff_ms = 100
//! baud_rate = 115200
//! subscriber_buffer = 256
//! sensors = [
//!     "touch+sound:/dev/ttyUSB0:readings-per-line",
//!     "imu:/dev/ttyUSB1:bytes",
//! ]
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use sensorcast_core::{DomainError, SensorSpec};

use crate::source::{DEFAULT_BAUD_RATE, DEFAULT_RETRY_BACKOFF};
use crate::stream::DEFAULT_SUBSCRIBER_BUFFER;

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 9000;

/// Default listen address.
pub const DEFAULT_BIND: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("Failed to parse config file {path}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid sensor spec: {0}")]
    Spec(#[from] DomainError),

    #[error("No sensors configured (use --sensors or the config file)")]
    NoSensors,

    #[error("Subscriber buffer must be at least 1")]
    ZeroBuffer,

    #[error("Baud rate must be at least 1")]
    ZeroBaudRate,
}

/// Contents of the TOML config file. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub port: Option<u16>,
    pub bind: Option<IpAddr>,
    pub retry_backoff_ms: Option<u64>,
    pub baud_rate: Option<u32>,
    pub subscriber_buffer: Option<usize>,
    pub sensors: Vec<String>,
}

impl FileConfig {
    /// Loads and parses a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::parse(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    /// Parses config file contents.
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub port: Option<u16>,
    pub bind: Option<IpAddr>,
    pub retry_backoff_ms: Option<u64>,
    pub baud_rate: Option<u32>,
    pub subscriber_buffer: Option<usize>,
    pub sensors: Vec<String>,
}

/// Fully resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub retry_backoff: Duration,
    pub baud_rate: u32,
    pub subscriber_buffer: usize,
    pub sensors: Vec<SensorSpec>,
}

impl RelayConfig {
    /// Merges file values and overrides, then validates the result.
    pub fn resolve(file: FileConfig, overrides: Overrides) -> Result<Self, ConfigError> {
        let sensors = file
            .sensors
            .iter()
            .chain(overrides.sensors.iter())
            .map(|spec| spec.parse::<SensorSpec>())
            .collect::<Result<Vec<_>, _>>()?;

        if sensors.is_empty() {
            return Err(ConfigError::NoSensors);
        }

        let subscriber_buffer = overrides
            .subscriber_buffer
            .or(file.subscriber_buffer)
            .unwrap_or(DEFAULT_SUBSCRIBER_BUFFER);
        if subscriber_buffer == 0 {
            return Err(ConfigError::ZeroBuffer);
        }

        let retry_backoff = overrides
            .retry_backoff_ms
            .or(file.retry_backoff_ms)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_RETRY_BACKOFF);

        let baud_rate = overrides
            .baud_rate
            .or(file.baud_rate)
            .unwrap_or(DEFAULT_BAUD_RATE);
        if baud_rate == 0 {
            return Err(ConfigError::ZeroBaudRate);
        }

        Ok(Self {
            bind: overrides.bind.or(file.bind).unwrap_or(DEFAULT_BIND),
            port: overrides.port.or(file.port).unwrap_or(DEFAULT_PORT),
            retry_backoff,
            baud_rate,
            subscriber_buffer,
            sensors,
        })
    }

    /// Address the HTTP gateway listens on.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overrides(sensors: &[&str]) -> Overrides {
        Overrides {
            sensors: sensors.iter().map(|s| s.to_string()).collect(),
            ..Overrides::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config =
            RelayConfig::resolve(FileConfig::default(), overrides(&["touch:/dev/stdin:bytes"]))
                .unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.bind, DEFAULT_BIND);
        assert_eq!(config.retry_backoff, Duration::from_millis(100));
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.subscriber_buffer, DEFAULT_SUBSCRIBER_BUFFER);
        assert_eq!(config.listen_addr().port(), 9000);
    }

    #[test]
    fn test_parse_file() {
        let file = FileConfig::parse(
            r#"
            port = 8080
            bind = "127.0.0.1"
            retry_backoff_ms = 250
            baud_rate = 57600
            subscriber_buffer = 16
            sensors = ["touch+sound:/dev/ttyUSB0:readings-per-line"]
            "#,
        )
        .unwrap();

        let config = RelayConfig::resolve(file, Overrides::default()).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.bind, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.retry_backoff, Duration::from_millis(250));
        assert_eq!(config.baud_rate, 57_600);
        assert_eq!(config.subscriber_buffer, 16);
        assert_eq!(config.sensors.len(), 1);
    }

    #[test]
    fn test_overrides_win_and_sensors_concatenate() {
        let file = FileConfig {
            port: Some(8080),
            sensors: vec!["touch:/dev/ttyUSB0:readings-per-line".to_string()],
            ..FileConfig::default()
        };
        let cli = Overrides {
            port: Some(9100),
            ..overrides(&["imu:/dev/ttyUSB1:bytes"])
        };

        let config = RelayConfig::resolve(file, cli).unwrap();
        assert_eq!(config.port, 9100);
        let names: Vec<String> = config
            .sensors
            .iter()
            .flat_map(|s| s.sensors().iter().map(|n| n.to_string()))
            .collect();
        assert_eq!(names, vec!["touch", "imu"]);
    }

    #[test]
    fn test_no_sensors_rejected() {
        assert!(matches!(
            RelayConfig::resolve(FileConfig::default(), Overrides::default()),
            Err(ConfigError::NoSensors)
        ));
    }

    #[test]
    fn test_bad_spec_rejected() {
        assert!(matches!(
            RelayConfig::resolve(FileConfig::default(), overrides(&["touch:/dev/x:morse"])),
            Err(ConfigError::Spec(_))
        ));
    }

    #[test]
    fn test_zero_buffer_rejected() {
        let cli = Overrides {
            subscriber_buffer: Some(0),
            ..overrides(&["touch:/dev/x:bytes"])
        };
        assert!(matches!(
            RelayConfig::resolve(FileConfig::default(), cli),
            Err(ConfigError::ZeroBuffer)
        ));
    }

    #[test]
    fn test_baud_rate_override_and_zero() {
        let file = FileConfig {
            baud_rate: Some(57_600),
            ..FileConfig::default()
        };
        let cli = Overrides {
            baud_rate: Some(9600),
            ..overrides(&["touch:/dev/ttyUSB0:readings-per-line"])
        };
        assert_eq!(RelayConfig::resolve(file, cli).unwrap().baud_rate, 9600);

        let cli = Overrides {
            baud_rate: Some(0),
            ..overrides(&["touch:/dev/ttyUSB0:readings-per-line"])
        };
        assert!(matches!(
            RelayConfig::resolve(FileConfig::default(), cli),
            Err(ConfigError::ZeroBaudRate)
        ));
    }

    #[test]
    fn test_unknown_file_key_rejected() {
        assert!(FileConfig::parse("prot = 1").is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = FileConfig::load(Path::new("/nonexistent/sensorcast.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
