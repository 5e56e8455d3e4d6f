//! Link configuration.
//!
//! Defaults reproduce the reference WiNoT deployment: one access point on
//! access address `0x63683332`, channel 35, 1M PHY. Host runs can load a
//! [`LinkConfig`] from JSON.
//!
//! # Example
//!
//! ```
//! use winot::LinkConfig;
//!
//! let config = LinkConfig::from_json(r#"{ "channel": 12, "client_timeout_ms": 5000 }"#).unwrap();
//! assert_eq!(config.channel, 12);
//! assert_eq!(config.access_address, winot::WINOT_AP_ACCESSADDRESS);
//! ```

use crate::radio::{PhyRate, RadioTarget};
use serde::Deserialize;
use std::fmt;
use std::path::Path;

/// Access address the access point listens on.
pub const WINOT_AP_ACCESSADDRESS: u32 = 0x6368_3332;

/// Radio channel the access point listens on.
pub const WINOT_AP_CHANNEL: u8 = 35;

/// Maximum number of clients tracked by an access point.
pub const WINOT_AP_CLIENTS_MAX: usize = 32;

/// Payload bytes carried per radio fragment.
pub const WINOT_FRAGMENT_SIZE: usize = 250;

/// Reassembly buffer capacity. Fits an Ethernet MTU plus header.
pub const WINOT_DATA_BUF_SIZE: usize = 1600;

/// Highest usable radio channel.
pub const MAX_CHANNEL: u8 = 39;

/// Transmit power range accepted by the radio, in dBm.
pub const TX_POWER_RANGE: std::ops::RangeInclusive<i8> = -20..=7;

/// Configuration of one WiNoT link endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkConfig {
    /// Radio access address (logical network identifier).
    pub access_address: u32,
    /// Radio channel.
    pub channel: u8,
    /// PHY rate used for both directions.
    pub phy_rate: PhyRate,
    /// Transmit power in dBm.
    pub tx_power: i8,
    /// A join not completed by a tick within this window is discarded.
    pub negotiation_timeout_ms: u32,
    /// Clients silent for longer than this are evicted.
    pub client_timeout_ms: u32,
    /// The liveness table is scanned every this many ticks.
    pub liveness_scan_interval_ticks: u32,
    /// Declared payload length a client announces in its join request.
    pub join_declared_len: u8,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            access_address: WINOT_AP_ACCESSADDRESS,
            channel: WINOT_AP_CHANNEL,
            phy_rate: PhyRate::Phy1M,
            tx_power: 0,
            negotiation_timeout_ms: 50,
            client_timeout_ms: 30_000,
            liveness_scan_interval_ticks: 100,
            join_declared_len: WINOT_FRAGMENT_SIZE as u8,
        }
    }
}

impl LinkConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::InvalidFormat(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    /// Where the link listens and transmits.
    pub fn radio_target(&self) -> RadioTarget {
        RadioTarget {
            access_address: self.access_address,
            channel: self.channel,
            phy_rate: self.phy_rate,
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel > MAX_CHANNEL {
            return Err(ConfigError::ChannelOutOfRange {
                channel: self.channel,
                max: MAX_CHANNEL,
            });
        }
        if !TX_POWER_RANGE.contains(&self.tx_power) {
            return Err(ConfigError::TxPowerOutOfRange(self.tx_power));
        }
        if self.negotiation_timeout_ms == 0 {
            return Err(ConfigError::ZeroValue("negotiation_timeout_ms"));
        }
        if self.client_timeout_ms == 0 {
            return Err(ConfigError::ZeroValue("client_timeout_ms"));
        }
        if self.liveness_scan_interval_ticks == 0 {
            return Err(ConfigError::ZeroValue("liveness_scan_interval_ticks"));
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Channel above the highest radio channel.
    ChannelOutOfRange { channel: u8, max: u8 },
    /// Transmit power outside the radio's range.
    TxPowerOutOfRange(i8),
    /// A field that must be non-zero was zero.
    ZeroValue(&'static str),
    /// The configuration file could not be parsed.
    InvalidFormat(String),
    /// The configuration file could not be read.
    Io(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChannelOutOfRange { channel, max } => {
                write!(f, "channel {} out of range (max {})", channel, max)
            }
            Self::TxPowerOutOfRange(p) => write!(
                f,
                "tx power {} dBm outside {}..={} dBm",
                p,
                TX_POWER_RANGE.start(),
                TX_POWER_RANGE.end()
            ),
            Self::ZeroValue(field) => write!(f, "{} must be > 0", field),
            Self::InvalidFormat(msg) => write!(f, "invalid config format: {}", msg),
            Self::Io(msg) => write!(f, "cannot read config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_reference_deployment() {
        let config = LinkConfig::default();
        assert_eq!(config.access_address, 0x6368_3332);
        assert_eq!(config.channel, 35);
        assert_eq!(config.phy_rate, PhyRate::Phy1M);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config = LinkConfig::from_json(r#"{"tx_power": 5, "phy_rate": "2M"}"#).unwrap();
        assert_eq!(config.tx_power, 5);
        assert_eq!(config.phy_rate, PhyRate::Phy2M);
        assert_eq!(config.channel, WINOT_AP_CHANNEL);
    }

    #[test]
    fn test_from_json_rejects_unknown_field() {
        let err = LinkConfig::from_json(r#"{"chanel": 3}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFormat(_)));
    }

    #[test]
    fn test_validate_channel() {
        let config = LinkConfig {
            channel: 40,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ChannelOutOfRange {
                channel: 40,
                max: MAX_CHANNEL
            })
        );
    }

    #[test]
    fn test_validate_tx_power() {
        let config = LinkConfig {
            tx_power: 20,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::TxPowerOutOfRange(20)));
    }

    #[test]
    fn test_validate_zero_timeouts() {
        let config = LinkConfig {
            client_timeout_ms: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroValue("client_timeout_ms"))
        );

        let config = LinkConfig {
            liveness_scan_interval_ticks: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = LinkConfig::load("/nonexistent/winot.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
        assert!(err.to_string().contains("winot.json"));
    }
}
