// src/config.rs - Driver configuration with YAML support
//
// Defaults match the 48TL protocol document and the RS-485 wiring used by
// the battery cabinets; a YAML file only needs to name the fields it
// overrides.

use crate::error::{DriverError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main driver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// RS-485 line settings
    #[serde(default)]
    pub serial: SerialConfig,

    /// Register window and scan range
    #[serde(default)]
    pub bus: BusConfig,

    /// Polling and publishing behaviour
    #[serde(default)]
    pub driver: DriverConfig,

    /// Static identity and configuration bounds reported on the process bus
    #[serde(default)]
    pub identity: IdentityConfig,
}

/// RS-485 line settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Parity: "none", "even" or "odd"
    #[serde(default = "default_parity")]
    pub parity: String,
    /// Stop bits (1 or 2)
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    /// Data bits (5..=8)
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    /// Per-request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Register window and scan range
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// First register of the status window
    #[serde(default = "default_base_address")]
    pub base_address: u16,
    /// Number of registers in the status window
    #[serde(default = "default_register_count")]
    pub register_count: u16,
    /// Highest slave address probed during identification;
    /// the scan covers addresses 2..=max_slave_address+1
    #[serde(default = "default_max_slave_address")]
    pub max_slave_address: u8,
}

/// How often to poll and how to group batteries for publishing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Poll interval in milliseconds; the watchdog runs at twice this
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Publish each battery under its own service, or the fleet as one
    #[serde(default)]
    pub publish: PublishMode,
}

/// Publishing granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishMode {
    /// One publisher per battery (one service per unit)
    #[default]
    PerUnit,
    /// One publisher aggregating the whole fleet
    Fleet,
}

/// Static identity values and configuration bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Product name reported under /ProductName
    #[serde(default = "default_product_name")]
    pub product_name: String,
    /// Product id reported under /ProductId
    #[serde(default = "default_product_id")]
    pub product_id: u16,
    /// Base device instance; per-unit services add their battery index
    #[serde(default = "default_device_instance")]
    pub device_instance: i64,
    /// Connection description reported under /Mgmt/Connection
    #[serde(default = "default_connection")]
    pub connection: String,
    /// Upper charge voltage bound in volts (protocol doc page 7)
    #[serde(default = "default_max_charge_voltage")]
    pub max_charge_voltage: f64,
    /// Lower battery voltage bound in volts
    #[serde(default = "default_min_battery_voltage")]
    pub min_battery_voltage: f64,
}

fn default_baud_rate() -> u32 {
    115_200
}
fn default_parity() -> String {
    "none".into()
}
fn default_stop_bits() -> u8 {
    2
}
fn default_data_bits() -> u8 {
    8
}
fn default_timeout_ms() -> u64 {
    200
}
fn default_base_address() -> u16 {
    999
}
fn default_register_count() -> u16 {
    56
}
fn default_max_slave_address() -> u8 {
    10
}
fn default_poll_interval_ms() -> u64 {
    2000
}
fn default_product_name() -> String {
    "FIAMM 48TL Series Battery".into()
}
fn default_product_id() -> u16 {
    0xB012
}
fn default_device_instance() -> i64 {
    1
}
fn default_connection() -> String {
    "Modbus RTU".into()
}
fn default_max_charge_voltage() -> f64 {
    56.0
}
fn default_min_battery_voltage() -> f64 {
    42.0
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            parity: default_parity(),
            stop_bits: default_stop_bits(),
            data_bits: default_data_bits(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            base_address: default_base_address(),
            register_count: default_register_count(),
            max_slave_address: default_max_slave_address(),
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            publish: PublishMode::default(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            product_name: default_product_name(),
            product_id: default_product_id(),
            device_instance: default_device_instance(),
            connection: default_connection(),
            max_charge_voltage: default_max_charge_voltage(),
            min_battery_voltage: default_min_battery_voltage(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            bus: BusConfig::default(),
            driver: DriverConfig::default(),
            identity: IdentityConfig::default(),
        }
    }
}

impl Config {
    /// Load and validate a configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    /// Parse and validate a configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the driver cannot work with
    pub fn validate(&self) -> Result<()> {
        match self.serial.parity.as_str() {
            "none" | "even" | "odd" => {}
            other => {
                return Err(DriverError::Config(format!(
                    "invalid parity '{}', expected none/even/odd",
                    other
                )));
            }
        }
        if !(1..=2).contains(&self.serial.stop_bits) {
            return Err(DriverError::Config(format!(
                "invalid stop bits {}",
                self.serial.stop_bits
            )));
        }
        if !(5..=8).contains(&self.serial.data_bits) {
            return Err(DriverError::Config(format!(
                "invalid data bits {}",
                self.serial.data_bits
            )));
        }
        if self.bus.register_count == 0 {
            return Err(DriverError::Config("register window is empty".into()));
        }
        if self.bus.max_slave_address < 1 || self.bus.max_slave_address > 246 {
            return Err(DriverError::Config(format!(
                "max slave address {} out of range",
                self.bus.max_slave_address
            )));
        }
        if self.driver.poll_interval_ms == 0 {
            return Err(DriverError::Config("poll interval must be non-zero".into()));
        }
        Ok(())
    }

    /// Ascending, inclusive address range scanned during identification
    pub fn scan_range(&self) -> std::ops::RangeInclusive<u8> {
        2..=self.bus.max_slave_address + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol_doc() {
        let config = Config::default();
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.serial.stop_bits, 2);
        assert_eq!(config.bus.base_address, 999);
        assert_eq!(config.bus.register_count, 56);
        assert_eq!(config.driver.poll_interval_ms, 2000);
        assert_eq!(config.identity.product_id, 0xB012);
        assert_eq!(config.scan_range(), 2..=11);
        config.validate().unwrap();
    }

    #[test]
    fn test_yaml_overrides() {
        let config = Config::from_yaml(
            r#"
serial:
  baud_rate: 9600
driver:
  poll_interval_ms: 500
  publish: fleet
"#,
        )
        .unwrap();
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.driver.poll_interval_ms, 500);
        assert_eq!(config.driver.publish, PublishMode::Fleet);
        // untouched sections keep their defaults
        assert_eq!(config.bus.register_count, 56);
    }

    #[test]
    fn test_validation_rejects_bad_parity() {
        let result = Config::from_yaml("serial:\n  parity: mark\n");
        assert!(matches!(result, Err(DriverError::Config(_))));
    }
}
