// src/battery.rs - Battery identity records and bus identification
use crate::config::Config;
use crate::error::{DriverError, Result};
use crate::modbus::SharedBus;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Register holding the 4-hex-digit firmware version, outside the
/// polled status window.
const FIRMWARE_VERSION_REGISTER: u16 = 1054;

/// Identity string pattern: hardware code "48TL" + capacity digits,
/// whitespace, free-text BMS version tail.
static IDENTITY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<hw>48TL(?P<ah>\d+)) *(?P<bms>.*)$").unwrap());

/// Hardware and firmware specs of one battery unit.
///
/// Created once during identification and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Battery {
    /// Bus address the unit answers on
    pub address: u8,
    /// Identity code, e.g. "48TL100"
    pub hardware_version: String,
    /// 4-hex-digit code read from the firmware register
    pub firmware_version: String,
    /// Trailing token of the identity string
    pub bms_version: String,
    /// Capacity in ampere-hours, parsed from the identity code
    pub ampere_hours: u16,
}

impl fmt::Display for Battery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "slave address = {}\nhardware version = {}\nfirmware version = {}\nbms version = {}\nampere hours = {}",
            self.address,
            self.hardware_version,
            self.firmware_version,
            self.bms_version,
            self.ampere_hours
        )
    }
}

/// One battery's raw register window, captured in a single poll cycle.
///
/// Index 0 corresponds to the configured base address; decoders address
/// registers absolutely and [`BatteryStatus::word`] translates and
/// bounds-checks.
#[derive(Debug, Clone)]
pub struct BatteryStatus {
    /// The unit this window was read from
    pub battery: Arc<Battery>,
    registers: Vec<u16>,
    base_address: u16,
}

impl BatteryStatus {
    /// Wrap a freshly read register window.
    pub fn new(battery: Arc<Battery>, registers: Vec<u16>, base_address: u16) -> Self {
        Self {
            battery,
            registers,
            base_address,
        }
    }

    /// The raw word at an absolute register address.
    pub fn word(&self, register: u16) -> Result<u16> {
        let index = register
            .checked_sub(self.base_address)
            .map(usize::from)
            .filter(|i| *i < self.registers.len());
        match index {
            Some(i) => Ok(self.registers[i]),
            None => Err(DriverError::RegisterOutOfRange {
                register,
                base: self.base_address,
                count: self.registers.len() as u16,
            }),
        }
    }

    /// A slice of `count` raw words starting at an absolute register address.
    pub fn words(&self, register: u16, count: u16) -> Result<&[u16]> {
        let start = register.checked_sub(self.base_address).map(usize::from);
        let end = start.map(|s| s + usize::from(count));
        match (start, end) {
            (Some(s), Some(e)) if e <= self.registers.len() => Ok(&self.registers[s..e]),
            _ => Err(DriverError::RegisterOutOfRange {
                register,
                base: self.base_address,
                count: self.registers.len() as u16,
            }),
        }
    }
}

/// Parse a cleaned identity string into (hardware code, bms version, ampere hours).
pub fn parse_identity(identity: &str) -> Option<(String, String, u16)> {
    let caps = IDENTITY_PATTERN.captures(identity)?;
    let ah = caps.name("ah")?.as_str().parse().ok()?;
    Some((caps["hw"].to_string(), caps["bms"].to_string(), ah))
}

/// Drop everything outside printable ASCII; the units pad their identity
/// strings with control characters.
pub fn strip_nonprintable(raw: &str) -> String {
    raw.chars().filter(|c| (' '..='~').contains(c)).collect()
}

async fn read_firmware_version(bus: &SharedBus, unit: u8) -> Result<String> {
    debug!("reading firmware version from unit {}", unit);
    let mut client = bus.lock().await;
    let words = client
        .read_registers(unit, FIRMWARE_VERSION_REGISTER, 1)
        .await?;
    Ok(format!("{:0>4X}", words[0]))
}

async fn identify_battery(bus: &SharedBus, unit: u8) -> Result<Battery> {
    let raw = {
        let mut client = bus.lock().await;
        debug!("requesting slave id from unit {}", unit);
        client.report_slave_id(unit).await?
    };

    let identity = strip_nonprintable(&raw);
    let (hardware_version, bms_version, ampere_hours) =
        parse_identity(&identity).ok_or_else(|| DriverError::Identify {
            unit,
            reason: format!("no known battery behind identity string '{}'", identity),
        })?;

    let firmware_version = read_firmware_version(bus, unit).await?;

    let specs = Battery {
        address: unit,
        hardware_version,
        firmware_version,
        bms_version,
        ampere_hours,
    };
    info!("battery identified:\n{}", specs);
    Ok(specs)
}

/// Probe every address in the configured scan range, in ascending order,
/// and return the units that answered with a known identity string.
///
/// A failure at one address is logged and skipped; it is not fatal to the
/// scan. An empty result is fatal to the service, but that decision
/// belongs to the caller.
pub async fn identify_batteries(bus: &SharedBus, config: &Config) -> Vec<Battery> {
    let mut batteries = Vec::new();
    for unit in config.scan_range() {
        match identify_battery(bus, unit).await {
            Ok(battery) => batteries.push(battery),
            Err(e) => info!("failed to identify battery at {}: {}", unit, e),
        }
    }
    batteries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn battery() -> Arc<Battery> {
        Arc::new(Battery {
            address: 2,
            hardware_version: "48TL100".into(),
            firmware_version: "0208".into(),
            bms_version: "BMSv2.1".into(),
            ampere_hours: 100,
        })
    }

    #[test]
    fn test_parse_identity() {
        let (hw, bms, ah) = parse_identity("48TL100 BMSv2.1").unwrap();
        assert_eq!(hw, "48TL100");
        assert_eq!(bms, "BMSv2.1");
        assert_eq!(ah, 100);
    }

    #[test]
    fn test_parse_identity_no_bms_tail() {
        let (hw, bms, ah) = parse_identity("48TL200").unwrap();
        assert_eq!(hw, "48TL200");
        assert_eq!(bms, "");
        assert_eq!(ah, 200);
    }

    #[test]
    fn test_parse_identity_rejects_unknown_prefix() {
        assert!(parse_identity("52TL100 BMSv2.1").is_none());
        assert!(parse_identity("garbage").is_none());
        assert!(parse_identity("").is_none());
    }

    #[test]
    fn test_strip_nonprintable() {
        assert_eq!(strip_nonprintable("\x0048TL100\x07 BMSv2.1\x1f"), "48TL100 BMSv2.1");
    }

    #[test]
    fn test_status_window_bounds() {
        let status = BatteryStatus::new(battery(), vec![1, 2, 3], 999);
        assert_eq!(status.word(999).unwrap(), 1);
        assert_eq!(status.word(1001).unwrap(), 3);
        assert!(matches!(
            status.word(1002),
            Err(DriverError::RegisterOutOfRange { register: 1002, .. })
        ));
        // addresses below the base must not wrap around
        assert!(status.word(998).is_err());
        assert_eq!(status.words(1000, 2).unwrap(), &[2, 3]);
        assert!(status.words(1000, 3).is_err());
    }
}
