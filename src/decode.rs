// src/decode.rs - Register decoder library
//
// Pure, stateless decoders over one battery's register window. Each
// decoder is a small descriptor struct holding the protocol parameters
// (register, bit, scale factor, ...) fixed at registry-construction time,
// and implementing a uniform [`RegisterReader`] interface. Parameters use
// the same names as the 'T48TLxxx ModBus Protocol Rev.7.1' document.

use crate::battery::BatteryStatus;
use crate::error::{DriverError, Result};
use crate::value::{AlarmLevel, LedState, Value};
use std::cmp::Ordering;
use tracing::warn;

/// Extract one datum from a battery's register window.
///
/// Implementors are either computed (read from the window) or constant;
/// [`RegisterReader::constant`] lets the publisher seed a path with the
/// value before the first poll cycle.
pub trait RegisterReader: Send + Sync {
    /// Decode the datum from one battery's status.
    fn read(&self, status: &BatteryStatus) -> Result<Value>;

    /// The fixed value, if this reader does not depend on the window.
    fn constant(&self) -> Option<Value> {
        None
    }
}

/// A fixed value, independent of any register.
pub struct Constant(pub Value);

impl RegisterReader for Constant {
    fn read(&self, _status: &BatteryStatus) -> Result<Value> {
        Ok(self.0.clone())
    }

    fn constant(&self) -> Option<Value> {
        Some(self.0.clone())
    }
}

/// Single status bit within one register, bit 0..=15.
pub struct ReadBool {
    /// Holding register number
    pub register: u16,
    /// Bit index within the register, 0..=15
    pub bit: u8,
}

impl RegisterReader for ReadBool {
    fn read(&self, status: &BatteryStatus) -> Result<Value> {
        let word = status.word(self.register)?;
        Ok(Value::Bool(word & (1 << self.bit) != 0))
    }
}

/// Two-level alarm derived from a warning bit and an alarm bit.
///
/// Bit indices may exceed 15: consecutive registers form one contiguous
/// bit field, addressed as `register + bit / 16`, `bit % 16`.
pub struct ReadAlarm {
    warn_reg: u16,
    warn_bit: u8,
    alarm_reg: u16,
    alarm_bit: u8,
}

impl ReadAlarm {
    /// Bind a warn/alarm trigger-bit pair from the vendor protocol table.
    pub fn new(warn_reg: u16, warn_bit: u8, alarm_reg: u16, alarm_bit: u8) -> Self {
        // bits spanning more than 3 registers past their base have never
        // been seen in the protocol table; most likely a typo there
        if warn_bit >= 48 || alarm_bit >= 48 {
            warn!(
                "suspicious alarm bit index (warn {}/{}, alarm {}/{})",
                warn_reg, warn_bit, alarm_reg, alarm_bit
            );
        }
        Self {
            warn_reg,
            warn_bit,
            alarm_reg,
            alarm_bit,
        }
    }

    fn bit_set(status: &BatteryStatus, register: u16, bit: u8) -> Result<bool> {
        let word = status.word(register + u16::from(bit) / 16)?;
        Ok(word & (1 << (bit % 16)) != 0)
    }
}

impl RegisterReader for ReadAlarm {
    fn read(&self, status: &BatteryStatus) -> Result<Value> {
        let warning = Self::bit_set(status, self.warn_reg, self.warn_bit)?;
        let alarm = Self::bit_set(status, self.alarm_reg, self.alarm_bit)?;
        // alarm dominates warning regardless of the warning bit
        let level = if alarm {
            AlarmLevel::Alarm
        } else if warning {
            AlarmLevel::Warning
        } else {
            AlarmLevel::Ok
        };
        Ok(Value::Alarm(level))
    }
}

/// Scaled measurement stored as a sign-offset 16-bit word.
pub struct ReadFloat {
    /// Holding register number
    pub register: u16,
    /// Applied after the offset
    pub scale_factor: f64,
    /// Added to the sign-corrected raw value
    pub offset: f64,
}

impl ReadFloat {
    fn value(&self, status: &BatteryStatus) -> Result<f64> {
        let raw = i32::from(status.word(self.register)?);
        // the vendor stores negative magnitudes sign-offset, not two's
        // complement; this must stay exactly as the protocol defines it
        let signed = if raw >= 0x8000 { raw - 0x10000 } else { raw };
        Ok((f64::from(signed) + self.offset) * self.scale_factor)
    }
}

impl RegisterReader for ReadFloat {
    fn read(&self, status: &BatteryStatus) -> Result<Value> {
        Ok(Value::Float(self.value(status)?))
    }
}

/// Opaque diagnostic dump: `count` consecutive words rendered as 4-digit
/// uppercase hex, space-joined, in register order.
pub struct ReadHexString {
    /// First holding register of the dump
    pub register: u16,
    /// Number of consecutive words
    pub count: u16,
}

impl RegisterReader for ReadHexString {
    fn read(&self, status: &BatteryStatus) -> Result<Value> {
        let words = status.words(self.register, self.count)?;
        let text = words
            .iter()
            .map(|w| format!("{:0>4X}", w))
            .collect::<Vec<_>>()
            .join(" ");
        Ok(Value::Text(text))
    }
}

/// One front-panel LED; identifies which 2-bit pair of the LED register
/// belongs to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum LedColor {
    Green = 0,
    Amber = 1,
    Blue = 2,
    Red = 3,
}

/// LED state from the 2-bit combination `{2*led, 2*led+1}`.
pub struct ReadLedState {
    /// The LED status register
    pub register: u16,
    /// Which LED to extract
    pub led: LedColor,
}

impl RegisterReader for ReadLedState {
    fn read(&self, status: &BatteryStatus) -> Result<Value> {
        let word = status.word(self.register)?;
        let lo = word & (1 << (2 * self.led as u8)) != 0;
        let hi = word & (1 << (2 * self.led as u8 + 1)) != 0;
        let state = match (hi, lo) {
            (false, false) => LedState::Off,
            (false, true) => LedState::On,
            (true, false) => LedState::BlinkSlow,
            (true, true) => LedState::BlinkFast,
        };
        Ok(Value::Led(state))
    }
}

/// Per-unit DC power: `int(current * voltage)`, computed per unit before
/// any aggregation so the fleet power is the sum of per-unit products.
pub struct ReadPower {
    /// DC voltage decoder
    pub voltage: ReadFloat,
    /// DC current decoder
    pub current: ReadFloat,
}

impl RegisterReader for ReadPower {
    fn read(&self, status: &BatteryStatus) -> Result<Value> {
        let power = self.current.value(status)? * self.voltage.value(status)?;
        Ok(Value::Int(power as i64))
    }
}

/// Capacity-derived charge/discharge current limit: ampere-hours / 2.
pub struct MaxCurrent;

impl RegisterReader for MaxCurrent {
    fn read(&self, status: &BatteryStatus) -> Result<Value> {
        Ok(Value::Int(i64::from(status.battery.ampere_hours) / 2))
    }
}

/// BMS version token from the identity record.
pub struct BmsVersion;

impl RegisterReader for BmsVersion {
    fn read(&self, status: &BatteryStatus) -> Result<Value> {
        Ok(Value::Text(status.battery.bms_version.clone()))
    }
}

/// Display-text converter attached to a published path.
#[derive(Debug, Clone, PartialEq)]
pub enum TextFormat {
    /// Generic stringification
    Plain,
    /// `"<value><suffix>"`, e.g. `56.0V`
    Unit(&'static str),
    /// Fixed text regardless of the value (discovered version strings,
    /// the product id in hex)
    Fixed(String),
}

impl TextFormat {
    /// Render a value for display.
    pub fn render(&self, value: &Value) -> String {
        match self {
            TextFormat::Plain => value.to_string(),
            TextFormat::Unit(suffix) => format!("{}{}", value, suffix),
            TextFormat::Fixed(text) => text.clone(),
        }
    }
}

/// Reduction of per-unit values into the one published value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    /// Arithmetic mean (voltages, temperatures, state of charge)
    Mean,
    /// Sum (currents, powers, current limits)
    Sum,
    /// First value in battery-list order (diagnostics, identity)
    First,
    /// Numeric minimum (configuration upper bounds)
    Min,
    /// Numeric maximum (configuration lower bounds, alarm severities)
    Max,
    /// True if any unit reports true (IO status bits)
    Any,
}

impl Aggregate {
    /// Reduce a non-empty sequence of same-typed values.
    pub fn apply(&self, values: &[Value]) -> Result<Value> {
        if values.is_empty() {
            return Err(DriverError::Aggregate("empty value sequence".into()));
        }
        match self {
            Aggregate::First => Ok(values[0].clone()),
            Aggregate::Any => Ok(Value::Bool(
                values.iter().any(|v| v.as_bool() == Some(true)),
            )),
            Aggregate::Mean => {
                let numbers = numeric(values)?;
                Ok(Value::Float(
                    numbers.iter().sum::<f64>() / numbers.len() as f64,
                ))
            }
            Aggregate::Sum => {
                if values.iter().all(|v| matches!(v, Value::Int(_))) {
                    Ok(Value::Int(values.iter().filter_map(Value::as_int).sum()))
                } else {
                    Ok(Value::Float(numeric(values)?.iter().sum()))
                }
            }
            Aggregate::Min => pick(values, Ordering::Less),
            Aggregate::Max => pick(values, Ordering::Greater),
        }
    }
}

fn numeric(values: &[Value]) -> Result<Vec<f64>> {
    values
        .iter()
        .map(|v| {
            v.as_float().ok_or_else(|| {
                DriverError::Aggregate(format!("cannot reduce {} value", v.type_name()))
            })
        })
        .collect()
}

/// Select the element whose numeric value compares `wanted` against all
/// others; returns the element itself, preserving its variant.
fn pick(values: &[Value], wanted: Ordering) -> Result<Value> {
    let mut best = &values[0];
    let mut best_num = numeric(std::slice::from_ref(best))?[0];
    for value in &values[1..] {
        let num = numeric(std::slice::from_ref(value))?[0];
        if num.partial_cmp(&best_num) == Some(wanted) {
            best = value;
            best_num = num;
        }
    }
    Ok(best.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battery::Battery;
    use std::sync::Arc;

    const BASE: u16 = 999;

    fn status_with(words: &[(u16, u16)]) -> BatteryStatus {
        let battery = Arc::new(Battery {
            address: 2,
            hardware_version: "48TL100".into(),
            firmware_version: "0208".into(),
            bms_version: "BMSv2.1".into(),
            ampere_hours: 100,
        });
        let mut registers = vec![0u16; 56];
        for (register, word) in words {
            registers[usize::from(register - BASE)] = *word;
        }
        BatteryStatus::new(battery, registers, BASE)
    }

    #[test]
    fn test_read_bool() {
        let status = status_with(&[(1013, 0b0100_0001)]);
        for bit in 0..16 {
            let reader = ReadBool {
                register: 1013,
                bit,
            };
            let expected = bit == 0 || bit == 6;
            assert_eq!(reader.read(&status).unwrap(), Value::Bool(expected));
        }
    }

    #[test]
    fn test_read_alarm_dominance() {
        let reader = ReadAlarm::new(1005, 6, 1009, 7);
        // neither bit
        let status = status_with(&[]);
        assert_eq!(reader.read(&status).unwrap(), Value::Alarm(AlarmLevel::Ok));
        // warning only
        let status = status_with(&[(1005, 1 << 6)]);
        assert_eq!(
            reader.read(&status).unwrap(),
            Value::Alarm(AlarmLevel::Warning)
        );
        // alarm only
        let status = status_with(&[(1009, 1 << 7)]);
        assert_eq!(
            reader.read(&status).unwrap(),
            Value::Alarm(AlarmLevel::Alarm)
        );
        // alarm dominates warning
        let status = status_with(&[(1005, 1 << 6), (1009, 1 << 7)]);
        assert_eq!(
            reader.read(&status).unwrap(),
            Value::Alarm(AlarmLevel::Alarm)
        );
    }

    #[test]
    fn test_read_alarm_register_spanning_bits() {
        // bit 32 lands in the register two past the base, bit 35 likewise
        let reader = ReadAlarm::new(1005, 32, 1005, 35);
        let status = status_with(&[(1007, 1 << 0)]);
        assert_eq!(
            reader.read(&status).unwrap(),
            Value::Alarm(AlarmLevel::Warning)
        );
        let status = status_with(&[(1007, 1 << 3)]);
        assert_eq!(
            reader.read(&status).unwrap(),
            Value::Alarm(AlarmLevel::Alarm)
        );
    }

    #[test]
    fn test_read_float_sign_offset() {
        let reader = ReadFloat {
            register: 1000,
            scale_factor: 1.0,
            offset: 0.0,
        };
        let status = status_with(&[(1000, 0x8000)]);
        assert_eq!(reader.read(&status).unwrap(), Value::Float(-32768.0));
        let status = status_with(&[(1000, 0x7FFF)]);
        assert_eq!(reader.read(&status).unwrap(), Value::Float(32767.0));
    }

    #[test]
    fn test_read_float_scale_and_offset_after_sign() {
        let reader = ReadFloat {
            register: 999,
            scale_factor: 0.01,
            offset: 0.0,
        };
        let status = status_with(&[(999, 5600)]);
        assert_eq!(reader.read(&status).unwrap(), Value::Float(56.0));

        // current encoding: offset -10000 applied before scaling
        let reader = ReadFloat {
            register: 1000,
            scale_factor: 0.01,
            offset: -10000.0,
        };
        let status = status_with(&[(1000, 11000)]);
        assert_eq!(reader.read(&status).unwrap(), Value::Float(10.0));
    }

    #[test]
    fn test_read_hex_string() {
        let reader = ReadHexString {
            register: 1005,
            count: 4,
        };
        let status = status_with(&[
            (1005, 0xDEAD),
            (1006, 0xBEEF),
            (1007, 0xDEAD),
            (1008, 0xBEEF),
        ]);
        assert_eq!(
            reader.read(&status).unwrap(),
            Value::Text("DEAD BEEF DEAD BEEF".into())
        );
    }

    #[test]
    fn test_read_led_state_combinations() {
        // green occupies bits 0-1, red bits 6-7
        let cases = [
            (0b00, LedState::Off),
            (0b01, LedState::On),
            (0b10, LedState::BlinkSlow),
            (0b11, LedState::BlinkFast),
        ];
        for (combo, expected) in cases {
            let status = status_with(&[(1004, combo << 6)]);
            let reader = ReadLedState {
                register: 1004,
                led: LedColor::Red,
            };
            assert_eq!(reader.read(&status).unwrap(), Value::Led(expected));
            // other LEDs stay off
            let reader = ReadLedState {
                register: 1004,
                led: LedColor::Green,
            };
            assert_eq!(reader.read(&status).unwrap(), Value::Led(LedState::Off));
        }
    }

    #[test]
    fn test_read_power_truncates_per_unit() {
        let reader = ReadPower {
            voltage: ReadFloat {
                register: 999,
                scale_factor: 0.01,
                offset: 0.0,
            },
            current: ReadFloat {
                register: 1000,
                scale_factor: 0.01,
                offset: -10000.0,
            },
        };
        // 50.0 V * 10.0 A
        let status = status_with(&[(999, 5000), (1000, 11000)]);
        assert_eq!(reader.read(&status).unwrap(), Value::Int(500));
    }

    #[test]
    fn test_max_current_halves_capacity() {
        let status = status_with(&[]);
        assert_eq!(MaxCurrent.read(&status).unwrap(), Value::Int(50));
    }

    #[test]
    fn test_constant_reader() {
        let reader = Constant(Value::Int(1));
        assert_eq!(reader.constant(), Some(Value::Int(1)));
        assert_eq!(reader.read(&status_with(&[])).unwrap(), Value::Int(1));
        assert_eq!(ReadBool { register: 999, bit: 0 }.constant(), None);
    }

    #[test]
    fn test_out_of_window_register_is_an_error() {
        let reader = ReadFloat {
            register: 1055,
            scale_factor: 1.0,
            offset: 0.0,
        };
        assert!(matches!(
            reader.read(&status_with(&[])),
            Err(DriverError::RegisterOutOfRange { register: 1055, .. })
        ));
    }

    #[test]
    fn test_aggregates() {
        assert_eq!(
            Aggregate::Mean
                .apply(&[Value::Float(48.0), Value::Float(52.0)])
                .unwrap(),
            Value::Float(50.0)
        );
        assert_eq!(
            Aggregate::Sum
                .apply(&[Value::Int(10), Value::Int(20), Value::Int(30)])
                .unwrap(),
            Value::Int(60)
        );
        assert_eq!(
            Aggregate::First
                .apply(&[Value::Int(1), Value::Int(2), Value::Int(3)])
                .unwrap(),
            Value::Int(1)
        );
        assert_eq!(
            Aggregate::Any
                .apply(&[Value::Bool(false), Value::Bool(true)])
                .unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            Aggregate::Max
                .apply(&[
                    Value::Alarm(AlarmLevel::Ok),
                    Value::Alarm(AlarmLevel::Warning),
                    Value::Alarm(AlarmLevel::Alarm),
                ])
                .unwrap(),
            Value::Alarm(AlarmLevel::Alarm)
        );
        assert_eq!(
            Aggregate::Min
                .apply(&[Value::Float(56.0), Value::Float(55.0)])
                .unwrap(),
            Value::Float(55.0)
        );
    }

    #[test]
    fn test_aggregate_singleton_sequences() {
        for aggregate in [
            Aggregate::Mean,
            Aggregate::Sum,
            Aggregate::First,
            Aggregate::Min,
            Aggregate::Max,
        ] {
            assert_eq!(
                aggregate.apply(&[Value::Float(48.0)]).unwrap(),
                Value::Float(48.0)
            );
        }
        assert_eq!(
            Aggregate::Any.apply(&[Value::Bool(false)]).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_aggregate_empty_is_an_error() {
        assert!(matches!(
            Aggregate::Mean.apply(&[]),
            Err(DriverError::Aggregate(_))
        ));
    }

    #[test]
    fn test_text_formats() {
        assert_eq!(TextFormat::Unit("V").render(&Value::Float(56.0)), "56.0V");
        assert_eq!(TextFormat::Plain.render(&Value::Int(3)), "3");
        assert_eq!(
            TextFormat::Fixed("0xb012".into()).render(&Value::Int(0xB012)),
            "0xb012"
        );
    }
}
