// src/registry.rs - The declarative signal table
//
// One entry per published path, binding the protocol knowledge (which
// register, which bits, which scale factor) to the cross-unit aggregator
// and the display formatter. Register and bit numbers follow the
// 'T48TLxxx ModBus Protocol Rev.7.1' document; keeping the whole table in
// one place lets the protocol knowledge be tested without any bus I/O.

use crate::battery::Battery;
use crate::config::Config;
use crate::decode::{
    Aggregate, BmsVersion, Constant, LedColor, MaxCurrent, ReadAlarm, ReadBool, ReadFloat,
    ReadHexString, ReadLedState, ReadPower, RegisterReader, TextFormat,
};
use crate::value::Value;

/// One registry entry: everything needed to handle a certain datum
/// published by the battery.
pub struct Signal {
    /// Unique output path on the process bus
    pub path: String,
    /// Per-unit decoder (or constant)
    pub reader: Box<dyn RegisterReader>,
    /// Cross-unit reduction
    pub aggregate: Aggregate,
    /// Display-text converter
    pub format: TextFormat,
}

impl Signal {
    fn new(path: &str, aggregate: Aggregate, reader: impl RegisterReader + 'static) -> Self {
        Self {
            path: path.to_string(),
            reader: Box::new(reader),
            aggregate,
            format: TextFormat::Plain,
        }
    }

    fn unit(mut self, suffix: &'static str) -> Self {
        self.format = TextFormat::Unit(suffix);
        self
    }

    fn text(mut self, fixed: impl Into<String>) -> Self {
        self.format = TextFormat::Fixed(fixed.into());
        self
    }
}

fn read_voltage() -> ReadFloat {
    ReadFloat {
        register: 999,
        scale_factor: 0.01,
        offset: 0.0,
    }
}

fn read_current() -> ReadFloat {
    ReadFloat {
        register: 1000,
        scale_factor: 0.01,
        offset: -10000.0,
    }
}

/// Build the full signal table for one published service.
///
/// `batteries` is the group this service covers (one unit in per-unit
/// mode, the fleet otherwise) and must be non-empty; `instance` is the
/// zero-based service index added to the configured device instance.
pub fn build_signals(config: &Config, batteries: &[Battery], instance: i64) -> Vec<Signal> {
    let lead = &batteries[0];
    let identity = &config.identity;

    let product_name = if batteries.len() > 1 {
        format!("{} x{}", identity.product_name, batteries.len())
    } else {
        identity.product_name.clone()
    };
    let product_id_hex = format!("0x{:04x}", identity.product_id);

    vec![
        Signal::new("/Dc/0/Voltage", Aggregate::Mean, read_voltage()).unit("V"),
        Signal::new("/Dc/0/Current", Aggregate::Sum, read_current()).unit("A"),
        Signal::new(
            "/Dc/0/Power",
            Aggregate::Sum,
            ReadPower {
                voltage: read_voltage(),
                current: read_current(),
            },
        )
        .unit("W"),
        Signal::new(
            "/BussVoltage",
            Aggregate::Mean,
            ReadFloat {
                register: 1001,
                scale_factor: 0.01,
                offset: 0.0,
            },
        )
        .unit("V"),
        Signal::new(
            "/Soc",
            Aggregate::Mean,
            ReadFloat {
                register: 1053,
                scale_factor: 0.1,
                offset: 0.0,
            },
        )
        .unit("%"),
        Signal::new(
            "/Dc/0/Temperature",
            Aggregate::Mean,
            ReadFloat {
                register: 1003,
                scale_factor: 0.1,
                offset: -400.0,
            },
        )
        .unit("°C"),
        Signal::new(
            "/Diagnostics/WarningFlags",
            Aggregate::First,
            ReadHexString {
                register: 1005,
                count: 4,
            },
        ),
        Signal::new(
            "/Diagnostics/AlarmFlags",
            Aggregate::First,
            ReadHexString {
                register: 1009,
                count: 4,
            },
        ),
        Signal::new("/Diagnostics/BmsVersion", Aggregate::First, BmsVersion),
        Signal::new(
            "/Diagnostics/LedStatus/Red",
            Aggregate::First,
            ReadLedState {
                register: 1004,
                led: LedColor::Red,
            },
        ),
        Signal::new(
            "/Diagnostics/LedStatus/Blue",
            Aggregate::First,
            ReadLedState {
                register: 1004,
                led: LedColor::Blue,
            },
        ),
        Signal::new(
            "/Diagnostics/LedStatus/Green",
            Aggregate::First,
            ReadLedState {
                register: 1004,
                led: LedColor::Green,
            },
        ),
        Signal::new(
            "/Diagnostics/LedStatus/Amber",
            Aggregate::First,
            ReadLedState {
                register: 1004,
                led: LedColor::Amber,
            },
        ),
        Signal::new(
            "/Diagnostics/IoStatus/MainSwitchClosed",
            Aggregate::Any,
            ReadBool { register: 1013, bit: 0 },
        ),
        Signal::new(
            "/Diagnostics/IoStatus/AlarmOutActive",
            Aggregate::Any,
            ReadBool { register: 1013, bit: 1 },
        ),
        Signal::new(
            "/Diagnostics/IoStatus/InternalFanActive",
            Aggregate::Any,
            ReadBool { register: 1013, bit: 2 },
        ),
        Signal::new(
            "/Diagnostics/IoStatus/VoltMeasurementAllowed",
            Aggregate::Any,
            ReadBool { register: 1013, bit: 3 },
        ),
        Signal::new(
            "/Diagnostics/IoStatus/AuxRelay",
            Aggregate::Any,
            ReadBool { register: 1013, bit: 4 },
        ),
        Signal::new(
            "/Diagnostics/IoStatus/RemoteState",
            Aggregate::Any,
            ReadBool { register: 1013, bit: 5 },
        ),
        Signal::new(
            "/Diagnostics/IoStatus/HeaterOn",
            Aggregate::Any,
            ReadBool { register: 1013, bit: 6 },
        ),
        // two-level alarms, warn/alarm trigger-bit pairs from the vendor table
        Signal::new("/Alarms/LowVoltage", Aggregate::Max, ReadAlarm::new(1005, 6, 1009, 7)),
        Signal::new("/Alarms/HighVoltage", Aggregate::Max, ReadAlarm::new(1005, 8, 1009, 9)),
        Signal::new("/Alarms/LowSoc", Aggregate::Max, ReadAlarm::new(1005, 32, 1005, 35)),
        Signal::new("/Alarms/HighChargeCurrent", Aggregate::Max, ReadAlarm::new(1005, 26, 1009, 27)),
        Signal::new("/Alarms/HighDischargeCurrent", Aggregate::Max, ReadAlarm::new(1005, 10, 1009, 11)),
        Signal::new("/Alarms/CellImbalance", Aggregate::Max, ReadAlarm::new(1005, 30, 1009, 31)),
        Signal::new("/Alarms/InternalFailure", Aggregate::Max, ReadAlarm::new(1009, 20, 1009, 19)),
        Signal::new("/Alarms/HighChargeTemperature", Aggregate::Max, ReadAlarm::new(1005, 1, 1009, 2)),
        Signal::new("/Alarms/LowCellVoltage", Aggregate::Max, ReadAlarm::new(1009, 22, 1009, 23)),
        Signal::new("/Alarms/LowTemperature", Aggregate::Max, ReadAlarm::new(1009, 3, 1009, 3)),
        Signal::new("/Alarms/HighTemperature", Aggregate::Max, ReadAlarm::new(1005, 4, 1009, 5)),
        Signal::new(
            "/Mgmt/ProcessName",
            Aggregate::First,
            Constant(Value::Text(env!("CARGO_PKG_NAME").to_string())),
        ),
        Signal::new(
            "/Mgmt/ProcessVersion",
            Aggregate::First,
            Constant(Value::Text(crate::VERSION.to_string())),
        ),
        Signal::new(
            "/Mgmt/Connection",
            Aggregate::First,
            Constant(Value::Text(identity.connection.clone())),
        ),
        Signal::new(
            "/DeviceInstance",
            Aggregate::First,
            Constant(Value::Int(identity.device_instance + instance)),
        ),
        Signal::new(
            "/ProductName",
            Aggregate::First,
            Constant(Value::Text(product_name)),
        ),
        Signal::new(
            "/ProductId",
            Aggregate::First,
            Constant(Value::Int(i64::from(identity.product_id))),
        )
        .text(product_id_hex),
        // see protocol doc page 7
        Signal::new("/Info/MaxDischargeCurrent", Aggregate::Sum, MaxCurrent).unit("A"),
        Signal::new("/Info/MaxChargeCurrent", Aggregate::Sum, MaxCurrent).unit("A"),
        Signal::new(
            "/Info/MaxChargeVoltage",
            Aggregate::Min,
            Constant(Value::Float(identity.max_charge_voltage)),
        )
        .unit("V"),
        Signal::new(
            "/Info/BatteryLowVoltage",
            Aggregate::Max,
            Constant(Value::Float(identity.min_battery_voltage)),
        )
        .unit("V"),
        Signal::new("/Connected", Aggregate::First, Constant(Value::Int(1))),
        Signal::new(
            "/FirmwareVersion",
            Aggregate::First,
            Constant(Value::Int(1)),
        )
        .text(lead.firmware_version.clone()),
        Signal::new(
            "/HardwareVersion",
            Aggregate::First,
            Constant(Value::Int(1)),
        )
        .text(lead.hardware_version.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battery::BatteryStatus;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn battery(address: u8) -> Battery {
        Battery {
            address,
            hardware_version: "48TL100".into(),
            firmware_version: "0208".into(),
            bms_version: "BMSv2.1".into(),
            ampere_hours: 100,
        }
    }

    fn signals_for(count: usize) -> (Vec<Signal>, Vec<Battery>) {
        let config = Config::default();
        let batteries: Vec<_> = (0..count).map(|i| battery(2 + i as u8)).collect();
        let signals = build_signals(&config, &batteries, 0);
        (signals, batteries)
    }

    #[test]
    fn test_paths_are_unique() {
        let (signals, _) = signals_for(1);
        let paths: HashSet<_> = signals.iter().map(|s| s.path.as_str()).collect();
        assert_eq!(paths.len(), signals.len());
    }

    #[test]
    fn test_table_covers_all_published_paths() {
        let (signals, _) = signals_for(1);
        assert_eq!(signals.len(), 44);
        let alarms = signals.iter().filter(|s| s.path.starts_with("/Alarms/"));
        assert_eq!(alarms.count(), 11);
        let io = signals
            .iter()
            .filter(|s| s.path.starts_with("/Diagnostics/IoStatus/"));
        assert_eq!(io.count(), 7);
        let leds = signals
            .iter()
            .filter(|s| s.path.starts_with("/Diagnostics/LedStatus/"));
        assert_eq!(leds.count(), 4);
    }

    #[test]
    fn test_fleet_product_name_counts_units() {
        let (signals, _) = signals_for(3);
        let product = signals.iter().find(|s| s.path == "/ProductName").unwrap();
        assert_eq!(
            product.reader.constant(),
            Some(Value::Text("FIAMM 48TL Series Battery x3".into()))
        );
    }

    #[test]
    fn test_power_is_sum_of_per_unit_products() {
        // two batteries at 50.0 V, drawing 10.0 A and 20.0 A
        let (signals, batteries) = signals_for(2);
        let raws = [11000u16, 12000u16]; // (raw - 10000) * 0.01 amps
        let statuses: Vec<_> = batteries
            .iter()
            .zip(raws)
            .map(|(b, current)| {
                let mut registers = vec![0u16; 56];
                registers[0] = 5000; // 50.00 V
                registers[1] = current;
                BatteryStatus::new(Arc::new(b.clone()), registers, 999)
            })
            .collect();

        let evaluate = |path: &str| {
            let signal = signals.iter().find(|s| s.path == path).unwrap();
            let values: Vec<_> = statuses
                .iter()
                .map(|s| signal.reader.read(s).unwrap())
                .collect();
            signal.aggregate.apply(&values).unwrap()
        };

        assert_eq!(evaluate("/Dc/0/Current"), Value::Float(30.0));
        assert_eq!(evaluate("/Dc/0/Voltage"), Value::Float(50.0));
        assert_eq!(evaluate("/Dc/0/Power"), Value::Int(1500));
        assert_eq!(evaluate("/Info/MaxChargeCurrent"), Value::Int(100));
    }
}
