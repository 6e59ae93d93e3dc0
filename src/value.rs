// src/value.rs - Value system shared by decoders, aggregators and the publisher
use serde::{Deserialize, Serialize};
use std::fmt;

/// Core value type enumeration for the driver
///
/// This enum represents every datum that can flow from a decoded register
/// window to the process bus: plain scalars plus the two protocol enums
/// (LED state and two-level alarm severity).
///
/// # Examples
///
/// ```rust
/// use tl48::Value;
///
/// let val = Value::Float(56.0);
/// assert_eq!(val.as_int(), Some(56));
/// assert_eq!(Value::Bool(true).as_float(), Some(1.0));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    /// Boolean value
    Bool(bool),
    /// Integer value (64-bit)
    Int(i64),
    /// Floating-point value (64-bit)
    Float(f64),
    /// Text value (identity strings, hex dumps)
    Text(String),
    /// LED state read from a status register
    Led(LedState),
    /// Two-level alarm severity
    Alarm(AlarmLevel),
}

/// State of one front-panel LED, a 2-bit combination within one register.
///
/// From page 6 of the 48TLxxx ModBus protocol document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LedState {
    /// Both bits clear
    Off = 0,
    /// Low bit set
    On = 1,
    /// High bit set
    BlinkSlow = 2,
    /// Both bits set
    BlinkFast = 3,
}

/// Severity of a two-level alarm. Ordering is the severity ordering:
/// alarm dominates warning dominates ok.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlarmLevel {
    /// Neither trigger bit set
    Ok = 0,
    /// Warning bit set
    Warning = 1,
    /// Alarm bit set (regardless of the warning bit)
    Alarm = 2,
}

impl Value {
    /// Convert to boolean if possible
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            Value::Float(f) => Some(*f != 0.0 && !f.is_nan()),
            Value::Led(l) => Some(*l != LedState::Off),
            Value::Alarm(a) => Some(*a != AlarmLevel::Ok),
            Value::Text(_) => None,
        }
    }

    /// Convert to integer if possible
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Float(f) => {
                if f.is_finite() && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                    Some(*f as i64)
                } else {
                    None
                }
            }
            Value::Led(l) => Some(*l as i64),
            Value::Alarm(a) => Some(*a as i64),
            Value::Text(_) => None,
        }
    }

    /// Convert to float if possible
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Led(l) => Some(*l as i64 as f64),
            Value::Alarm(a) => Some(*a as i64 as f64),
            Value::Text(_) => None,
        }
    }

    /// Get the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Led(_) => "led",
            Value::Alarm(_) => "alarm",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            // whole floats keep their decimal point: 50.0, not 50
            Value::Float(v) => write!(f, "{:?}", v),
            Value::Text(s) => write!(f, "{}", s),
            // the supervisor expects the protocol's numeric codes
            Value::Led(l) => write!(f, "{}", *l as i64),
            Value::Alarm(a) => write!(f, "{}", *a as i64),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Int(0)
    }
}
