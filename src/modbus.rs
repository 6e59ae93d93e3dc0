//! Modbus client collaborator
//!
//! The driver never frames requests itself; it talks to the bus through
//! the [`ModbusClient`] trait, implemented for the real RS-485 line by
//! [`RtuClient`] on top of tokio-modbus. Every exchange opens the serial
//! port, performs one request/response, and closes the port again, so a
//! fault can never leave the line held open.
//!
//! All callers go through [`SharedBus`], the bus access guard: an async
//! mutex that serializes exchanges between the identification phase and
//! the polling timer. Release is scoped — the guard drops on every exit
//! path.

use crate::config::SerialConfig;
use crate::error::{DriverError, Result};
use async_trait::async_trait;
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_modbus::client::{rtu, Context};
use tokio_modbus::prelude::*;
use tokio_serial::{DataBits, Parity, SerialStream, StopBits};
use tracing::debug;

/// Modbus "Report Slave ID" function code, used as the vendor
/// identification request.
const REPORT_SLAVE_ID: u8 = 0x11;

/// One request/response conversation partner on the serial bus.
///
/// `read_registers` reads `count` input registers starting at `address`
/// from the given unit; `report_slave_id` runs the vendor identification
/// exchange and returns the raw identity text.
#[async_trait]
pub trait ModbusClient: Send {
    /// Read `count` input registers from `unit` starting at `address`.
    async fn read_registers(&mut self, unit: u8, address: u16, count: u16) -> Result<Vec<u16>>;

    /// Issue the vendor identification request and return the identity text.
    async fn report_slave_id(&mut self, unit: u8) -> Result<String>;
}

/// The bus access guard: only one exchange may be in flight at a time.
pub type SharedBus = Arc<Mutex<dyn ModbusClient + Send>>;

/// Wrap a client into the shared, mutually exclusive bus handle.
pub fn shared_bus<C: ModbusClient + 'static>(client: C) -> SharedBus {
    Arc::new(Mutex::new(client))
}

/// Modbus RTU client for a serial device.
pub struct RtuClient {
    device: String,
    baud_rate: u32,
    parity: Parity,
    stop_bits: StopBits,
    data_bits: DataBits,
    timeout: Duration,
}

impl RtuClient {
    /// Build a client for `device` (full path, e.g. `/dev/ttyUSB0`) with
    /// the given line settings. The settings are assumed validated by
    /// [`crate::config::Config::validate`].
    pub fn new(device: impl Into<String>, serial: &SerialConfig) -> Self {
        let parity = match serial.parity.as_str() {
            "even" => Parity::Even,
            "odd" => Parity::Odd,
            _ => Parity::None,
        };
        let stop_bits = match serial.stop_bits {
            1 => StopBits::One,
            _ => StopBits::Two,
        };
        let data_bits = match serial.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        };
        Self {
            device: device.into(),
            baud_rate: serial.baud_rate,
            parity,
            stop_bits,
            data_bits,
            timeout: Duration::from_millis(serial.timeout_ms),
        }
    }

    /// Open the serial port and attach an RTU context addressing `unit`.
    fn connect(&self, unit: u8) -> Result<Context> {
        debug!("opening {} for unit {}", self.device, unit);
        let builder = tokio_serial::new(&self.device, self.baud_rate)
            .parity(self.parity)
            .stop_bits(self.stop_bits)
            .data_bits(self.data_bits);
        let stream = SerialStream::open(&builder)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        Ok(rtu::attach_slave(stream, Slave(unit)))
    }
}

#[async_trait]
impl ModbusClient for RtuClient {
    async fn read_registers(&mut self, unit: u8, address: u16, count: u16) -> Result<Vec<u16>> {
        debug!(
            "requesting registers {}-{} from unit {}",
            address,
            address + count,
            unit
        );
        let mut ctx = self.connect(unit)?;
        let response = timeout(self.timeout, ctx.read_input_registers(address, count)).await;
        // dropping the context closes the serial port on every path
        drop(ctx);
        let words = response
            .map_err(|_| DriverError::Timeout { unit })??
            .map_err(|exception| DriverError::Exception { unit, exception })?;
        Ok(words)
    }

    async fn report_slave_id(&mut self, unit: u8) -> Result<String> {
        let mut ctx = self.connect(unit)?;
        let request = Request::Custom(REPORT_SLAVE_ID, Cow::Borrowed(&[]));
        let response = timeout(self.timeout, ctx.call(request)).await;
        drop(ctx);
        let response = response
            .map_err(|_| DriverError::Timeout { unit })??
            .map_err(|exception| DriverError::Exception { unit, exception })?;
        match response {
            Response::Custom(_, data) => {
                // payload is byte count followed by the identity bytes
                let identity = data.as_ref().get(1..).unwrap_or_default();
                Ok(String::from_utf8_lossy(identity).into_owned())
            }
            other => Err(DriverError::Identify {
                unit,
                reason: format!("unexpected identification response: {:?}", other),
            }),
        }
    }
}
