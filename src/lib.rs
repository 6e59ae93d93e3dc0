//! tl48 - Modbus RTU telemetry driver for 48TL series battery banks
//!
//! Polls every battery unit sharing one RTU serial bus, decodes the
//! vendor's register encodings into physical quantities, aggregates the
//! readings across units and republishes them on a local process bus for
//! the energy-management supervisor.
//!
//! # Examples
//!
//! ```rust,no_run
//! use tl48::{shared_bus, Config, PollGroup, RtuClient, Service, SignalBus};
//! use std::sync::Arc;
//!
//! # async fn run() -> tl48::Result<()> {
//! let config = Config::default();
//! let bus = shared_bus(RtuClient::new("/dev/ttyUSB0", &config.serial));
//!
//! let batteries = tl48::identify_batteries(&bus, &config).await;
//! let signals = tl48::build_signals(&config, &batteries, 0);
//! let publisher = Arc::new(SignalBus::new("battery"));
//! let group = PollGroup::new("battery", batteries, signals, publisher, bus, &config)?;
//!
//! Service::new(vec![group], &config).run().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

/// Comprehensive error handling with structured error types
pub mod error;

/// Type-safe value system shared by decoders and the publisher
pub mod value;

/// Configuration management with YAML support and validation
pub mod config;

/// Register decoder library: pure decoders over one battery's window
pub mod decode;

/// Battery identity records and bus identification
pub mod battery;

/// Modbus client collaborator and the bus access guard
pub mod modbus;

/// Process-bus publisher
pub mod publisher;

/// The declarative signal table
pub mod registry;

/// Polling engine and liveness watchdog
pub mod engine;

pub use battery::{identify_batteries, Battery, BatteryStatus};
pub use config::{Config, PublishMode};
pub use decode::{Aggregate, RegisterReader, TextFormat};
pub use engine::{PollGroup, Service, ServiceHandle, ServiceStats};
pub use error::{DriverError, Result};
pub use modbus::{shared_bus, ModbusClient, RtuClient, SharedBus};
pub use publisher::{SignalBus, ValuePublisher};
pub use registry::{build_signals, Signal};
pub use value::{AlarmLevel, LedState, Value};

/// Crate version, published under /Mgmt/ProcessVersion
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
