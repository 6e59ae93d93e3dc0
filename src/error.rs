use thiserror::Error;

/// Application level error type used throughout the crate.
#[derive(Error, Debug)]
pub enum DriverError {
    /// I/O related failure (serial port open, read, write)
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport level Modbus failure
    #[error("Modbus transport error: {0}")]
    Transport(#[from] tokio_modbus::Error),

    /// The unit answered with a Modbus exception code
    #[error("Modbus exception from unit {unit}: {exception}")]
    Exception {
        unit: u8,
        exception: tokio_modbus::Exception,
    },

    /// The unit did not answer within the configured timeout
    #[error("request to unit {unit} timed out")]
    Timeout { unit: u8 },

    /// Identification of a unit failed (no answer, or unknown identity string)
    #[error("failed to identify unit {unit}: {reason}")]
    Identify { unit: u8, reason: String },

    /// A decoder addressed a register outside the polled window
    #[error("register {register} outside window [{base}, {base}+{count})")]
    RegisterOutOfRange { register: u16, base: u16, count: u16 },

    /// An aggregator was handed a sequence it cannot reduce
    #[error("aggregation error: {0}")]
    Aggregate(String),

    /// Requested path was never registered with the publisher
    #[error("Signal not found: {0}")]
    SignalNotFound(String),

    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error while parsing YAML configuration files
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Convenient alias over [`Result`] using [`DriverError`]
pub type Result<T> = std::result::Result<T, DriverError>;
