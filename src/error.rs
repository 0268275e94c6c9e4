use crate::layout::{SubSpace, Unit};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong between a variable map and the wire.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown type: {0}")]
    UnknownType(String),

    #[error("value {value} is out of bounds for type {ty}")]
    OutOfBounds { ty: String, value: String },

    #[error("variable '{name}' has negative address {address}; addresses must be non-negative")]
    NegativeAddress { name: String, address: i64 },

    #[error(
        "invalid address {address} for variable '{name}': previous variable ends at {previous_end}, stores must not overlap"
    )]
    InvalidAddressLayout {
        name: String,
        address: u16,
        previous_end: u32,
    },

    #[error("layout contains no variables")]
    NoVariables,

    #[error("duplicate variable name: {0}")]
    DuplicateVariable(String),

    #[error("variables not found: {}", .0.join(", "))]
    VariableNotFound(Vec<String>),

    #[error("coil variable '{name}' has invalid size {size}; at least one bit is required")]
    InvalidSize { name: String, size: i64 },

    #[error("no {space} layout defined for unit {unit}")]
    MissingSubLayout { unit: Unit, space: SubSpace },

    #[error("no layout defined for unit {0}")]
    NoSuchSlaveLayout(Unit),

    #[error("unit {0} is not part of the datastore")]
    NoSuchSlave(Unit),

    #[error("unexpected function code {got:#04x} in response, expected {expected:#04x}")]
    ModbusResponse { expected: u8, got: u8 },

    #[error("expected non-negative period for daemon, received {0}")]
    NegativePeriod(f64),

    #[error("client is not connected")]
    NotConnected,

    #[error("timed out waiting for the worker thread")]
    Timeout,

    #[error("encoding failed: {0}")]
    Encoding(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
