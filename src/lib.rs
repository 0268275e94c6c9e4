//! Typed layout engine for a Modbus register/coil address space: declare
//! named variables over the flat 16-bit-register and coil spaces of a
//! slave, then read and write them as values instead of raw words.

pub mod client;
pub mod codec;
pub mod coils;
pub mod context;
pub mod daemon;
pub mod error;
pub mod layout;
pub mod registers;
pub mod store;
pub mod threaded;
pub mod transport;
pub mod value;

pub use error::{Error, Result};
pub use layout::{DEFAULT_SLAVE, ServerContextLayout, SlaveContextLayout, SubSpace, Unit};
pub use value::{Value, Values};
