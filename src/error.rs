//! Error types for the ble-uart-terminal crate.
//!
//! Commands issued through the [`Terminal`](crate::Terminal) never return these
//! directly: the link session renders them into the message log. They surface
//! as `Result`s only at construction time and at the transport submission seam.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// Failed to establish a connection to the peripheral.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// The platform reported an error alongside a disconnection.
    #[error("Disconnected: {reason}")]
    Disconnected {
        /// The platform-reported reason, verbatim.
        reason: String,
    },

    /// Neither supported UART profile was found on the connected peripheral.
    #[error("No supported UART service found")]
    ProfileNotFound,

    /// A transfer was requested before a write characteristic was resolved.
    #[error("Not ready to send")]
    NotReady,

    /// A command was issued from a state in which it is not valid.
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        /// The rejected operation.
        operation: &'static str,
        /// The state the session was in.
        state: String,
    },

    /// The specified peripheral is unknown to the transport.
    #[error("Device not found: {identifier}")]
    DeviceNotFound {
        /// The identifier that was searched for.
        identifier: String,
    },

    /// Service not found on the device.
    #[error("Service not found: {uuid}")]
    ServiceNotFound {
        /// The UUID of the service that was not found.
        uuid: String,
    },

    /// Characteristic not found on the device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
