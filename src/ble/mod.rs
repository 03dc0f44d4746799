//! BLE communication module.
//!
//! This module covers everything between the link session and the radio:
//! identifiers, signal classification, the discovered-device registry, UART
//! profile negotiation and the transport boundary with its btleplug
//! implementation.

pub mod connection;
pub mod platform;
pub mod profile;
pub mod registry;
pub mod signal;
pub mod transport;
pub mod uuids;

pub use connection::ConnectionState;
pub use platform::BtleplugTransport;
pub use profile::{Profile, ProfileKind, ProfileNegotiator, WriteEndpoint};
pub use registry::{Device, DeviceRegistry};
pub use signal::SignalQuality;
pub use transport::{
    CharacteristicHandle, CharacteristicInfo, PeripheralHandle, ServiceHandle, Transport,
    TransportEvent, WriteMode,
};
pub use uuids::*;
