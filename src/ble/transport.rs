//! Transport adapter boundary.
//!
//! The link session talks to the platform BLE stack only through the
//! [`Transport`] command sink and the [`TransportEvent`] stream. Commands are
//! fire-and-forget: their outcomes come back later as events on the channel the
//! adapter was created with.

use btleplug::api::{CharPropFlags, WriteType};
use bytes::Bytes;
use uuid::Uuid;

use crate::error::Result;

/// Opaque handle to a platform peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeripheralHandle(String);

impl PeripheralHandle {
    /// Wrap a platform peripheral identifier.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self(identifier.into())
    }

    /// The stable per-peripheral identity this handle refers to.
    pub fn identity(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeripheralHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A discovered GATT service on a peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceHandle {
    /// Owning peripheral.
    pub peripheral: PeripheralHandle,
    /// Service UUID.
    pub uuid: Uuid,
}

/// A discovered GATT characteristic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CharacteristicHandle {
    /// Owning peripheral.
    pub peripheral: PeripheralHandle,
    /// UUID of the service the characteristic belongs to.
    pub service: Uuid,
    /// Characteristic UUID.
    pub uuid: Uuid,
}

/// A characteristic together with its capability flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    /// Handle used for subsequent commands.
    pub handle: CharacteristicHandle,
    /// Capability flags reported by the peripheral.
    pub properties: CharPropFlags,
}

impl CharacteristicInfo {
    /// Check if the characteristic can deliver notifications or indications.
    pub fn can_notify(&self) -> bool {
        self.properties
            .intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE)
    }

    /// Preferred write mode: unacknowledged when supported.
    pub fn preferred_write_mode(&self) -> WriteMode {
        if self
            .properties
            .contains(CharPropFlags::WRITE_WITHOUT_RESPONSE)
        {
            WriteMode::Unacknowledged
        } else {
            WriteMode::Acknowledged
        }
    }
}

/// How a write is delivered to the peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WriteMode {
    /// Write with response; the peer confirms.
    #[default]
    Acknowledged,
    /// Write without response; lower latency.
    Unacknowledged,
}

impl From<WriteMode> for WriteType {
    fn from(mode: WriteMode) -> Self {
        match mode {
            WriteMode::Acknowledged => WriteType::WithResponse,
            WriteMode::Unacknowledged => WriteType::WithoutResponse,
        }
    }
}

/// Events delivered by the transport to the link session.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The adapter was powered on or off.
    StateChanged {
        /// Whether the adapter is usable.
        enabled: bool,
    },
    /// A peripheral was seen while scanning.
    Discovered {
        /// Stable per-peripheral identity.
        identity: String,
        /// Advertised local name, if any.
        name: Option<String>,
        /// Signal strength in dBm.
        rssi: i16,
        /// Handle used to connect.
        handle: PeripheralHandle,
    },
    /// A connect command succeeded.
    Connected {
        /// The peripheral that is now connected.
        peripheral: PeripheralHandle,
    },
    /// A connect command failed.
    FailedToConnect {
        /// The peripheral that failed to connect.
        peripheral: PeripheralHandle,
        /// Platform-reported reason.
        reason: String,
    },
    /// The link to a peripheral went down.
    Disconnected {
        /// The peripheral that disconnected.
        peripheral: PeripheralHandle,
        /// Platform-reported error, if the disconnect was not clean.
        reason: Option<String>,
    },
    /// Result of a service discovery request.
    ServicesDiscovered {
        /// The peripheral whose services were discovered.
        peripheral: PeripheralHandle,
        /// Services matching the requested filter.
        services: Vec<ServiceHandle>,
        /// Platform-reported error, if any.
        error: Option<String>,
    },
    /// Result of a characteristic discovery request.
    CharacteristicsDiscovered {
        /// The service whose characteristics were discovered.
        service: ServiceHandle,
        /// Characteristics of the service.
        characteristics: Vec<CharacteristicInfo>,
        /// Platform-reported error, if any.
        error: Option<String>,
    },
    /// Incoming data on a subscribed characteristic.
    ValueUpdated {
        /// The characteristic the data arrived on.
        characteristic: CharacteristicHandle,
        /// Raw payload.
        value: Bytes,
        /// Platform-reported error, if any.
        error: Option<String>,
    },
    /// Result of an RSSI read.
    RssiRead {
        /// The peripheral that was read.
        peripheral: PeripheralHandle,
        /// Signal strength in dBm; meaningless when `error` is set.
        rssi: i16,
        /// Platform-reported error, if any.
        error: Option<String>,
    },
    /// A previously submitted write failed.
    WriteFailed {
        /// The characteristic written to.
        characteristic: CharacteristicHandle,
        /// Platform-reported reason.
        reason: String,
    },
    /// A notification subscription failed.
    SubscribeFailed {
        /// The characteristic subscribed to.
        characteristic: CharacteristicHandle,
        /// Platform-reported reason.
        reason: String,
    },
}

/// Command sink of the platform BLE stack.
///
/// Implementations must not block: every method only queues work, and results
/// are delivered as [`TransportEvent`]s.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Start scanning for peripherals.
    fn start_scan(&self);

    /// Stop scanning.
    fn stop_scan(&self);

    /// Connect to a peripheral.
    fn connect(&self, peripheral: &PeripheralHandle);

    /// Disconnect from (or cancel a pending connect to) a peripheral.
    fn disconnect(&self, peripheral: &PeripheralHandle);

    /// Discover services, reporting only those in `services`.
    fn discover_services(&self, peripheral: &PeripheralHandle, services: &[Uuid]);

    /// Discover the characteristics of a service.
    fn discover_characteristics(&self, service: &ServiceHandle);

    /// Subscribe to notifications from a characteristic.
    fn subscribe(&self, characteristic: &CharacteristicHandle);

    /// Queue a write.
    ///
    /// Returns an error only when the write cannot be submitted at all;
    /// delivery failures arrive later as [`TransportEvent::WriteFailed`].
    fn write(&self, characteristic: &CharacteristicHandle, data: Bytes, mode: WriteMode)
        -> Result<()>;

    /// Read the current RSSI of a connected peripheral.
    fn read_rssi(&self, peripheral: &PeripheralHandle);
}
