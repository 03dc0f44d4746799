//! Registry of peripherals discovered while scanning.
//!
//! Keeps one entry per identity, ranked strongest signal first. Repeat
//! sightings only touch an entry when the RSSI moved by more than the update
//! threshold, so a chatty advertiser does not churn the list.

use tracing::trace;

use crate::ble::signal::SignalQuality;
use crate::ble::transport::PeripheralHandle;
use crate::config::TerminalConfig;

/// Display name used when a peripheral does not advertise one.
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown";

/// A discovered peripheral.
///
/// Equality is by identity only.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Device {
    /// Stable per-peripheral identity.
    pub id: String,
    /// Advertised name, or [`UNKNOWN_DEVICE_NAME`].
    pub name: String,
    /// Last recorded signal strength in dBm.
    pub rssi: i16,
    /// Platform handle used to connect.
    pub handle: PeripheralHandle,
}

impl Device {
    /// Create a device record, defaulting a missing name.
    pub fn new(
        id: impl Into<String>,
        name: Option<String>,
        rssi: i16,
        handle: PeripheralHandle,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.unwrap_or_else(|| UNKNOWN_DEVICE_NAME.to_string()),
            rssi,
            handle,
        }
    }

    /// Signal quality of the last recorded RSSI.
    pub fn signal_quality(&self) -> SignalQuality {
        SignalQuality::from(self.rssi)
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Device {}

/// What a sighting did to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sighting {
    /// A new device was appended.
    Inserted,
    /// An existing device was updated in place.
    Updated,
    /// The sighting was within the update threshold and ignored.
    Unchanged,
}

/// Deduplicated, RSSI-ranked set of discovered peripherals.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
    update_threshold: i16,
    eager_sort_limit: usize,
    sort_stride: usize,
    needs_sort: bool,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new(&TerminalConfig::default())
    }
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new(config: &TerminalConfig) -> Self {
        Self {
            devices: Vec::new(),
            update_threshold: config.rssi_update_threshold,
            eager_sort_limit: config.registry_eager_sort_limit,
            sort_stride: config.registry_sort_stride.max(1),
            needs_sort: false,
        }
    }

    /// Record a scan sighting.
    pub fn on_sighting(
        &mut self,
        identity: &str,
        name: Option<String>,
        rssi: i16,
        handle: PeripheralHandle,
    ) -> Sighting {
        if let Some(device) = self.devices.iter_mut().find(|d| d.id == identity) {
            let delta = (i32::from(rssi) - i32::from(device.rssi)).abs();
            if delta <= i32::from(self.update_threshold) {
                return Sighting::Unchanged;
            }

            trace!("Device {} RSSI {} -> {}", identity, device.rssi, rssi);
            device.rssi = rssi;
            if let Some(name) = name {
                device.name = name;
            }
            device.handle = handle;
            self.needs_sort = true;
            self.sort_if_due();
            return Sighting::Updated;
        }

        trace!("New device {} ({:?}, {} dBm)", identity, name, rssi);
        self.devices.push(Device::new(identity, name, rssi, handle));
        self.needs_sort = true;
        self.sort_if_due();
        Sighting::Inserted
    }

    /// Sort now if the list is dirty.
    ///
    /// Call once a burst of sightings has been applied; afterwards the list is
    /// RSSI-descending.
    pub fn settle(&mut self) {
        if self.needs_sort {
            // Stable: equal RSSI keeps insertion order.
            self.devices
                .sort_by_key(|device| std::cmp::Reverse(device.rssi));
            self.needs_sort = false;
        }
    }

    /// Remove all devices.
    pub fn clear(&mut self) {
        self.devices.clear();
        self.needs_sort = false;
    }

    /// Find a device by identity.
    pub fn lookup(&self, identity: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.id == identity)
    }

    /// Devices in rank order (as of the last sort).
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Number of devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    fn sort_if_due(&mut self) {
        let count = self.devices.len();
        if count < self.eager_sort_limit || count % self.sort_stride == 0 {
            self.settle();
        }
    }
}
