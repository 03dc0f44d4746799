//! BLE Service and Characteristic UUIDs.
//!
//! Contains the UUID constants for the two supported serial-over-BLE profiles.

use uuid::Uuid;

// UART Service (Nordic NUS - Nordic UART Service)
/// Nordic UART Service UUID.
pub const NUS_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e40_0001_b5a3_f393_e0a9_e50e24dcca9e);
/// NUS RX characteristic UUID (write to peripheral).
pub const NUS_WRITE_UUID: Uuid = Uuid::from_u128(0x6e40_0002_b5a3_f393_e0a9_e50e24dcca9e);
/// NUS TX characteristic UUID (notifications from peripheral).
pub const NUS_NOTIFY_UUID: Uuid = Uuid::from_u128(0x6e40_0003_b5a3_f393_e0a9_e50e24dcca9e);

// Vendor single-characteristic UART (HM-10 / CC254x style modules)
/// Vendor UART service UUID.
pub const VENDOR_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_ffe0_0000_1000_8000_00805f9b34fb);
/// Vendor UART characteristic UUID (write and notify).
pub const VENDOR_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000_ffe1_0000_1000_8000_00805f9b34fb);

/// Services that service discovery is filtered to, in processing order.
pub const KNOWN_SERVICE_UUIDS: [Uuid; 2] = [NUS_SERVICE_UUID, VENDOR_SERVICE_UUID];

/// Check if a service UUID belongs to a supported UART profile.
pub fn is_known_service(uuid: &Uuid) -> bool {
    KNOWN_SERVICE_UUIDS.contains(uuid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_format() {
        assert_eq!(
            NUS_SERVICE_UUID.to_string().to_uppercase(),
            "6E400001-B5A3-F393-E0A9-E50E24DCCA9E"
        );
        assert_eq!(
            NUS_WRITE_UUID.to_string().to_uppercase(),
            "6E400002-B5A3-F393-E0A9-E50E24DCCA9E"
        );
        assert_eq!(
            NUS_NOTIFY_UUID.to_string().to_uppercase(),
            "6E400003-B5A3-F393-E0A9-E50E24DCCA9E"
        );
        assert_eq!(
            VENDOR_SERVICE_UUID.to_string().to_uppercase(),
            "0000FFE0-0000-1000-8000-00805F9B34FB"
        );
        assert_eq!(
            VENDOR_CHARACTERISTIC_UUID.to_string().to_uppercase(),
            "0000FFE1-0000-1000-8000-00805F9B34FB"
        );
    }

    #[test]
    fn test_is_known_service() {
        assert!(is_known_service(&NUS_SERVICE_UUID));
        assert!(is_known_service(&VENDOR_SERVICE_UUID));
        assert!(!is_known_service(&NUS_WRITE_UUID));
        assert!(!is_known_service(&Uuid::from_u128(
            0x0000_180a_0000_1000_8000_00805f9b34fb
        )));
    }

    #[test]
    fn test_nus_processed_first() {
        assert_eq!(KNOWN_SERVICE_UUIDS[0], NUS_SERVICE_UUID);
    }
}
