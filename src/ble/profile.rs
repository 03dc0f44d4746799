//! UART profile negotiation.
//!
//! Recognizes which of the two supported serial-over-BLE profiles a connected
//! peripheral exposes, and resolves its write and notify characteristics:
//!
//! - **Nordic UART**: separate write (`6E400002`) and notify (`6E400003`)
//!   characteristics under service `6E400001`.
//! - **Single-characteristic vendor UART**: one characteristic (`FFE1`) under
//!   service `FFE0` serves both directions.
//!
//! Characteristic discovery fires once per matched service. A peripheral that
//! exposes both services keeps whichever profile resolved a write path first;
//! later characteristics for the other profile are ignored.

use std::collections::HashSet;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::ble::transport::{CharacteristicHandle, CharacteristicInfo, ServiceHandle, WriteMode};
use crate::ble::uuids::*;
use crate::error::{Error, Result};

/// The kind of UART profile a peripheral exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileKind {
    /// Nordic UART Service.
    NordicUart,
    /// Vendor service with a single read/write characteristic.
    SingleCharVendor,
}

impl ProfileKind {
    /// Profile kind for a service UUID, if it is one of the supported services.
    pub fn for_service(uuid: &Uuid) -> Option<Self> {
        if *uuid == NUS_SERVICE_UUID {
            Some(Self::NordicUart)
        } else if *uuid == VENDOR_SERVICE_UUID {
            Some(Self::SingleCharVendor)
        } else {
            None
        }
    }
}

impl std::fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NordicUart => write!(f, "Nordic UART"),
            Self::SingleCharVendor => write!(f, "Single-characteristic UART"),
        }
    }
}

/// A resolved write path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteEndpoint {
    /// Characteristic to write to.
    pub handle: CharacteristicHandle,
    /// Write mode derived from the characteristic's capabilities.
    pub mode: WriteMode,
}

/// The negotiated profile and its characteristic handles.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Profile {
    /// Nothing resolved yet.
    #[default]
    None,
    /// Nordic UART with independent write and notify characteristics.
    NordicUart {
        /// Write path (`6E400002`).
        write: Option<WriteEndpoint>,
        /// Read path (`6E400003`).
        notify: Option<CharacteristicHandle>,
    },
    /// Vendor UART where one characteristic is both read and write path.
    SingleCharVendor {
        /// The shared characteristic.
        channel: WriteEndpoint,
    },
}

impl Profile {
    /// The profile kind, if any.
    pub fn kind(&self) -> Option<ProfileKind> {
        match self {
            Self::None => None,
            Self::NordicUart { .. } => Some(ProfileKind::NordicUart),
            Self::SingleCharVendor { .. } => Some(ProfileKind::SingleCharVendor),
        }
    }

    /// The resolved write path, if any.
    pub fn write_endpoint(&self) -> Option<&WriteEndpoint> {
        match self {
            Self::None => None,
            Self::NordicUart { write, .. } => write.as_ref(),
            Self::SingleCharVendor { channel } => Some(channel),
        }
    }

    /// The resolved read (notify) path, if any.
    pub fn notify_handle(&self) -> Option<&CharacteristicHandle> {
        match self {
            Self::None => None,
            Self::NordicUart { notify, .. } => notify.as_ref(),
            Self::SingleCharVendor { channel } => Some(&channel.handle),
        }
    }

    /// Check if data can be sent.
    pub fn is_transfer_capable(&self) -> bool {
        self.write_endpoint().is_some()
    }
}

/// Result of processing one service's characteristics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Characteristics that should be subscribed for notifications.
    pub subscribe: Vec<CharacteristicHandle>,
    /// Whether this was the last outstanding matched service.
    pub complete: bool,
}

/// Drives profile resolution across discovery events.
#[derive(Debug, Clone, Default)]
pub struct ProfileNegotiator {
    profile: Profile,
    pending: HashSet<Uuid>,
}

impl ProfileNegotiator {
    /// Create a negotiator with nothing resolved.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget all handles and outstanding services.
    pub fn reset(&mut self) {
        self.profile = Profile::None;
        self.pending.clear();
    }

    /// The profile resolved so far.
    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Check if any matched service still awaits characteristic discovery.
    pub fn is_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Pick the supported services out of a discovery result.
    ///
    /// Returns the services whose characteristics should be discovered, Nordic
    /// UART first. Fails with [`Error::ProfileNotFound`] when none match.
    pub fn services_discovered(
        &mut self,
        services: &[ServiceHandle],
    ) -> Result<Vec<ServiceHandle>> {
        let mut matched: Vec<ServiceHandle> = services
            .iter()
            .filter(|service| is_known_service(&service.uuid))
            .cloned()
            .collect();

        if matched.is_empty() {
            debug!("No supported service among {} discovered", services.len());
            return Err(Error::ProfileNotFound);
        }

        matched.sort_by_key(|service| {
            KNOWN_SERVICE_UUIDS
                .iter()
                .position(|uuid| *uuid == service.uuid)
        });
        matched.dedup_by(|a, b| a.uuid == b.uuid);
        self.pending
            .extend(matched.iter().map(|service| service.uuid));
        Ok(matched)
    }

    /// Mark a matched service as finished without resolving anything.
    ///
    /// Used when characteristic discovery for it failed.
    pub fn service_failed(&mut self, service: &ServiceHandle) -> bool {
        self.pending.remove(&service.uuid);
        self.pending.is_empty()
    }

    /// Resolve handles from a service's characteristics.
    pub fn characteristics_discovered(
        &mut self,
        service: &ServiceHandle,
        characteristics: &[CharacteristicInfo],
    ) -> Resolution {
        self.pending.remove(&service.uuid);
        let mut resolution = Resolution {
            subscribe: Vec::new(),
            complete: self.pending.is_empty(),
        };

        let Some(kind) = ProfileKind::for_service(&service.uuid) else {
            return resolution;
        };

        if let Some(current) = self.profile.kind() {
            if current != kind && self.profile.is_transfer_capable() {
                warn!(
                    "Ignoring {} characteristics; already negotiated {}",
                    kind, current
                );
                return resolution;
            }
        }

        match kind {
            ProfileKind::NordicUart => self.resolve_nordic(characteristics, &mut resolution),
            ProfileKind::SingleCharVendor => {
                self.resolve_vendor(characteristics, &mut resolution)
            }
        }

        resolution
    }

    fn resolve_nordic(
        &mut self,
        characteristics: &[CharacteristicInfo],
        resolution: &mut Resolution,
    ) {
        let (mut write, mut notify) = match std::mem::take(&mut self.profile) {
            Profile::NordicUart { write, notify } => (write, notify),
            _ => (None, None),
        };

        for characteristic in characteristics {
            if characteristic.handle.uuid == NUS_WRITE_UUID {
                let mode = characteristic.preferred_write_mode();
                debug!("Nordic UART write characteristic resolved ({:?})", mode);
                write = Some(WriteEndpoint {
                    handle: characteristic.handle.clone(),
                    mode,
                });
            } else if characteristic.handle.uuid == NUS_NOTIFY_UUID {
                debug!("Nordic UART notify characteristic resolved");
                notify = Some(characteristic.handle.clone());
                if characteristic.can_notify() {
                    resolution.subscribe.push(characteristic.handle.clone());
                } else {
                    warn!("Nordic UART notify characteristic does not support notifications");
                }
            }
        }

        self.profile = Profile::NordicUart { write, notify };
    }

    fn resolve_vendor(
        &mut self,
        characteristics: &[CharacteristicInfo],
        resolution: &mut Resolution,
    ) {
        let Some(characteristic) = characteristics
            .iter()
            .find(|c| c.handle.uuid == VENDOR_CHARACTERISTIC_UUID)
        else {
            debug!("Vendor service without its UART characteristic");
            return;
        };

        let mode = characteristic.preferred_write_mode();
        debug!("Vendor UART characteristic resolved ({:?})", mode);
        self.profile = Profile::SingleCharVendor {
            channel: WriteEndpoint {
                handle: characteristic.handle.clone(),
                mode,
            },
        };

        if characteristic.can_notify() {
            resolution.subscribe.push(characteristic.handle.clone());
        } else {
            warn!("Vendor UART characteristic does not support notifications");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::transport::PeripheralHandle;
    use btleplug::api::CharPropFlags;

    fn peripheral() -> PeripheralHandle {
        PeripheralHandle::new("peripheral-1")
    }

    fn service(uuid: Uuid) -> ServiceHandle {
        ServiceHandle {
            peripheral: peripheral(),
            uuid,
        }
    }

    fn characteristic(service: Uuid, uuid: Uuid, properties: CharPropFlags) -> CharacteristicInfo {
        CharacteristicInfo {
            handle: CharacteristicHandle {
                peripheral: peripheral(),
                service,
                uuid,
            },
            properties,
        }
    }

    fn nus_characteristics() -> Vec<CharacteristicInfo> {
        vec![
            characteristic(
                NUS_SERVICE_UUID,
                NUS_WRITE_UUID,
                CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE,
            ),
            characteristic(NUS_SERVICE_UUID, NUS_NOTIFY_UUID, CharPropFlags::NOTIFY),
        ]
    }

    fn vendor_characteristics() -> Vec<CharacteristicInfo> {
        vec![characteristic(
            VENDOR_SERVICE_UUID,
            VENDOR_CHARACTERISTIC_UUID,
            CharPropFlags::READ | CharPropFlags::WRITE | CharPropFlags::NOTIFY,
        )]
    }

    #[test]
    fn test_services_filtered_to_known() {
        let mut negotiator = ProfileNegotiator::new();
        let battery = Uuid::from_u128(0x0000_180f_0000_1000_8000_00805f9b34fb);

        let matched = negotiator
            .services_discovered(&[
                service(battery),
                service(VENDOR_SERVICE_UUID),
                service(NUS_SERVICE_UUID),
            ])
            .unwrap();

        let uuids: Vec<_> = matched.iter().map(|s| s.uuid).collect();
        assert_eq!(uuids, vec![NUS_SERVICE_UUID, VENDOR_SERVICE_UUID]);
        assert!(negotiator.is_pending());
    }

    #[test]
    fn test_no_known_service_is_profile_not_found() {
        let mut negotiator = ProfileNegotiator::new();
        let result = negotiator.services_discovered(&[service(Uuid::from_u128(0x1234))]);
        assert!(matches!(result, Err(Error::ProfileNotFound)));
        assert!(!negotiator.is_pending());
    }

    #[test]
    fn test_nordic_resolves_two_handles_one_subscribe() {
        let mut negotiator = ProfileNegotiator::new();
        negotiator
            .services_discovered(&[service(NUS_SERVICE_UUID)])
            .unwrap();

        let resolution = negotiator
            .characteristics_discovered(&service(NUS_SERVICE_UUID), &nus_characteristics());

        assert!(resolution.complete);
        assert_eq!(resolution.subscribe.len(), 1);
        assert_eq!(resolution.subscribe[0].uuid, NUS_NOTIFY_UUID);

        let profile = negotiator.profile();
        assert_eq!(profile.kind(), Some(ProfileKind::NordicUart));
        let write = profile.write_endpoint().unwrap();
        let notify = profile.notify_handle().unwrap();
        assert_eq!(write.handle.uuid, NUS_WRITE_UUID);
        assert_eq!(write.mode, WriteMode::Unacknowledged);
        assert_eq!(notify.uuid, NUS_NOTIFY_UUID);
        assert_ne!(&write.handle, notify);
    }

    #[test]
    fn test_vendor_resolves_shared_handle_one_subscribe() {
        let mut negotiator = ProfileNegotiator::new();
        negotiator
            .services_discovered(&[service(VENDOR_SERVICE_UUID)])
            .unwrap();

        let resolution = negotiator
            .characteristics_discovered(&service(VENDOR_SERVICE_UUID), &vendor_characteristics());

        assert!(resolution.complete);
        assert_eq!(resolution.subscribe.len(), 1);

        let profile = negotiator.profile();
        assert_eq!(profile.kind(), Some(ProfileKind::SingleCharVendor));
        let write = profile.write_endpoint().unwrap();
        assert_eq!(Some(&write.handle), profile.notify_handle());
        assert_eq!(write.mode, WriteMode::Acknowledged);
    }

    #[test]
    fn test_later_profile_does_not_overwrite_write_handle() {
        let mut negotiator = ProfileNegotiator::new();
        negotiator
            .services_discovered(&[service(NUS_SERVICE_UUID), service(VENDOR_SERVICE_UUID)])
            .unwrap();

        let first = negotiator
            .characteristics_discovered(&service(NUS_SERVICE_UUID), &nus_characteristics());
        assert!(!first.complete);

        let second = negotiator
            .characteristics_discovered(&service(VENDOR_SERVICE_UUID), &vendor_characteristics());
        assert!(second.complete);
        assert!(second.subscribe.is_empty());

        let profile = negotiator.profile();
        assert_eq!(profile.kind(), Some(ProfileKind::NordicUart));
        assert_eq!(profile.write_endpoint().unwrap().handle.uuid, NUS_WRITE_UUID);
    }

    #[test]
    fn test_vendor_used_when_nordic_has_no_write_path() {
        let mut negotiator = ProfileNegotiator::new();
        negotiator
            .services_discovered(&[service(NUS_SERVICE_UUID), service(VENDOR_SERVICE_UUID)])
            .unwrap();

        let notify_only = vec![characteristic(
            NUS_SERVICE_UUID,
            NUS_NOTIFY_UUID,
            CharPropFlags::NOTIFY,
        )];
        negotiator.characteristics_discovered(&service(NUS_SERVICE_UUID), &notify_only);
        assert!(!negotiator.profile().is_transfer_capable());

        let resolution = negotiator
            .characteristics_discovered(&service(VENDOR_SERVICE_UUID), &vendor_characteristics());
        assert_eq!(resolution.subscribe.len(), 1);
        assert_eq!(
            negotiator.profile().kind(),
            Some(ProfileKind::SingleCharVendor)
        );
    }

    #[test]
    fn test_same_profile_last_writer_wins() {
        let mut negotiator = ProfileNegotiator::new();
        negotiator
            .services_discovered(&[service(NUS_SERVICE_UUID)])
            .unwrap();
        negotiator.characteristics_discovered(&service(NUS_SERVICE_UUID), &nus_characteristics());

        let acknowledged_only = vec![characteristic(
            NUS_SERVICE_UUID,
            NUS_WRITE_UUID,
            CharPropFlags::WRITE,
        )];
        negotiator.characteristics_discovered(&service(NUS_SERVICE_UUID), &acknowledged_only);

        let profile = negotiator.profile();
        assert_eq!(
            profile.write_endpoint().unwrap().mode,
            WriteMode::Acknowledged
        );
        assert!(profile.notify_handle().is_some());
    }

    #[test]
    fn test_notify_without_capability_is_not_subscribed() {
        let mut negotiator = ProfileNegotiator::new();
        negotiator
            .services_discovered(&[service(NUS_SERVICE_UUID)])
            .unwrap();
        let chars = vec![characteristic(
            NUS_SERVICE_UUID,
            NUS_NOTIFY_UUID,
            CharPropFlags::READ,
        )];
        let resolution = negotiator.characteristics_discovered(&service(NUS_SERVICE_UUID), &chars);
        assert!(resolution.subscribe.is_empty());
        assert!(negotiator.profile().notify_handle().is_some());
    }

    #[test]
    fn test_reset_clears_handles() {
        let mut negotiator = ProfileNegotiator::new();
        negotiator
            .services_discovered(&[service(VENDOR_SERVICE_UUID)])
            .unwrap();
        negotiator
            .characteristics_discovered(&service(VENDOR_SERVICE_UUID), &vendor_characteristics());
        negotiator.reset();
        assert_eq!(negotiator.profile(), &Profile::None);
        assert!(negotiator.profile().write_endpoint().is_none());
        assert!(!negotiator.is_pending());
    }

    #[test]
    fn test_service_failed_completes_pending() {
        let mut negotiator = ProfileNegotiator::new();
        negotiator
            .services_discovered(&[service(NUS_SERVICE_UUID)])
            .unwrap();
        assert!(negotiator.service_failed(&service(NUS_SERVICE_UUID)));
        assert!(!negotiator.is_pending());
    }
}
