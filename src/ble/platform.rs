//! btleplug-backed [`Transport`].
//!
//! Bridges the platform BLE stack to the link session. Every command runs as a
//! task on the tokio runtime and reports back through the event channel handed
//! out by [`BtleplugTransport::new`], so callers never block on the radio.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use btleplug::api::{
    Central, CentralEvent, CentralState, Characteristic, Manager as _, Peripheral as _,
    ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use bytes::Bytes;
use futures::stream::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::transport::{
    CharacteristicHandle, CharacteristicInfo, PeripheralHandle, ServiceHandle, Transport,
    TransportEvent, WriteMode,
};
use crate::error::{Error, Result};

type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// [`Transport`] over the first available btleplug adapter.
pub struct BtleplugTransport {
    /// The BLE adapter.
    adapter: Adapter,
    /// Peripherals seen while scanning, by identity.
    peripherals: Arc<RwLock<HashMap<String, Peripheral>>>,
    /// Characteristics resolved during discovery.
    characteristics: Arc<RwLock<HashMap<CharacteristicHandle, Characteristic>>>,
    /// Outgoing event channel.
    event_tx: EventSender,
    /// Runtime command tasks are spawned on.
    runtime: Handle,
    /// Central event pump.
    central_task: JoinHandle<()>,
    /// Connect-then-notify task of each linked peripheral, by identity.
    link_tasks: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl BtleplugTransport {
    /// Open the first Bluetooth adapter and start listening for its events.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BluetoothUnavailable`] if no adapter can be opened.
    pub async fn new() -> Result<(Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>)> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Self::with_adapter(adapter).await
    }

    /// Use a specific adapter.
    pub async fn with_adapter(
        adapter: Adapter,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>)> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let peripherals = Arc::new(RwLock::new(HashMap::new()));
        let characteristics = Arc::new(RwLock::new(HashMap::new()));
        let link_tasks = Arc::new(Mutex::new(HashMap::new()));

        let events = adapter.events().await.map_err(Error::Bluetooth)?;
        let central_task = {
            let adapter = adapter.clone();
            let peripherals = peripherals.clone();
            let characteristics = characteristics.clone();
            let link_tasks = link_tasks.clone();
            let event_tx = event_tx.clone();
            tokio::spawn(async move {
                let mut events = events;
                while let Some(event) = events.next().await {
                    Self::handle_central_event(
                        event,
                        &adapter,
                        &peripherals,
                        &characteristics,
                        &link_tasks,
                        &event_tx,
                    )
                    .await;
                }
                debug!("Central event stream ended");
            })
        };

        // An adapter that could be opened is treated as powered until the
        // platform says otherwise.
        let _ = event_tx.send(TransportEvent::StateChanged { enabled: true });

        let transport = Arc::new(Self {
            adapter,
            peripherals,
            characteristics,
            event_tx,
            runtime: Handle::current(),
            central_task,
            link_tasks,
        });

        Ok((transport, event_rx))
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    async fn handle_central_event(
        event: CentralEvent,
        adapter: &Adapter,
        peripherals: &RwLock<HashMap<String, Peripheral>>,
        characteristics: &RwLock<HashMap<CharacteristicHandle, Characteristic>>,
        link_tasks: &Mutex<HashMap<String, JoinHandle<()>>>,
        event_tx: &EventSender,
    ) {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                Self::process_peripheral(adapter, id, peripherals, event_tx).await;
            }
            CentralEvent::DeviceConnected(id) => {
                debug!("Device connected: {:?}", id);
            }
            CentralEvent::DeviceDisconnected(id) => {
                debug!("Device disconnected: {:?}", id);
                let identity = id.to_string();
                if let Some(task) = link_tasks.lock().remove(&identity) {
                    task.abort();
                }
                forget_characteristics(&mut *characteristics.write(), &identity);
                let _ = event_tx.send(TransportEvent::Disconnected {
                    peripheral: PeripheralHandle::new(identity),
                    reason: None,
                });
            }
            CentralEvent::StateUpdate(state) => {
                let enabled = match state {
                    CentralState::PoweredOn => true,
                    CentralState::PoweredOff => false,
                    _ => return,
                };
                debug!("Adapter state changed: {:?}", state);
                let _ = event_tx.send(TransportEvent::StateChanged { enabled });
            }
            _ => {}
        }
    }

    async fn process_peripheral(
        adapter: &Adapter,
        id: PeripheralId,
        peripherals: &RwLock<HashMap<String, Peripheral>>,
        event_tx: &EventSender,
    ) {
        let peripheral = match adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return;
            }
        };

        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            _ => return,
        };

        // Cached entries without a live signal reading are not sightings.
        let Some(rssi) = properties.rssi else {
            return;
        };

        let identity = id.to_string();
        peripherals.write().insert(identity.clone(), peripheral);

        let _ = event_tx.send(TransportEvent::Discovered {
            handle: PeripheralHandle::new(identity.clone()),
            identity,
            name: properties.local_name,
            rssi,
        });
    }

    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.runtime.spawn(task);
    }

    fn peripheral(&self, handle: &PeripheralHandle) -> Option<Peripheral> {
        self.peripherals.read().get(handle.identity()).cloned()
    }

    fn emit(&self, event: TransportEvent) {
        if self.event_tx.send(event).is_err() {
            trace!("Event receiver dropped");
        }
    }
}

impl Transport for BtleplugTransport {
    fn start_scan(&self) {
        {
            let links = self.link_tasks.lock();
            retain_linked(&mut *self.peripherals.write(), &*links);
            self.characteristics
                .write()
                .retain(|handle, _| links.contains_key(handle.peripheral.identity()));
        }

        let adapter = self.adapter.clone();
        self.spawn(async move {
            if let Err(e) = adapter.start_scan(ScanFilter::default()).await {
                error!("Failed to start scan: {}", e);
            }
        });
    }

    fn stop_scan(&self) {
        let adapter = self.adapter.clone();
        self.spawn(async move {
            if let Err(e) = adapter.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
            }
        });
    }

    fn connect(&self, handle: &PeripheralHandle) {
        let Some(peripheral) = self.peripheral(handle) else {
            self.emit(TransportEvent::FailedToConnect {
                peripheral: handle.clone(),
                reason: Error::DeviceNotFound {
                    identifier: handle.to_string(),
                }
                .to_string(),
            });
            return;
        };

        let identity = handle.identity().to_string();
        let handle = handle.clone();
        let characteristics = self.characteristics.clone();
        let event_tx = self.event_tx.clone();

        let task = self.runtime.spawn(async move {
            debug!("Connecting to {}", handle);
            if let Err(e) = peripheral.connect().await {
                let _ = event_tx.send(TransportEvent::FailedToConnect {
                    peripheral: handle,
                    reason: e.to_string(),
                });
                return;
            }

            // Open the stream before announcing the link so early values are kept.
            let notifications = peripheral.notifications().await;
            let _ = event_tx.send(TransportEvent::Connected {
                peripheral: handle.clone(),
            });

            let mut notifications = match notifications {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Failed to get notification stream: {}", e);
                    return;
                }
            };

            while let Some(notification) = notifications.next().await {
                trace!(
                    "Notification from {}: {} bytes",
                    notification.uuid,
                    notification.value.len()
                );
                let service = service_of(&*characteristics.read(), &handle, notification.uuid);
                let Some(service) = service else {
                    trace!("Dropping notification from undiscovered {}", notification.uuid);
                    continue;
                };
                let event = TransportEvent::ValueUpdated {
                    characteristic: CharacteristicHandle {
                        peripheral: handle.clone(),
                        service,
                        uuid: notification.uuid,
                    },
                    value: Bytes::from(notification.value),
                    error: None,
                };
                if event_tx.send(event).is_err() {
                    break;
                }
            }

            debug!("Notification stream of {} ended", handle);
        });

        if let Some(previous) = self.link_tasks.lock().insert(identity, task) {
            previous.abort();
        }
    }

    fn disconnect(&self, handle: &PeripheralHandle) {
        if let Some(task) = self.link_tasks.lock().remove(handle.identity()) {
            task.abort();
        }
        forget_characteristics(&mut *self.characteristics.write(), handle.identity());

        let Some(peripheral) = self.peripheral(handle) else {
            warn!("Disconnect requested for unknown device {}", handle);
            self.emit(TransportEvent::Disconnected {
                peripheral: handle.clone(),
                reason: Some(
                    Error::DeviceNotFound {
                        identifier: handle.to_string(),
                    }
                    .to_string(),
                ),
            });
            return;
        };

        let handle = handle.clone();
        let event_tx = self.event_tx.clone();
        self.spawn(async move {
            // Some platforms never raise a central event for a local
            // disconnect; duplicates are harmless.
            let result = peripheral.disconnect().await;
            let _ = event_tx.send(disconnect_outcome(handle, result));
        });
    }

    fn discover_services(&self, handle: &PeripheralHandle, services: &[Uuid]) {
        let Some(peripheral) = self.peripheral(handle) else {
            self.emit(TransportEvent::ServicesDiscovered {
                peripheral: handle.clone(),
                services: Vec::new(),
                error: Some(
                    Error::DeviceNotFound {
                        identifier: handle.to_string(),
                    }
                    .to_string(),
                ),
            });
            return;
        };

        let handle = handle.clone();
        let filter = services.to_vec();
        let event_tx = self.event_tx.clone();
        self.spawn(async move {
            let event = match peripheral.discover_services().await {
                Ok(()) => {
                    let services: Vec<ServiceHandle> = peripheral
                        .services()
                        .into_iter()
                        .filter(|service| filter.is_empty() || filter.contains(&service.uuid))
                        .map(|service| ServiceHandle {
                            peripheral: handle.clone(),
                            uuid: service.uuid,
                        })
                        .collect();
                    debug!("Discovered {} matching services on {}", services.len(), handle);
                    TransportEvent::ServicesDiscovered {
                        peripheral: handle,
                        services,
                        error: None,
                    }
                }
                Err(e) => TransportEvent::ServicesDiscovered {
                    peripheral: handle,
                    services: Vec::new(),
                    error: Some(e.to_string()),
                },
            };
            let _ = event_tx.send(event);
        });
    }

    fn discover_characteristics(&self, service: &ServiceHandle) {
        let found = self.peripheral(&service.peripheral).and_then(|peripheral| {
            peripheral
                .services()
                .into_iter()
                .find(|candidate| candidate.uuid == service.uuid)
        });

        let Some(found) = found else {
            self.emit(TransportEvent::CharacteristicsDiscovered {
                service: service.clone(),
                characteristics: Vec::new(),
                error: Some(
                    Error::ServiceNotFound {
                        uuid: service.uuid.to_string(),
                    }
                    .to_string(),
                ),
            });
            return;
        };

        let mut cache = self.characteristics.write();
        let characteristics = found
            .characteristics
            .into_iter()
            .map(|characteristic| {
                let handle = CharacteristicHandle {
                    peripheral: service.peripheral.clone(),
                    service: service.uuid,
                    uuid: characteristic.uuid,
                };
                debug!(
                    "Found characteristic: {} in service {}, properties: {:?}",
                    characteristic.uuid, service.uuid, characteristic.properties
                );
                let info = CharacteristicInfo {
                    handle: handle.clone(),
                    properties: characteristic.properties,
                };
                cache.insert(handle, characteristic);
                info
            })
            .collect();
        drop(cache);

        self.emit(TransportEvent::CharacteristicsDiscovered {
            service: service.clone(),
            characteristics,
            error: None,
        });
    }

    fn subscribe(&self, handle: &CharacteristicHandle) {
        let characteristic = self.characteristics.read().get(handle).cloned();
        let target = self.peripheral(&handle.peripheral).zip(characteristic);

        let Some((peripheral, characteristic)) = target else {
            self.emit(TransportEvent::SubscribeFailed {
                characteristic: handle.clone(),
                reason: Error::CharacteristicNotFound {
                    uuid: handle.uuid.to_string(),
                }
                .to_string(),
            });
            return;
        };

        let handle = handle.clone();
        let event_tx = self.event_tx.clone();
        self.spawn(async move {
            match peripheral.subscribe(&characteristic).await {
                Ok(()) => debug!("Subscribed to notifications from {}", handle.uuid),
                Err(e) => {
                    debug!("Failed to subscribe to {}: {:?}", handle.uuid, e);
                    let _ = event_tx.send(TransportEvent::SubscribeFailed {
                        characteristic: handle,
                        reason: e.to_string(),
                    });
                }
            }
        });
    }

    fn write(&self, handle: &CharacteristicHandle, data: Bytes, mode: WriteMode) -> Result<()> {
        let peripheral = self
            .peripheral(&handle.peripheral)
            .ok_or_else(|| Error::DeviceNotFound {
                identifier: handle.peripheral.to_string(),
            })?;

        let characteristic = self
            .characteristics
            .read()
            .get(handle)
            .cloned()
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: handle.uuid.to_string(),
            })?;

        let handle = handle.clone();
        let event_tx = self.event_tx.clone();
        self.spawn(async move {
            match peripheral.write(&characteristic, &data, mode.into()).await {
                Ok(()) => trace!("Wrote {} bytes to characteristic {}", data.len(), handle.uuid),
                Err(e) => {
                    let _ = event_tx.send(TransportEvent::WriteFailed {
                        characteristic: handle,
                        reason: e.to_string(),
                    });
                }
            }
        });

        Ok(())
    }

    fn read_rssi(&self, handle: &PeripheralHandle) {
        let Some(peripheral) = self.peripheral(handle) else {
            return;
        };

        let handle = handle.clone();
        let event_tx = self.event_tx.clone();
        self.spawn(async move {
            let (rssi, error) = match peripheral.properties().await {
                Ok(Some(properties)) => match properties.rssi {
                    Some(rssi) => (rssi, None),
                    None => (0, Some("RSSI unavailable".to_string())),
                },
                Ok(None) => (0, Some("RSSI unavailable".to_string())),
                Err(e) => (0, Some(e.to_string())),
            };
            let _ = event_tx.send(TransportEvent::RssiRead {
                peripheral: handle,
                rssi,
                error,
            });
        });
    }
}

/// Service a notifying characteristic was discovered under.
fn service_of<V>(
    cache: &HashMap<CharacteristicHandle, V>,
    peripheral: &PeripheralHandle,
    uuid: Uuid,
) -> Option<Uuid> {
    cache
        .keys()
        .find(|handle| &handle.peripheral == peripheral && handle.uuid == uuid)
        .map(|handle| handle.service)
}

fn forget_characteristics<V>(cache: &mut HashMap<CharacteristicHandle, V>, identity: &str) {
    cache.retain(|handle, _| handle.peripheral.identity() != identity);
}

/// Drop scan leftovers that no link task still refers to.
fn retain_linked<T, L>(peripherals: &mut HashMap<String, T>, links: &HashMap<String, L>) {
    peripherals.retain(|identity, _| links.contains_key(identity));
}

/// The link is torn down locally whatever the platform answers, so a failed
/// disconnect still ends the session, carrying the reason.
fn disconnect_outcome(
    peripheral: PeripheralHandle,
    result: btleplug::Result<()>,
) -> TransportEvent {
    let reason = match result {
        Ok(()) => None,
        Err(e) => {
            warn!("Failed to disconnect from {}: {}", peripheral, e);
            Some(e.to_string())
        }
    };
    TransportEvent::Disconnected { peripheral, reason }
}

impl Drop for BtleplugTransport {
    fn drop(&mut self) {
        self.central_task.abort();
        for (_, task) in self.link_tasks.lock().drain() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuids::*;

    fn handle(identity: &str, service: Uuid, uuid: Uuid) -> CharacteristicHandle {
        CharacteristicHandle {
            peripheral: PeripheralHandle::new(identity),
            service,
            uuid,
        }
    }

    #[test]
    fn test_transport_is_shareable() {
        fn assert_transport<T: Transport + Send + Sync + 'static>() {}
        assert_transport::<BtleplugTransport>();
    }

    #[test]
    fn test_notification_service_from_cache() {
        let mut cache = HashMap::new();
        cache.insert(handle("a", NUS_SERVICE_UUID, NUS_NOTIFY_UUID), ());
        cache.insert(
            handle("b", VENDOR_SERVICE_UUID, VENDOR_CHARACTERISTIC_UUID),
            (),
        );

        let a = PeripheralHandle::new("a");
        let b = PeripheralHandle::new("b");
        assert_eq!(service_of(&cache, &a, NUS_NOTIFY_UUID), Some(NUS_SERVICE_UUID));
        assert_eq!(
            service_of(&cache, &b, VENDOR_CHARACTERISTIC_UUID),
            Some(VENDOR_SERVICE_UUID)
        );
        // Same characteristic on another peripheral is not a match.
        assert_eq!(service_of(&cache, &b, NUS_NOTIFY_UUID), None);
        assert_eq!(service_of(&cache, &a, NUS_WRITE_UUID), None);
    }

    #[test]
    fn test_forget_characteristics_of_one_peripheral() {
        let mut cache = HashMap::new();
        cache.insert(handle("a", NUS_SERVICE_UUID, NUS_WRITE_UUID), ());
        cache.insert(handle("a", NUS_SERVICE_UUID, NUS_NOTIFY_UUID), ());
        cache.insert(
            handle("b", VENDOR_SERVICE_UUID, VENDOR_CHARACTERISTIC_UUID),
            (),
        );

        forget_characteristics(&mut cache, "a");

        assert_eq!(cache.len(), 1);
        assert!(cache.keys().all(|h| h.peripheral.identity() == "b"));
    }

    #[test]
    fn test_scan_keeps_only_linked_peripherals() {
        let mut peripherals: HashMap<String, u8> =
            [("a".to_string(), 1), ("b".to_string(), 2), ("c".to_string(), 3)]
                .into_iter()
                .collect();
        let links: HashMap<String, ()> = [("b".to_string(), ())].into_iter().collect();

        retain_linked(&mut peripherals, &links);

        assert_eq!(peripherals.keys().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn test_failed_disconnect_still_reports_disconnected() {
        let peripheral = PeripheralHandle::new("a");

        match disconnect_outcome(peripheral.clone(), Err(btleplug::Error::NotConnected)) {
            TransportEvent::Disconnected {
                peripheral: reported,
                reason,
            } => {
                assert_eq!(reported, peripheral);
                assert!(reason.is_some());
            }
            other => panic!("unexpected event: {:?}", other),
        }

        match disconnect_outcome(peripheral, Ok(())) {
            TransportEvent::Disconnected { reason, .. } => assert_eq!(reason, None),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
