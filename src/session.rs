//! Link session state machine.
//!
//! A [`LinkSession`] owns the lifecycle of the one active connection and all
//! state the presentation layer observes: the device registry, the message
//! log, command history, transfer counters and link quality.
//!
//! The session is a plain synchronous state machine. It never blocks; it
//! issues fire-and-forget commands to a [`Transport`] and advances when the
//! matching [`TransportEvent`] is fed back through [`LinkSession::handle_event`].
//! It must be driven from a single task (see [`Terminal`](crate::Terminal)).
//!
//! ```text
//! Disconnected --connect()--> Connecting --Connected--> Connected
//!      ^                          |                         |
//!      +------FailedToConnect-----+                         |
//!      +--------------------Disconnected--------------------+
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::ble::connection::ConnectionState;
use crate::ble::profile::{Profile, ProfileKind, ProfileNegotiator};
use crate::ble::registry::{Device, DeviceRegistry, Sighting, UNKNOWN_DEVICE_NAME};
use crate::ble::signal::SignalQuality;
use crate::ble::transport::{
    CharacteristicHandle, CharacteristicInfo, PeripheralHandle, ServiceHandle, Transport,
    TransportEvent,
};
use crate::ble::uuids::KNOWN_SERVICE_UUIDS;
use crate::config::TerminalConfig;
use crate::data::history::CommandHistory;
use crate::data::message_log::{export_messages, MessageKind, MessageLog, TerminalMessage};
use crate::error::Error;
use crate::utils::{ensure_line_terminator, hex_compact, hex_spaced, strip_line_terminator};

/// Bytes moved over the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferCounters {
    /// Bytes written to the peripheral.
    pub bytes_sent: u64,
    /// Bytes received from the peripheral.
    pub bytes_received: u64,
}

impl TransferCounters {
    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Read-only view of everything the presentation layer observes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionSnapshot {
    /// Increases on every state change.
    pub revision: u64,
    /// Whether the BLE adapter is powered and usable.
    pub is_adapter_enabled: bool,
    /// Whether a scan is running.
    pub is_scanning: bool,
    /// Discovered devices, strongest signal first.
    pub discovered_devices: Vec<Device>,
    /// The connected device, if connected and known to the registry.
    pub connected_device: Option<Device>,
    /// Message log entries in chronological order.
    pub messages: Vec<TerminalMessage>,
    /// Link state.
    pub connection_state: ConnectionState,
    /// Link quality from the last RSSI poll.
    pub connection_quality: SignalQuality,
    /// Negotiated UART profile, if any.
    pub profile: Option<ProfileKind>,
    /// Whether a write path is resolved.
    pub is_ready: bool,
    /// Bytes sent on this connection.
    pub bytes_sent: u64,
    /// Bytes received on this connection.
    pub bytes_received: u64,
    /// Sent commands, most recent first.
    pub history: Vec<String>,
}

impl SessionSnapshot {
    /// Render the messages in this snapshot as an export.
    pub fn export_messages(&self) -> String {
        export_messages(&self.messages)
    }
}

/// Repeating RSSI read timer; aborted when dropped.
#[derive(Debug)]
struct RssiPoller {
    task: JoinHandle<()>,
}

impl RssiPoller {
    fn start(
        transport: Arc<dyn Transport>,
        peripheral: PeripheralHandle,
        period: Duration,
    ) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                trace!("Polling RSSI of {}", peripheral);
                transport.read_rssi(&peripheral);
            }
        });

        Self { task }
    }
}

impl Drop for RssiPoller {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// The connection and profile-negotiation state machine.
pub struct LinkSession {
    transport: Arc<dyn Transport>,
    config: TerminalConfig,
    registry: DeviceRegistry,
    log: MessageLog,
    history: CommandHistory,
    negotiator: ProfileNegotiator,
    adapter_enabled: bool,
    scanning: bool,
    state: ConnectionState,
    /// Peripheral of the active session (connecting or connected).
    target: Option<PeripheralHandle>,
    /// Name the target had when the connect was issued.
    target_name: Option<String>,
    connected_device: Option<Device>,
    quality: SignalQuality,
    counters: TransferCounters,
    poller: Option<RssiPoller>,
    revision: u64,
}

impl LinkSession {
    /// Create a disconnected session. The adapter counts as unavailable until
    /// the transport reports otherwise.
    pub fn new(transport: Arc<dyn Transport>, config: TerminalConfig) -> Self {
        Self {
            registry: DeviceRegistry::new(&config),
            log: MessageLog::new(&config),
            history: CommandHistory::new(&config),
            negotiator: ProfileNegotiator::new(),
            transport,
            config,
            adapter_enabled: false,
            scanning: false,
            state: ConnectionState::Disconnected,
            target: None,
            target_name: None,
            connected_device: None,
            quality: SignalQuality::Unknown,
            counters: TransferCounters::default(),
            poller: None,
            revision: 0,
        }
    }

    // === State ===

    /// Current link state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Current link quality.
    pub fn quality(&self) -> SignalQuality {
        self.quality
    }

    /// Transfer counters for the current connection.
    pub fn counters(&self) -> TransferCounters {
        self.counters
    }

    /// Whether the adapter is usable.
    pub fn is_adapter_enabled(&self) -> bool {
        self.adapter_enabled
    }

    /// Whether a scan is running.
    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    /// Whether RSSI polling is running.
    pub fn is_polling(&self) -> bool {
        self.poller.is_some()
    }

    /// The connected device, if it was known to the registry.
    pub fn connected_device(&self) -> Option<&Device> {
        self.connected_device.as_ref()
    }

    /// The negotiated profile.
    pub fn profile(&self) -> &Profile {
        self.negotiator.profile()
    }

    /// Discovered devices.
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// The message log.
    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    /// The command history.
    pub fn history(&self) -> &CommandHistory {
        &self.history
    }

    /// Revision counter, bumped on every observable change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Render the message log.
    pub fn export_messages(&self) -> String {
        self.log.export()
    }

    /// Bring deferred bookkeeping (registry ranking) up to date.
    pub fn settle(&mut self) {
        self.registry.settle();
    }

    /// Capture the observable state.
    pub fn snapshot(&self) -> SessionSnapshot {
        let profile = self.negotiator.profile();
        SessionSnapshot {
            revision: self.revision,
            is_adapter_enabled: self.adapter_enabled,
            is_scanning: self.scanning,
            discovered_devices: self.registry.devices().to_vec(),
            connected_device: self.connected_device.clone(),
            messages: self.log.messages().to_vec(),
            connection_state: self.state,
            connection_quality: self.quality,
            profile: profile.kind(),
            is_ready: profile.is_transfer_capable(),
            bytes_sent: self.counters.bytes_sent,
            bytes_received: self.counters.bytes_received,
            history: self.history.entries(),
        }
    }

    // === Commands ===

    /// Start a new scan cycle, clearing previously discovered devices.
    pub fn start_scanning(&mut self) {
        if !self.adapter_enabled {
            self.report(Error::BluetoothUnavailable);
            return;
        }

        info!("Starting BLE scan");
        self.registry.clear();
        self.scanning = true;
        self.transport.start_scan();
        self.touch();
    }

    /// Stop scanning.
    pub fn stop_scanning(&mut self) {
        if !self.scanning {
            debug!("Not scanning, ignoring stop request");
            return;
        }

        info!("Stopping BLE scan");
        self.transport.stop_scan();
        self.scanning = false;
        self.touch();
    }

    /// Begin connecting to a device. Only valid while disconnected.
    pub fn connect(&mut self, device: &Device) {
        if !self.adapter_enabled {
            self.report(Error::BluetoothUnavailable);
            return;
        }
        if self.state.is_active() {
            self.report(Error::InvalidState {
                operation: "connect",
                state: self.state.to_string(),
            });
            return;
        }

        if self.scanning {
            self.stop_scanning();
        }

        self.transport.connect(&device.handle);
        self.target = Some(device.handle.clone());
        self.target_name = Some(device.name.clone());
        self.set_state(ConnectionState::Connecting);
        self.record(MessageKind::Info, format!("Connecting to {}...", device.name));
    }

    /// Ask the transport to drop the link.
    ///
    /// State only changes once the transport confirms with a disconnected
    /// event.
    pub fn disconnect(&mut self) {
        let Some(target) = self.target.clone().filter(|_| self.state.is_active()) else {
            self.report(Error::InvalidState {
                operation: "disconnect",
                state: self.state.to_string(),
            });
            return;
        };

        info!("Disconnecting from {}", target);
        self.transport.disconnect(&target);
    }

    /// Send a line of text, adding CRLF unless it already ends in a newline.
    pub fn send_text(&mut self, text: &str) {
        let payload = ensure_line_terminator(text);
        let data = Bytes::copy_from_slice(payload.as_bytes());
        if self.write(data) {
            let trimmed = strip_line_terminator(text);
            self.record(MessageKind::Tx, trimmed);
            self.history.push(trimmed);
        }
    }

    /// Send raw bytes.
    pub fn send_bytes(&mut self, data: Bytes) {
        let rendered = format!("HEX: {} ({} bytes)", hex_compact(&data), data.len());
        if self.write(data) {
            self.record(MessageKind::Tx, rendered);
        }
    }

    /// Clear the message log.
    pub fn clear_messages(&mut self) {
        self.log.clear();
        self.touch();
    }

    /// Record a command in history without sending it.
    pub fn add_to_history(&mut self, command: &str) {
        if self.history.push(command) {
            self.touch();
        }
    }

    /// Stop scanning and polling, and drop any active link.
    pub fn shutdown(&mut self) {
        self.stop_scanning();
        self.stop_polling();
        if let Some(target) = &self.target {
            if self.state.is_active() {
                info!("Disconnecting from {} on shutdown", target);
                self.transport.disconnect(target);
            }
        }
    }

    // === Events ===

    /// Apply one transport event.
    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::StateChanged { enabled } => self.on_state_changed(enabled),
            TransportEvent::Discovered {
                identity,
                name,
                rssi,
                handle,
            } => {
                let sighting = self.registry.on_sighting(&identity, name, rssi, handle);
                if sighting != Sighting::Unchanged {
                    self.touch();
                }
            }
            TransportEvent::Connected { peripheral } => self.on_connected(peripheral),
            TransportEvent::FailedToConnect { peripheral, reason } => {
                self.on_failed_to_connect(peripheral, reason)
            }
            TransportEvent::Disconnected { peripheral, reason } => {
                self.on_disconnected(peripheral, reason)
            }
            TransportEvent::ServicesDiscovered {
                peripheral,
                services,
                error,
            } => self.on_services_discovered(peripheral, services, error),
            TransportEvent::CharacteristicsDiscovered {
                service,
                characteristics,
                error,
            } => self.on_characteristics_discovered(service, characteristics, error),
            TransportEvent::ValueUpdated {
                characteristic,
                value,
                error,
            } => self.on_value_updated(characteristic, value, error),
            TransportEvent::RssiRead {
                peripheral,
                rssi,
                error,
            } => self.on_rssi_read(peripheral, rssi, error),
            TransportEvent::WriteFailed {
                characteristic,
                reason,
            } => {
                if self.is_current(&characteristic.peripheral) {
                    self.record(MessageKind::Error, format!("Write failed: {}", reason));
                }
            }
            TransportEvent::SubscribeFailed {
                characteristic,
                reason,
            } => {
                if self.is_current(&characteristic.peripheral) {
                    self.record(MessageKind::Error, format!("Subscribe failed: {}", reason));
                }
            }
        }
    }

    fn on_state_changed(&mut self, enabled: bool) {
        if enabled == self.adapter_enabled {
            return;
        }

        self.adapter_enabled = enabled;
        if enabled {
            self.record(MessageKind::Info, "Bluetooth ready");
        } else {
            self.scanning = false;
            self.report(Error::BluetoothUnavailable);
        }
    }

    fn on_connected(&mut self, peripheral: PeripheralHandle) {
        if self.state != ConnectionState::Connecting || self.target.as_ref() != Some(&peripheral) {
            debug!("Ignoring connect event for {}", peripheral);
            return;
        }

        self.set_state(ConnectionState::Connected);
        // The registry may have been cleared by a new scan in the meantime.
        self.connected_device = self.registry.lookup(peripheral.identity()).cloned();
        self.counters.reset();
        self.negotiator.reset();
        self.start_polling(peripheral.clone());

        let name = self.display_name().to_string();
        self.record(MessageKind::Info, format!("Connected to {}", name));
        self.transport.discover_services(&peripheral, &KNOWN_SERVICE_UUIDS);
    }

    fn on_failed_to_connect(&mut self, peripheral: PeripheralHandle, reason: String) {
        if self.target.as_ref() != Some(&peripheral) {
            debug!("Ignoring connect failure for {}", peripheral);
            return;
        }

        self.teardown();
        self.report(Error::ConnectionFailed { reason });
    }

    fn on_disconnected(&mut self, peripheral: PeripheralHandle, reason: Option<String>) {
        if !self.state.is_active() || self.target.as_ref() != Some(&peripheral) {
            debug!("Ignoring disconnect event for {}", peripheral);
            return;
        }

        // A link cancelled while connecting has no registry entry attached yet.
        let name = match (&self.connected_device, &self.target_name) {
            (None, Some(name)) => name.clone(),
            _ => self.display_name().to_string(),
        };
        self.teardown();
        match reason {
            Some(reason) => self.report(Error::Disconnected { reason }),
            None => self.record(MessageKind::Info, format!("Disconnected from {}", name)),
        }
    }

    fn on_services_discovered(
        &mut self,
        peripheral: PeripheralHandle,
        services: Vec<ServiceHandle>,
        error: Option<String>,
    ) {
        if !self.is_current(&peripheral) {
            debug!("Ignoring services for {}", peripheral);
            return;
        }

        if let Some(error) = error {
            self.record(
                MessageKind::Error,
                format!("Service discovery failed: {}", error),
            );
            if !self.negotiator.is_pending() {
                self.report(Error::ProfileNotFound);
            }
            return;
        }

        match self.negotiator.services_discovered(&services) {
            Ok(matched) => {
                for service in &matched {
                    debug!("Discovering characteristics of {}", service.uuid);
                    self.transport.discover_characteristics(service);
                }
            }
            Err(e) => self.report(e),
        }
    }

    fn on_characteristics_discovered(
        &mut self,
        service: ServiceHandle,
        characteristics: Vec<CharacteristicInfo>,
        error: Option<String>,
    ) {
        if !self.is_current(&service.peripheral) {
            debug!("Ignoring characteristics for {}", service.uuid);
            return;
        }

        let complete = match error {
            Some(error) => {
                self.record(
                    MessageKind::Error,
                    format!("Characteristic discovery failed: {}", error),
                );
                self.negotiator.service_failed(&service)
            }
            None => {
                let resolution = self
                    .negotiator
                    .characteristics_discovered(&service, &characteristics);
                for handle in &resolution.subscribe {
                    debug!("Subscribing to {}", handle.uuid);
                    self.transport.subscribe(handle);
                }
                self.touch();
                resolution.complete
            }
        };

        if complete {
            match self.negotiator.profile().kind() {
                Some(kind) if self.negotiator.profile().is_transfer_capable() => {
                    self.record(MessageKind::Info, format!("Ready: {}", kind));
                }
                _ => self.report(Error::ProfileNotFound),
            }
        }
    }

    fn on_value_updated(
        &mut self,
        characteristic: CharacteristicHandle,
        value: Bytes,
        error: Option<String>,
    ) {
        if !self.is_current(&characteristic.peripheral) {
            debug!("Ignoring data from {}", characteristic.uuid);
            return;
        }

        if let Some(error) = error {
            self.record(MessageKind::Error, format!("Receive failed: {}", error));
            return;
        }

        self.counters.bytes_received += value.len() as u64;
        let text = match std::str::from_utf8(&value) {
            Ok(text) => strip_line_terminator(text).to_string(),
            Err(_) => format!("<{}>", hex_spaced(&value)),
        };
        self.record(MessageKind::Rx, text);
    }

    fn on_rssi_read(&mut self, peripheral: PeripheralHandle, rssi: i16, error: Option<String>) {
        if !self.is_current(&peripheral) {
            return;
        }
        if let Some(error) = error {
            trace!("RSSI read failed: {}", error);
            return;
        }

        let quality = SignalQuality::from(rssi);
        if quality != self.quality {
            debug!("Link quality {} -> {} ({} dBm)", self.quality, quality, rssi);
            self.quality = quality;
            self.touch();
        }
    }

    // === Internal ===

    fn write(&mut self, data: Bytes) -> bool {
        let Some(endpoint) = self.negotiator.profile().write_endpoint().cloned() else {
            self.report(Error::NotReady);
            return false;
        };

        let len = data.len() as u64;
        match self.transport.write(&endpoint.handle, data, endpoint.mode) {
            Ok(()) => {
                self.counters.bytes_sent += len;
                true
            }
            Err(e) => {
                self.record(MessageKind::Error, format!("Write failed: {}", e));
                false
            }
        }
    }

    fn is_current(&self, peripheral: &PeripheralHandle) -> bool {
        self.state.is_connected() && self.target.as_ref() == Some(peripheral)
    }

    fn display_name(&self) -> &str {
        self.connected_device
            .as_ref()
            .map(|device| device.name.as_str())
            .unwrap_or(UNKNOWN_DEVICE_NAME)
    }

    fn start_polling(&mut self, peripheral: PeripheralHandle) {
        self.stop_polling();
        debug!(
            "Starting RSSI polling every {:?}",
            self.config.rssi_poll_interval
        );
        self.poller = Some(RssiPoller::start(
            self.transport.clone(),
            peripheral,
            self.config.rssi_poll_interval,
        ));
    }

    fn stop_polling(&mut self) {
        if self.poller.take().is_some() {
            debug!("Stopped RSSI polling");
        }
    }

    fn teardown(&mut self) {
        self.stop_polling();
        self.set_state(ConnectionState::Disconnected);
        self.target = None;
        self.target_name = None;
        self.connected_device = None;
        self.negotiator.reset();
        self.quality = SignalQuality::Unknown;
    }

    fn set_state(&mut self, new_state: ConnectionState) {
        let old_state = std::mem::replace(&mut self.state, new_state);
        if old_state != new_state {
            debug!("Connection state changed: {} -> {}", old_state, new_state);
            self.touch();
        }
    }

    fn report(&mut self, error: Error) {
        self.record(MessageKind::Error, error.to_string());
    }

    fn record(&mut self, kind: MessageKind, text: impl Into<String>) {
        let message = self.log.append(text, kind);
        match kind {
            MessageKind::Tx | MessageKind::Rx => {
                debug!("{} {}", kind.prefix(), message.text())
            }
            MessageKind::Info => info!("{}", message.text()),
            MessageKind::Error => warn!("{}", message.text()),
        }
        self.touch();
    }

    fn touch(&mut self) {
        self.revision += 1;
    }
}

impl std::fmt::Debug for LinkSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkSession")
            .field("state", &self.state)
            .field("target", &self.target)
            .field("profile", &self.negotiator.profile().kind())
            .field("counters", &self.counters)
            .finish()
    }
}
