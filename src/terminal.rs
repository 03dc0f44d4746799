//! Terminal facade.
//!
//! [`Terminal`] is the entry point of the library. It owns a background task
//! that holds the [`LinkSession`] and serializes everything that mutates it:
//! presentation commands and transport events arrive on two channels and are
//! applied one at a time. Observers read published [`SessionSnapshot`]s or
//! subscribe to new log entries; nothing here ever blocks the caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::ble::platform::BtleplugTransport;
use crate::ble::registry::Device;
use crate::ble::transport::{Transport, TransportEvent};
use crate::config::TerminalConfig;
use crate::data::message_log::TerminalMessage;
use crate::error::{Error, Result};
use crate::session::{LinkSession, SessionSnapshot};

/// Handle for a registered callback.
///
/// The callback stays active until the handle is unregistered or dropped.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

impl std::fmt::Debug for CallbackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackHandle").field("id", &self.id).finish()
    }
}

/// A request for the session task.
#[derive(Debug)]
enum Command {
    StartScanning,
    StopScanning,
    Connect(Device),
    Disconnect,
    SendText(String),
    SendBytes(Bytes),
    ClearMessages,
    AddToHistory(String),
    Shutdown(oneshot::Sender<()>),
}

/// BLE UART terminal.
///
/// # Example
///
/// ```rust,no_run
/// use ble_uart_terminal::{Terminal, TerminalConfig};
///
/// # async fn example() -> ble_uart_terminal::Result<()> {
/// let terminal = Terminal::new(TerminalConfig::default()).await?;
/// terminal.start_scanning();
///
/// tokio::time::sleep(std::time::Duration::from_secs(5)).await;
/// if let Some(device) = terminal.snapshot().discovered_devices.first() {
///     terminal.connect(device);
/// }
///
/// terminal.send_text("AT");
/// println!("{}", terminal.export_messages());
/// terminal.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct Terminal {
    command_tx: mpsc::UnboundedSender<Command>,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
    message_tx: broadcast::Sender<TerminalMessage>,
    callback_counter: AtomicU64,
    actor: Mutex<Option<JoinHandle<()>>>,
}

impl Terminal {
    /// Open the first Bluetooth adapter and start the terminal.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or Bluetooth is not
    /// available.
    pub async fn new(config: TerminalConfig) -> Result<Self> {
        config.validate()?;
        let (transport, events) = BtleplugTransport::new().await?;
        Self::with_transport(transport, events, config)
    }

    /// Start a terminal on top of an existing transport.
    ///
    /// `events` must be the channel the transport delivers its events on.
    /// Must be called from within a tokio runtime.
    pub fn with_transport(
        transport: Arc<dyn Transport>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        config: TerminalConfig,
    ) -> Result<Self> {
        config.validate()?;

        let batch_limit = config.event_batch_limit;
        let session = LinkSession::new(transport, config);
        let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot());
        let (message_tx, _) = broadcast::channel(256);
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let actor = tokio::spawn(run_session(
            session,
            command_rx,
            events,
            snapshot_tx,
            message_tx.clone(),
            batch_limit,
        ));

        info!("Terminal started");

        Ok(Self {
            command_tx,
            snapshot_rx,
            message_tx,
            callback_counter: AtomicU64::new(0),
            actor: Mutex::new(Some(actor)),
        })
    }

    // === Commands ===

    /// Start scanning, clearing previously discovered devices.
    pub fn start_scanning(&self) {
        self.send(Command::StartScanning);
    }

    /// Stop scanning.
    pub fn stop_scanning(&self) {
        self.send(Command::StopScanning);
    }

    /// Connect to a discovered device.
    pub fn connect(&self, device: &Device) {
        self.send(Command::Connect(device.clone()));
    }

    /// Disconnect from the current device.
    pub fn disconnect(&self) {
        self.send(Command::Disconnect);
    }

    /// Send a line of text. CRLF is appended unless it already ends in a newline.
    pub fn send_text(&self, text: impl Into<String>) {
        self.send(Command::SendText(text.into()));
    }

    /// Send raw bytes.
    pub fn send_bytes(&self, data: impl Into<Bytes>) {
        self.send(Command::SendBytes(data.into()));
    }

    /// Clear the message log.
    pub fn clear_messages(&self) {
        self.send(Command::ClearMessages);
    }

    /// Record a command in history without sending it.
    pub fn add_to_history(&self, command: impl Into<String>) {
        self.send(Command::AddToHistory(command.into()));
    }

    // === Observation ===

    /// The latest published state.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Render the message log as of the latest published state.
    pub fn export_messages(&self) -> String {
        self.snapshot_rx.borrow().export_messages()
    }

    /// Sent commands, most recent first.
    pub fn history(&self) -> Vec<String> {
        self.snapshot_rx.borrow().history.clone()
    }

    /// Watch published state.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Subscribe to new message log entries.
    pub fn subscribe_messages(&self) -> broadcast::Receiver<TerminalMessage> {
        self.message_tx.subscribe()
    }

    /// Register a callback for every published state change.
    pub fn on_state_changed<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&SessionSnapshot) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.snapshot_rx.clone();
        rx.borrow_and_update();

        let handle = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let snapshot = rx.borrow_and_update().clone();
                callback(&snapshot);
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }

    /// Register a callback for new message log entries.
    pub fn on_message<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&TerminalMessage) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.message_tx.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) => callback(&message),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Message callback lagged, skipped {} messages", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }

    // === Lifecycle ===

    /// Stop scanning and polling, disconnect, and stop the session task.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down terminal");

        let (done_tx, done_rx) = oneshot::channel();
        if self.command_tx.send(Command::Shutdown(done_tx)).is_ok() {
            let _ = done_rx.await;
        }

        let actor = self.actor.lock().take();
        if let Some(actor) = actor {
            actor
                .await
                .map_err(|e| Error::Internal(format!("Session task failed: {}", e)))?;
        }

        Ok(())
    }

    fn send(&self, command: Command) {
        trace!("Queueing {:?}", command);
        if self.command_tx.send(command).is_err() {
            warn!("Terminal is shut down, command dropped");
        }
    }
}

impl Drop for Terminal {
    fn drop(&mut self) {
        let (done_tx, _) = oneshot::channel();
        let _ = self.command_tx.send(Command::Shutdown(done_tx));
    }
}

/// Session task: the single owner of all terminal state.
async fn run_session(
    mut session: LinkSession,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    message_tx: broadcast::Sender<TerminalMessage>,
    batch_limit: usize,
) {
    let mut publisher = Publisher::new(&session, snapshot_tx, message_tx);
    let mut events_open = true;

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Shutdown(done)) => {
                    session.shutdown();
                    publisher.publish(&mut session);
                    let _ = done.send(());
                    break;
                }
                Some(command) => apply(&mut session, command),
                None => {
                    session.shutdown();
                    break;
                }
            },
            event = events.recv(), if events_open => match event {
                Some(event) => {
                    session.handle_event(event);
                    let mut applied = 1;
                    while applied < batch_limit {
                        match events.try_recv() {
                            Ok(event) => {
                                session.handle_event(event);
                                applied += 1;
                            }
                            Err(_) => break,
                        }
                    }
                    trace!("Applied {} transport events", applied);
                }
                None => {
                    warn!("Transport event channel closed");
                    events_open = false;
                }
            },
        }

        publisher.publish(&mut session);
    }

    debug!("Session task ended");
}

fn apply(session: &mut LinkSession, command: Command) {
    match command {
        Command::StartScanning => session.start_scanning(),
        Command::StopScanning => session.stop_scanning(),
        Command::Connect(device) => session.connect(&device),
        Command::Disconnect => session.disconnect(),
        Command::SendText(text) => session.send_text(&text),
        Command::SendBytes(data) => session.send_bytes(data),
        Command::ClearMessages => session.clear_messages(),
        Command::AddToHistory(command) => session.add_to_history(&command),
        Command::Shutdown(_) => {}
    }
}

/// Publishes snapshots and new log entries when the session changed.
struct Publisher {
    snapshot_tx: watch::Sender<SessionSnapshot>,
    message_tx: broadcast::Sender<TerminalMessage>,
    revision: u64,
    last_sequence: u64,
}

impl Publisher {
    fn new(
        session: &LinkSession,
        snapshot_tx: watch::Sender<SessionSnapshot>,
        message_tx: broadcast::Sender<TerminalMessage>,
    ) -> Self {
        Self {
            snapshot_tx,
            message_tx,
            revision: session.revision(),
            last_sequence: session.log().last_sequence(),
        }
    }

    fn publish(&mut self, session: &mut LinkSession) {
        session.settle();
        if session.revision() == self.revision {
            return;
        }

        self.revision = session.revision();
        self.snapshot_tx.send_replace(session.snapshot());

        for message in session.log().since(self.last_sequence) {
            // No receivers is fine.
            let _ = self.message_tx.send(message.clone());
        }
        self.last_sequence = session.log().last_sequence();
    }
}
