// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # ble-uart-terminal
//!
//! A cross-platform Rust library for talking to serial-over-BLE peripherals
//! (UART bridges, HM-10 style modules, Nordic UART firmware) from the central
//! role.
//!
//! Two UART profiles are supported: the **Nordic UART Service** with separate
//! write and notify characteristics, and the common **FFE0/FFE1 vendor
//! service** where one characteristic carries both directions.
//!
//! ## Features
//!
//! - **Discovery**: RSSI-ranked list of nearby peripherals with signal bars
//! - **Profile Negotiation**: Automatic detection of the UART profile
//! - **Terminal I/O**: Send text lines or raw bytes, receive text with a hex fallback
//! - **Message Log**: Bounded, timestamped log with plain-text export
//! - **Command History**: Most-recent-first list of sent commands
//! - **Link Quality**: Periodic RSSI polling while connected
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ble_uart_terminal::{Result, Terminal, TerminalConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let terminal = Terminal::new(TerminalConfig::default()).await?;
//!     terminal.start_scanning();
//!
//!     // Wait for peripherals to be discovered
//!     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!
//!     for device in terminal.snapshot().discovered_devices {
//!         println!("{} {} dBm ({})", device.name, device.rssi, device.signal_quality());
//!     }
//!
//!     terminal.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod config;
pub mod data;
pub mod error;
pub mod session;
pub mod terminal;
pub mod utils;

// Re-exports for convenience
pub use config::TerminalConfig;
pub use error::{Error, Result};
pub use session::{LinkSession, SessionSnapshot, TransferCounters};
pub use terminal::{CallbackHandle, Terminal};
pub use utils::{
    ensure_line_terminator, escape_line_breaks, hex_compact, hex_spaced, strip_line_terminator,
};

// Re-export commonly used types from submodules
pub use ble::{
    ConnectionState, Device, PeripheralHandle, ProfileKind, SignalQuality, Transport,
    TransportEvent,
};
pub use data::{MessageKind, TerminalMessage};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that key types are exported
        let _ = std::any::TypeId::of::<Terminal>();
        let _ = std::any::TypeId::of::<LinkSession>();
        let _ = std::any::TypeId::of::<Error>();
        let _ = std::any::TypeId::of::<Device>();
        let _ = std::any::TypeId::of::<SessionSnapshot>();
        let _ = std::any::TypeId::of::<TerminalMessage>();
        let _ = std::any::TypeId::of::<TransportEvent>();
    }

    #[test]
    fn test_line_helpers() {
        assert_eq!(ensure_line_terminator("AT"), "AT\r\n");
        assert_eq!(strip_line_terminator("OK\r\n"), "OK");
        assert_eq!(hex_compact(&[0xde, 0xad]), "DEAD");
    }
}
