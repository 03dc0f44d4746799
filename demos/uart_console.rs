//! Interactive example: Serial console over BLE UART
//!
//! Connects to the strongest peripheral (or the first one whose name contains
//! the given filter), then forwards stdin lines to it. Lines starting with
//! `hex:` are sent as raw bytes. Type `/quit` to exit.
//!
//! Run with: cargo run --example uart_console -- [name-filter]

use ble_uart_terminal::{ConnectionState, Result, Terminal, TerminalConfig};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Decode `hex:` input, ignoring whitespace between digits.
fn parse_hex(input: &str) -> Option<Vec<u8>> {
    let digits: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(digits).ok()
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ble_uart_terminal=warn".parse().unwrap()),
        )
        .init();

    let filter = std::env::args().nth(1);

    let terminal = Terminal::new(TerminalConfig::default()).await?;
    let _handle = terminal.on_message(|message| {
        println!("{} {}", message.kind().prefix(), message.text());
    });

    let mut state = terminal.subscribe();
    let _ = tokio::time::timeout(
        Duration::from_secs(2),
        state.wait_for(|snapshot| snapshot.is_adapter_enabled),
    )
    .await;

    println!("Scanning for 5 seconds...");
    terminal.start_scanning();
    tokio::time::sleep(Duration::from_secs(5)).await;
    terminal.stop_scanning();

    let snapshot = terminal.snapshot();
    let device = snapshot.discovered_devices.iter().find(|device| match &filter {
        Some(filter) => device.name.contains(filter.as_str()),
        None => true,
    });

    let Some(device) = device else {
        println!("No matching device found");
        terminal.shutdown().await?;
        return Ok(());
    };

    terminal.connect(device);

    let _ = tokio::time::timeout(
        Duration::from_secs(2),
        state.wait_for(|snapshot| snapshot.connection_state != ConnectionState::Disconnected),
    )
    .await;
    let ready = tokio::time::timeout(
        Duration::from_secs(15),
        state.wait_for(|snapshot| {
            snapshot.is_ready || snapshot.connection_state == ConnectionState::Disconnected
        }),
    )
    .await
    .ok()
    .and_then(|result| result.ok().map(|snapshot| snapshot.is_ready))
    .unwrap_or(false);

    if !ready {
        println!("Device not ready, giving up");
        terminal.shutdown().await?;
        return Ok(());
    }

    println!("Ready. Type lines to send, 'hex:01 02' for raw bytes, '/quit' to exit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line == "/quit" {
            break;
        }
        match line.strip_prefix("hex:") {
            Some(hex) => match parse_hex(hex) {
                Some(bytes) => terminal.send_bytes(bytes),
                None => println!("Invalid hex: {}", hex),
            },
            None => terminal.send_text(line),
        }
    }

    terminal.disconnect();
    tokio::time::sleep(Duration::from_millis(500)).await;

    println!("\n--- Session log ---\n{}", terminal.export_messages());
    println!("History: {:?}", terminal.history());

    terminal.shutdown().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("de ad BE ef"), Some(vec![0xde, 0xad, 0xbe, 0xef]));
        assert_eq!(parse_hex(""), Some(Vec::new()));
        assert_eq!(parse_hex("abc"), None);
        assert_eq!(parse_hex("zz"), None);
        // Multi-byte characters must not panic.
        assert_eq!(parse_hex("é1"), None);
    }
}
