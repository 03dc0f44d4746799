//! Basic example: Discover nearby BLE peripherals
//!
//! Run with: cargo run --example scan_devices

use ble_uart_terminal::{Result, Terminal, TerminalConfig};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ble_uart_terminal=info".parse().unwrap()),
        )
        .init();

    println!("Scanning for BLE peripherals for 10 seconds...\n");

    let terminal = Terminal::new(TerminalConfig::default()).await?;

    let _handle = terminal.on_message(|message| {
        println!("{} {}", message.kind().prefix(), message.text());
    });

    // The adapter reports its state shortly after startup.
    let mut state = terminal.subscribe();
    let _ = tokio::time::timeout(
        Duration::from_secs(2),
        state.wait_for(|snapshot| snapshot.is_adapter_enabled),
    )
    .await;

    terminal.start_scanning();
    tokio::time::sleep(Duration::from_secs(10)).await;
    terminal.stop_scanning();

    let snapshot = terminal.snapshot();
    println!("\nFound {} devices:", snapshot.discovered_devices.len());
    for device in &snapshot.discovered_devices {
        let quality = device.signal_quality();
        println!(
            "  [{:<4}] {:>4} dBm  {:<24} {}",
            "#".repeat(quality.bars() as usize),
            device.rssi,
            device.name,
            device.id
        );
    }

    terminal.shutdown().await?;

    Ok(())
}
