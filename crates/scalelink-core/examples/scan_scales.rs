//! Example: Scanning for Supported Scales
//!
//! This example scans for nearby Bluetooth body scales and prints
//! every supported device it finds, together with the driver that
//! would be used to talk to it.
//!
//! Run with: `cargo run --example scan_scales`

use std::sync::Arc;
use std::time::Duration;

use scalelink_core::{format_device_name, BleTransport, DriverRegistry, ScaleCentral};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    println!("Scanning for scales...");
    println!();

    let registry = Arc::new(DriverRegistry::builtin());
    let transport = Arc::new(BleTransport::new(registry).await?);
    let (central, _events) = ScaleCentral::new(transport);

    central.start_discovery().await?;
    tokio::time::sleep(Duration::from_secs(10)).await;
    central.stop_discovery().await;

    let devices = central.discovered_devices();
    if devices.is_empty() {
        println!("No supported scales found.");
        println!();
        println!("Make sure:");
        println!("  - Your scale is awake (step on it briefly)");
        println!("  - Bluetooth is enabled on this computer");
        println!("  - The scale is within range");
    } else {
        println!("Found {} scale(s):", devices.len());
        println!();
        for device in &devices {
            println!("  {}", format_device_name(&device.name, &device.address));
            println!("    Driver: {}", device.driver_id);
            println!();
        }
    }

    Ok(())
}
