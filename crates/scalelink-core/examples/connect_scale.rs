//! Example: Connecting to a Scale
//!
//! This example scans until it finds a supported scale, connects to it,
//! and prints every lifecycle event until a measurement arrives or the
//! session ends.
//!
//! Run with: `cargo run --example connect_scale`

use std::sync::Arc;
use std::time::Duration;

use scalelink_core::{
    BleTransport, DiscoveryEvent, DriverRegistry, InfoCode, LifecycleEvent, ScaleCentral,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let registry = Arc::new(DriverRegistry::builtin());
    let transport = Arc::new(BleTransport::new(registry).await?);
    let (central, mut events) = ScaleCentral::new(transport);

    println!("Scanning for a supported scale...");
    let mut discovery = central.discovery_events();
    central.start_discovery().await?;

    let found = tokio::time::timeout(Duration::from_secs(30), discovery.recv()).await;
    central.stop_discovery().await;

    let DiscoveryEvent::DeviceFound {
        address,
        name,
        driver_id,
    } = found.map_err(|_| "no supported scale found within 30 seconds")??
    else {
        return Err("unexpected discovery event".into());
    };

    println!("Connecting to {name} [{address}] using the {driver_id} driver...");
    central.connect(&address, &driver_id).await?;

    while let Some(event) = events.recv().await {
        match event {
            LifecycleEvent::ConnectionEstablished => println!("Link is up, initializing..."),
            LifecycleEvent::Init => println!("Scale initialized."),
            LifecycleEvent::InfoMessage {
                code: InfoCode::StepOnScale,
                ..
            } => println!("Step on the scale now."),
            LifecycleEvent::InfoMessage { code, arg } => {
                println!("Scale says: {code:?} {arg:?}");
            }
            LifecycleEvent::ConnectionRetrying { attempt } => {
                println!("Connection attempt failed, retrying ({attempt})...");
            }
            LifecycleEvent::DataReady { measurement } => {
                println!();
                println!("Measurement: {measurement}");
                break;
            }
            event if event.is_terminal() => {
                println!("Session ended: {event:?}");
                return Ok(());
            }
            _ => {}
        }
    }

    central.disconnect().await?;
    Ok(())
}
