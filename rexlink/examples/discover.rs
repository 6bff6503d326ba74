//! Discover devices on the local network and greet each one that connects
//!
//! Run with `RUST_LOG=rexlink=debug cargo run --example discover`.

use rexlink::{Client, ClientConfig, ClientEvent, Device, DeviceEvent};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> rexlink::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let client = Client::bind(ClientConfig::default().with_auto_connect(true)).await?;
    info!("Waiting for beacons on {}", client.discovery_addr());

    let mut events = client.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(ClientEvent::Discovered(found)) => info!("Found {}", found.info),
                Ok(ClientEvent::Connected(device)) => {
                    tokio::spawn(async move {
                        if let Err(e) = greet(device).await {
                            warn!("Session error: {}", e);
                        }
                    });
                }
                Ok(ClientEvent::Disconnected(device)) => info!("{} went away", device),
                Err(_) => break,
            },
        }
    }

    client.shutdown().await;
    Ok(())
}

async fn greet(device: Device) -> rexlink::Result<()> {
    if let Some(features) = device.features() {
        info!("{} connected: {}", device, features);
    }

    if let Some(display) = device.display() {
        display.initialize(16, 2, false).await?;
        display.clear().await?;
        display.write_at("Hello from Rust", 0, 0).await?;
        display.backlight().set(true).await?;
    }
    if let Some(buzzer) = device.buzzer() {
        buzzer.hold(200).await?;
    }

    let mut events = device.subscribe();
    while let Ok(event) = events.recv().await {
        match event {
            DeviceEvent::KeyTyped(key) => info!("{} key {:?}", device, key),
            DeviceEvent::InputChanged { index, value } => {
                info!("{} input {} = {}", device, index, value)
            }
            DeviceEvent::ImageAcquired(image) => info!(
                "{} captured {}x{} on {}",
                device, image.width, image.height, image.scanner
            ),
            DeviceEvent::Disconnected => break,
            DeviceEvent::Connected => {}
        }
    }
    Ok(())
}
