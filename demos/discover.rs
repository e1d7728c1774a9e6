//! Discover receivers, connect to the first one and print zone changes.
//!
//! ```text
//! cargo run --example discover            # broadcast discovery
//! cargo run --example discover 192.168.1.40
//! ```

use futures_util::StreamExt;
use onkyo_eiscp::{ClientConfig, Discovery, EiscpClient, EiscpError, StateUpdate};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let client = match std::env::args().nth(1) {
        Some(host) => EiscpClient::from_config(ClientConfig::for_host(host)).await?,
        None => {
            let mut devices = Discovery::default().discover(Duration::from_secs(3)).await?;
            let mut first = None;
            while let Some(device) = devices.next().await {
                println!(
                    "{} ({}) at {}:{}, zones: {:?}",
                    device.model, device.mac, device.host, device.port, device.zones
                );
                first.get_or_insert(device);
            }

            let Some(identity) = first else {
                println!("No receivers found");
                return Ok(());
            };
            identity.connect(ClientConfig::default()).await?
        }
    };

    let mut updates = client.subscribe();
    let mut status = client.watch_status();

    for zone in client.zones() {
        match client.zone(zone).refresh().await {
            Ok(state) => println!("{}: {:?}", zone, state),
            Err(e) => println!("{}: refresh failed: {}", zone, e),
        }
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("Connection: {:?}", status.borrow().state);
            }
            update = updates.recv() => match update {
                Ok(StateUpdate::ZoneChanged { zone, field, state }) => {
                    println!("{}: {:?} -> {:?}", zone, field, state);
                }
                Ok(StateUpdate::ZonesReset) => println!("State reset"),
                Err(EiscpError::Lagged(missed)) => println!("Missed {} updates", missed),
                Err(e) => {
                    println!("Subscription ended: {}", e);
                    break;
                }
            }
        }
    }

    client.shutdown().await;
    Ok(())
}
