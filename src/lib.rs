//! Rust library for discovering and controlling Onkyo and Pioneer AV receivers
//!
//! This library provides an async API for the EISCP protocol spoken by Onkyo,
//! Pioneer and Integra receivers on TCP/UDP port 60128. It supports:
//!
//! - Discovery via UDP broadcast, de-duplicated by MAC address
//! - A persistent connection that reconnects with exponential backoff
//! - Power, volume, mute, input and listening mode control per zone
//! - Tuner presets, HDMI output selection and audio/video signal details
//! - Commands that wait for the receiver's confirmation
//! - Zone state kept in sync from confirmations and unsolicited reports
//! - Real-time state update subscriptions
//!
//! # Quick Start
//!
//! ```no_run
//! use onkyo_eiscp::{ClientConfig, Discovery, InputSource, StateUpdate, Zone};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Find receivers on the local network
//!     let devices = Discovery::default().discover_all(Duration::from_secs(3)).await?;
//!
//!     if let Some(identity) = devices.first() {
//!         println!("Found {} at {}", identity.model, identity.host);
//!
//!         let client = identity.connect(ClientConfig::default()).await?;
//!
//!         // Control the main zone
//!         client.main().power_on().await?;
//!         client.main().select_input(InputSource::Tv).await?;
//!         client.zone(Zone::Zone2).set_volume(30).await?;
//!
//!         // Subscribe to state updates
//!         let mut updates = client.subscribe();
//!         while let Ok(update) = updates.recv().await {
//!             if let StateUpdate::ZoneChanged { zone, field, .. } = update {
//!                 println!("{}: {:?}", zone, field);
//!                 break;
//!             }
//!         }
//!
//!         client.shutdown().await;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Frame**: EISCP binary framing as a `tokio_util` codec
//! - **Command**: Closed table of zone commands and their wire codes
//! - **Discovery**: UDP broadcast and unicast probing
//! - **Connection**: Supervised TCP session with reconnect and polling
//! - **Dispatcher**: Matches confirmations to pending commands
//! - **Zone state**: Per-zone state model with change notification
//! - **Client**: Per-receiver entry point and zone controls

mod client;
mod command;
mod config;
mod connection;
mod discovery;
mod dispatcher;
mod error;
mod frame;
mod subscription;
mod types;
mod zone;
mod zone_state;

// Public exports
pub use client::EiscpClient;
pub use command::{
    code_for, operations_for, Action, Command, Field, Operation, Status, MAX_PRESET, MAX_RAW_VOLUME,
};
pub use config::{ClientConfig, DiscoveryConfig, EISCP_PORT, POLL_INTERVAL_RANGE};
pub use connection::{ConnectionState, ConnectionStatus};
pub use discovery::{zone_layout, Discovery};
pub use dispatcher::Confirmation;
pub use error::{DecodeError, EiscpError, Result};
pub use frame::{decode_datagram, EiscpCodec, Frame};
pub use subscription::{StateReceiver, StateUpdate};
pub use types::{
    AudioInfo, DeviceIdentity, HdmiOutput, InputSource, ListeningMode, MacAddress, Power, VideoInfo,
    VolumeResolution, Zone,
};
pub use zone::ZoneControl;
pub use zone_state::{ZoneState, ZoneStateModel};
