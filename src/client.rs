use crate::command::Command;
use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionStatus};
use crate::discovery::{zones_for, Discovery};
use crate::dispatcher::{Confirmation, Dispatcher};
use crate::error::{EiscpError, Result};
use crate::frame::Frame;
use crate::subscription::StateReceiver;
use crate::types::{DeviceIdentity, Zone};
use crate::zone::ZoneControl;
use crate::zone_state::{ZoneState, ZoneStateModel};
use std::sync::Arc;
use tokio::sync::watch;

/// Client for one Onkyo or Pioneer receiver
///
/// The `EiscpClient` owns the connection to a receiver, keeps the state of
/// every zone in sync and provides per-zone controls.
pub struct EiscpClient {
    identity: DeviceIdentity,
    config: Arc<ClientConfig>,
    zones: Arc<ZoneStateModel>,
    dispatcher: Arc<Dispatcher>,
    connection: Connection,
}

impl EiscpClient {
    /// Connect to a discovered receiver
    ///
    /// A `model` override in the configuration replaces the reported model
    /// and the zone layout derived from it.
    pub async fn connect(mut identity: DeviceIdentity, config: ClientConfig) -> Result<Self> {
        config.validate()?;

        if let Some(model) = &config.model {
            tracing::info!("Using configured model {} instead of {}", model, identity.model);
            identity.model = model.clone();
            identity.zones = zones_for(model);
        }

        let config = Arc::new(config);
        let zones = Arc::new(ZoneStateModel::new(&identity.zones));
        let dispatcher = Arc::new(Dispatcher::new(zones.clone()));
        let connection = Connection::connect(&identity, config.clone(), dispatcher.clone(), zones.clone()).await?;

        Ok(Self {
            identity,
            config,
            zones,
            dispatcher,
            connection,
        })
    }

    /// Connect to the manually configured host
    ///
    /// The host is probed for its identity first, so the MAC address is
    /// known for later re-discovery.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use onkyo_eiscp::{ClientConfig, EiscpClient};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let client = EiscpClient::from_config(ClientConfig::for_host("192.168.1.40")).await?;
    ///     client.main().set_volume_level(0.3).await?;
    ///     Ok(())
    /// }
    /// ```
    pub async fn from_config(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let host = config
            .host
            .clone()
            .ok_or_else(|| EiscpError::InvalidConfig("no host configured".to_string()))?;

        let discovery = Discovery::new(config.discovery.clone());
        let identity = discovery.probe(&host, config.port, config.discovery_timeout()).await?;

        Self::connect(identity, config).await
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Controls for one zone
    pub fn zone(&self, zone: Zone) -> ZoneControl {
        ZoneControl::new(zone, self.dispatcher.clone(), self.zones.clone(), self.config.clone())
    }

    /// Controls for the main zone
    pub fn main(&self) -> ZoneControl {
        self.zone(Zone::Main)
    }

    /// Zones this receiver provides
    pub fn zones(&self) -> Vec<Zone> {
        self.zones.zones()
    }

    /// Issue a command and wait for its confirmation
    pub async fn issue(&self, command: Command) -> Result<Confirmation> {
        self.dispatcher.issue(command, self.config.request_timeout()).await
    }

    /// Write a raw frame without waiting for a confirmation
    ///
    /// Reports triggered by it are handled like any other push.
    pub async fn send(&self, frame: Frame) -> Result<()> {
        self.connection.send(frame).await
    }

    /// Last known state of a zone
    pub fn state(&self, zone: Zone) -> ZoneState {
        self.zones.read(zone)
    }

    /// Subscribe to state changes of every zone
    ///
    /// # Example
    ///
    /// ```no_run
    /// use onkyo_eiscp::{ClientConfig, EiscpClient, StateUpdate};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let client = EiscpClient::from_config(ClientConfig::for_host("192.168.1.40")).await?;
    ///     let mut rx = client.subscribe();
    ///
    ///     while let Ok(update) = rx.recv().await {
    ///         if let StateUpdate::ZoneChanged { zone, state, .. } = update {
    ///             println!("{}: {:?}", zone, state);
    ///         }
    ///     }
    ///     Ok(())
    /// }
    /// ```
    pub fn subscribe(&self) -> StateReceiver {
        self.zones.subscribe()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.connection.watch()
    }

    /// Whether the receiver is currently reachable
    ///
    /// Zone state is unknown while this is false.
    pub fn is_available(&self) -> bool {
        self.connection.is_connected()
    }

    /// Close the connection and stop reconnecting
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down client for {} ({})", self.identity.model, self.identity.mac);
        self.connection.shutdown().await;
    }
}
