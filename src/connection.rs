//! Persistent TCP session to one receiver.
//!
//! A supervisor task owns the socket. It feeds decoded frames to the
//! dispatcher, polls the receiver while connected and reconnects with
//! exponential backoff when the session drops.

use crate::config::ClientConfig;
use crate::discovery::Discovery;
use crate::dispatcher::Dispatcher;
use crate::error::{EiscpError, Result};
use crate::frame::{EiscpCodec, Frame};
use crate::types::{DeviceIdentity, MacAddress};
use crate::zone_state::ZoneStateModel;
use chrono::{DateTime, Utc};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Instant, Interval, MissedTickBehavior};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Link state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Observable connection status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Host currently used; changes when the receiver is found elsewhere
    pub host: String,
    /// Reconnect attempt in progress, zero while connected
    pub attempt: u32,
    /// Last time a frame was received
    pub last_seen: Option<DateTime<Utc>>,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

/// Handle to the supervisor task of one receiver
pub struct Connection {
    dispatcher: Arc<Dispatcher>,
    status_rx: watch::Receiver<ConnectionStatus>,
    shutdown: CancellationToken,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Connect to a receiver and start supervising the session
    ///
    /// Only this first attempt reports failure to the caller. Once connected,
    /// dropped sessions are re-established in the background.
    pub(crate) async fn connect(
        identity: &DeviceIdentity,
        config: Arc<ClientConfig>,
        dispatcher: Arc<Dispatcher>,
        zones: Arc<ZoneStateModel>,
    ) -> Result<Self> {
        let (status_tx, status_rx) = watch::channel(ConnectionStatus {
            state: ConnectionState::Connecting,
            host: identity.host.clone(),
            attempt: 0,
            last_seen: None,
        });

        let stream = match open_stream(&identity.host, identity.port, config.connect_timeout()).await {
            Ok(stream) => stream,
            Err(e) => {
                status_tx.send_modify(|s| s.state = ConnectionState::Disconnected);
                return Err(e);
            }
        };

        let shutdown = CancellationToken::new();
        let supervisor = Supervisor {
            mac: identity.mac,
            host: identity.host.clone(),
            port: identity.port,
            config,
            dispatcher: dispatcher.clone(),
            zones,
            status_tx,
            shutdown: shutdown.clone(),
        };

        // Attach before returning so commands can be issued right away
        let session = supervisor.start_session(stream).await;
        let task = tokio::spawn(supervisor.run(session));

        Ok(Self {
            dispatcher,
            status_rx,
            shutdown,
            task: parking_lot::Mutex::new(Some(task)),
        })
    }

    /// Current status
    pub fn status(&self) -> ConnectionStatus {
        self.status_rx.borrow().clone()
    }

    /// Watch status changes
    pub fn watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.status_rx.borrow().is_connected()
    }

    /// Write a frame without waiting for a confirmation
    pub async fn send(&self, frame: Frame) -> Result<()> {
        if !self.is_connected() {
            return Err(EiscpError::NotConnected);
        }
        self.dispatcher.send(frame).await
    }

    /// Stop the supervisor, closing the socket
    ///
    /// Pending commands fail with `ConnectionLost`. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if timeout(SHUTDOWN_GRACE, task).await.is_err() {
                tracing::warn!("Connection task did not stop within {:?}", SHUTDOWN_GRACE);
            }
        }
        self.dispatcher.detach().await;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn open_stream(host: &str, port: u16, wait: Duration) -> Result<TcpStream> {
    let addr = format!("{}:{}", host, port);
    tracing::info!("Connecting to {}", addr);

    match timeout(wait, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => {
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!("Failed to set TCP_NODELAY: {}", e);
            }
            Ok(stream)
        }
        Ok(Err(source)) => Err(EiscpError::Connect { host: addr, source }),
        Err(_) => Err(EiscpError::ConnectTimeout { host: addr }),
    }
}

struct Session {
    frames: SplitStream<Framed<TcpStream, EiscpCodec>>,
    writer: JoinHandle<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Lost,
    Shutdown,
}

struct Supervisor {
    mac: MacAddress,
    host: String,
    port: u16,
    config: Arc<ClientConfig>,
    dispatcher: Arc<Dispatcher>,
    zones: Arc<ZoneStateModel>,
    status_tx: watch::Sender<ConnectionStatus>,
    shutdown: CancellationToken,
}

impl Supervisor {
    async fn run(mut self, mut session: Session) {
        loop {
            let end = self.run_session(session).await;
            if end == SessionEnd::Lost {
                self.set_state(ConnectionState::Reconnecting, 0);
            }

            self.dispatcher.detach().await;
            self.zones.reset();

            if end == SessionEnd::Shutdown {
                break;
            }

            tracing::warn!("Connection to {}:{} lost", self.host, self.port);
            match self.reconnect().await {
                Some(next) => session = next,
                None => break,
            }
        }

        self.set_state(ConnectionState::Disconnected, 0);
        tracing::info!("Connection to {}:{} closed", self.host, self.port);
    }

    /// Split a fresh stream, spawn its writer and attach it to the dispatcher
    async fn start_session(&self, stream: TcpStream) -> Session {
        let (mut sink, frames) = Framed::new(stream, EiscpCodec).split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();

        let writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = sink.send(frame).await {
                    tracing::error!("Failed to send frame: {}", e);
                    break;
                }
            }
        });

        self.dispatcher.attach(tx).await;
        self.set_state(ConnectionState::Connected, 0);
        tracing::info!("Connected to {}:{}", self.host, self.port);

        Session { frames, writer }
    }

    async fn run_session(&self, mut session: Session) -> SessionEnd {
        let mut refresh = self.config.refresh_on_connect.then(|| self.spawn_refresh());
        let mut poll = self.config.poll_interval().map(|period| {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });

        let end = loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break SessionEnd::Shutdown,
                _ = &mut session.writer => {
                    tracing::error!("Writer for {}:{} stopped", self.host, self.port);
                    break SessionEnd::Lost;
                }
                _ = next_tick(&mut poll) => {
                    if refresh.as_ref().map_or(true, JoinHandle::is_finished) {
                        tracing::debug!("Polling {}:{}", self.host, self.port);
                        refresh = Some(self.spawn_refresh());
                    } else {
                        tracing::debug!("Previous poll still running, skipping");
                    }
                }
                frame = session.frames.next() => match frame {
                    Some(Ok(frame)) => {
                        tracing::debug!("Received: {}", frame.message);
                        self.status_tx.send_modify(|s| s.last_seen = Some(Utc::now()));
                        self.dispatcher.resolve(&frame).await;
                    }
                    Some(Err(e)) => {
                        tracing::error!("Session error from {}:{}: {}", self.host, self.port, e);
                        break SessionEnd::Lost;
                    }
                    None => {
                        tracing::info!("{}:{} closed the connection", self.host, self.port);
                        break SessionEnd::Lost;
                    }
                }
            }
        };

        if let Some(refresh) = refresh {
            refresh.abort();
        }
        session.writer.abort();
        end
    }

    /// Query every zone in the background
    fn spawn_refresh(&self) -> JoinHandle<()> {
        let dispatcher = self.dispatcher.clone();
        let zones = self.zones.zones();
        let deadline = self.config.request_timeout();

        tokio::spawn(async move {
            for zone in zones {
                if let Err(e) = dispatcher.query_zone(zone, deadline).await {
                    tracing::debug!("Refresh stopped at {}: {}", zone, e);
                    break;
                }
            }
        })
    }

    /// Retry until connected again; `None` on shutdown
    async fn reconnect(&mut self) -> Option<Session> {
        let shutdown = self.shutdown.clone();
        let mut attempt = 0u32;

        loop {
            attempt = attempt.saturating_add(1);
            let delay = self.config.backoff(attempt);
            self.set_state(ConnectionState::Reconnecting, attempt);
            tracing::info!("Reconnecting to {}:{} in {:?} (attempt {})", self.host, self.port, delay, attempt);

            tokio::select! {
                _ = shutdown.cancelled() => return None,
                _ = sleep(delay) => {}
            }

            if self.config.rediscover_after > 0 && attempt % self.config.rediscover_after == 0 {
                tokio::select! {
                    _ = shutdown.cancelled() => return None,
                    _ = self.rediscover() => {}
                }
            }

            self.set_state(ConnectionState::Connecting, attempt);
            let result = tokio::select! {
                _ = shutdown.cancelled() => return None,
                result = open_stream(&self.host, self.port, self.config.connect_timeout()) => result,
            };

            match result {
                Ok(stream) => return Some(self.start_session(stream).await),
                Err(e) => tracing::warn!("Reconnect attempt {} failed: {}", attempt, e),
            }
        }
    }

    /// Look for the receiver by MAC in case it moved to another address
    async fn rediscover(&mut self) {
        let discovery = Discovery::new(self.config.discovery.clone());
        match discovery.find_by_mac(self.mac, self.config.discovery_timeout()).await {
            Ok(identity) if identity.host != self.host || identity.port != self.port => {
                tracing::info!(
                    "Receiver {} moved from {}:{} to {}:{}",
                    self.mac,
                    self.host,
                    self.port,
                    identity.host,
                    identity.port
                );
                self.host = identity.host;
                self.port = identity.port;
                let host = self.host.clone();
                self.status_tx.send_modify(|s| s.host = host);
            }
            Ok(_) => tracing::debug!("Receiver {} still at {}", self.mac, self.host),
            Err(e) => tracing::debug!("Re-discovery of {} failed: {}", self.mac, e),
        }
    }

    fn set_state(&self, state: ConnectionState, attempt: u32) {
        self.status_tx.send_modify(|s| {
            s.state = state;
            s.attempt = attempt;
        });
    }
}

async fn next_tick(poll: &mut Option<Interval>) {
    match poll {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
