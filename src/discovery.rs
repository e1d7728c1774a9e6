use crate::config::DiscoveryConfig;
use crate::error::{EiscpError, Result};
use crate::frame::{decode_datagram, Frame};
use crate::types::{DeviceIdentity, MacAddress, Zone};
use async_stream::stream;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::{timeout_at, Instant};

const QUERY: &str = "ECNQSTN";
const REPLY_PREFIX: &str = "ECN";
const UNIT_ONKYO: u8 = b'x';
const UNIT_PIONEER: u8 = b'p';
const MAX_DATAGRAM: usize = 1024;

/// Zone count per model family, matched by model name prefix
const MODEL_FAMILIES: &[(&str, usize)] = &[
    ("TX-RZ", 3),
    ("TX-NR", 2),
    ("TX-SR", 2),
    ("TX-8", 2),
    ("HT-R", 2),
    ("VSX-", 2),
    ("SC-LX", 3),
    ("DRX-", 3),
    ("DTR-", 3),
];

/// Finds receivers on the local network
///
/// Each call to [`Discovery::discover`] sends a fresh broadcast and yields
/// receivers as their replies arrive, until the timeout.
///
/// # Example
///
/// ```no_run
/// use futures_util::StreamExt;
/// use onkyo_eiscp::Discovery;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let discovery = Discovery::default();
///     let mut devices = discovery.discover(Duration::from_secs(3)).await?;
///
///     while let Some(device) = devices.next().await {
///         println!("Found {} at {} ({})", device.model, device.host, device.mac);
///     }
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    config: DiscoveryConfig,
}

impl Discovery {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Broadcast a query and stream the receivers that answer
    ///
    /// The stream ends once `wait` has elapsed. Receivers answering both the
    /// Onkyo and the Pioneer query are yielded once.
    pub async fn discover(&self, wait: Duration) -> Result<BoxStream<'static, DeviceIdentity>> {
        let deadline = Instant::now() + wait;
        let socket = bind_for(self.config.target).await?;
        socket.set_broadcast(true)?;

        tracing::info!("Broadcasting discovery query to {}", self.config.target);
        for frame in queries(self.config.pioneer) {
            socket.send_to(&frame.to_bytes(), self.config.target).await?;
        }

        Ok(Box::pin(stream! {
            let mut seen = HashSet::new();
            let mut buf = vec![0u8; MAX_DATAGRAM];

            loop {
                let (len, from) = match timeout_at(deadline, socket.recv_from(&mut buf)).await {
                    Err(_) => break,
                    Ok(Ok(received)) => received,
                    // ICMP unreachable from a previous send on some platforms
                    Ok(Err(e)) if matches!(e.kind(), ErrorKind::ConnectionReset | ErrorKind::ConnectionRefused) => continue,
                    Ok(Err(e)) => {
                        tracing::error!("Discovery socket error: {}", e);
                        break;
                    }
                };

                match parse_reply(&buf[..len], from) {
                    Ok(Some(identity)) => {
                        if seen.insert(identity.mac) {
                            tracing::info!("Found {} at {} ({})", identity.model, identity.host, identity.mac);
                            yield identity;
                        } else {
                            tracing::debug!("Duplicate reply from {} ({})", from, identity.mac);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!("Dropping discovery reply from {}: {}", from, e),
                }
            }

            tracing::debug!("Discovery finished, {} receiver(s) found", seen.len());
        }))
    }

    /// Run discovery to completion and collect the results
    pub async fn discover_all(&self, wait: Duration) -> Result<Vec<DeviceIdentity>> {
        Ok(self.discover(wait).await?.collect().await)
    }

    /// Query a single host directly, for manually configured receivers
    pub async fn probe(&self, host: &str, port: u16, wait: Duration) -> Result<DeviceIdentity> {
        let deadline = Instant::now() + wait;
        let target = lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| EiscpError::NotFound(host.to_string()))?;

        let socket = bind_for(target).await?;
        tracing::info!("Probing {}", target);
        for frame in queries(self.config.pioneer) {
            socket.send_to(&frame.to_bytes(), target).await?;
        }

        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (len, from) = match timeout_at(deadline, socket.recv_from(&mut buf)).await {
                Err(_) => return Err(EiscpError::NotFound(host.to_string())),
                Ok(Ok(received)) => received,
                Ok(Err(e)) if matches!(e.kind(), ErrorKind::ConnectionReset | ErrorKind::ConnectionRefused) => {
                    continue
                }
                Ok(Err(e)) => return Err(e.into()),
            };

            match parse_reply(&buf[..len], from) {
                Ok(Some(identity)) => return Ok(identity),
                Ok(None) => {}
                Err(e) => tracing::warn!("Dropping probe reply from {}: {}", from, e),
            }
        }
    }

    /// Look for a known receiver by its MAC address
    ///
    /// Used to follow a receiver that moved to a different address.
    pub async fn find_by_mac(&self, mac: MacAddress, wait: Duration) -> Result<DeviceIdentity> {
        let mut devices = self.discover(wait).await?;
        while let Some(identity) = devices.next().await {
            if identity.mac == mac {
                return Ok(identity);
            }
        }
        Err(EiscpError::NotFound(mac.to_string()))
    }
}

fn queries(pioneer: bool) -> Vec<Frame> {
    let mut frames = vec![Frame::with_unit(UNIT_ONKYO, QUERY)];
    if pioneer {
        frames.push(Frame::with_unit(UNIT_PIONEER, QUERY));
    }
    frames
}

async fn bind_for(target: SocketAddr) -> Result<UdpSocket> {
    let local = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    Ok(UdpSocket::bind(local).await?)
}

/// Parse an `ECN<model>/<port>/<region>/<identifier>` reply
///
/// Returns `Ok(None)` for datagrams that are not replies, such as another
/// controller's query.
fn parse_reply(datagram: &[u8], from: SocketAddr) -> Result<Option<DeviceIdentity>> {
    let frame = decode_datagram(datagram)?;

    let Some(body) = frame.message.strip_prefix(REPLY_PREFIX) else {
        return Ok(None);
    };
    if body == "QSTN" {
        return Ok(None);
    }

    let parts: Vec<&str> = body.split('/').collect();
    let [model, port, region, identifier] = parts.as_slice() else {
        return Err(EiscpError::InvalidResponse(format!("malformed reply {:?}", frame.message)));
    };

    let port = port
        .trim()
        .parse::<u16>()
        .map_err(|_| EiscpError::InvalidResponse(format!("invalid port in {:?}", frame.message)))?;
    let mac: MacAddress = identifier.trim().parse()?;
    let model = model.trim().to_string();

    Ok(Some(DeviceIdentity {
        zones: zones_for(&model),
        model,
        mac,
        host: from.ip().to_string(),
        port,
        region: region.trim().to_string(),
        protocol_version: frame.version,
    }))
}

/// Zones a model family provides
pub fn zone_layout(model: &str) -> Result<Vec<Zone>> {
    let model = model.to_ascii_uppercase();
    MODEL_FAMILIES
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map(|(_, count)| Zone::ALL[..*count].to_vec())
        .ok_or_else(|| EiscpError::UnsupportedModel(model))
}

/// Zone layout with a best-effort fallback for unknown models
pub(crate) fn zones_for(model: &str) -> Vec<Zone> {
    zone_layout(model).unwrap_or_else(|e| {
        tracing::warn!("{}; assuming main and zone2", e);
        vec![Zone::Main, Zone::Zone2]
    })
}
