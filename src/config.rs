use crate::error::{EiscpError, Result};
use crate::types::{InputSource, ListeningMode, VolumeResolution};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

/// Well-known EISCP port, used for both TCP control and UDP discovery
pub const EISCP_PORT: u16 = 60128;

/// Shortest delay between reconnect attempts
const MIN_BACKOFF: Duration = Duration::from_millis(1);

/// Allowed range for the polling interval, in seconds
pub const POLL_INTERVAL_RANGE: std::ops::RangeInclusive<u64> = 10..=600;

/// Per-device client configuration
///
/// Usually produced by the host platform's setup flow and stored as JSON.
/// Every field has a default, so `{}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Manual host or IP address; skips broadcast discovery
    #[serde(default)]
    pub host: Option<String>,

    /// Model name override for receivers that report an unrecognized model
    #[serde(default)]
    pub model: Option<String>,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Deadline for a command confirmation
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// First reconnect delay; doubles on every failed attempt
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Failed reconnect attempts before looking for the receiver by MAC;
    /// zero disables re-discovery
    #[serde(default = "default_rediscover_after")]
    pub rediscover_after: u32,

    #[serde(default = "default_discovery_timeout_ms")]
    pub discovery_timeout_ms: u64,

    /// Target used when looking for the receiver again after it moved
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Local pull interval; `None` relies on pushes only
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: Option<u64>,

    /// Query every zone after each (re)connect
    #[serde(default = "default_true")]
    pub refresh_on_connect: bool,

    #[serde(default)]
    pub volume_resolution: VolumeResolution,

    /// Percentage of the receiver's range mapped to a full volume level
    #[serde(default = "default_max_volume")]
    pub max_volume: f64,

    /// User names for input sources keyed by code, e.g. `"10": "Blu-ray"`
    #[serde(default)]
    pub source_names: BTreeMap<String, String>,

    /// User names for listening modes keyed by code
    #[serde(default)]
    pub listening_mode_names: BTreeMap<String, String>,
}

fn default_port() -> u16 {
    EISCP_PORT
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_backoff_initial_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    60_000
}

fn default_rediscover_after() -> u32 {
    3
}

fn default_discovery_timeout_ms() -> u64 {
    5_000
}

fn default_poll_interval_secs() -> Option<u64> {
    Some(30)
}

fn default_true() -> bool {
    true
}

fn default_max_volume() -> f64 {
    100.0
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: None,
            model: None,
            port: default_port(),
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            rediscover_after: default_rediscover_after(),
            discovery_timeout_ms: default_discovery_timeout_ms(),
            discovery: DiscoveryConfig::default(),
            poll_interval_secs: default_poll_interval_secs(),
            refresh_on_connect: true,
            volume_resolution: VolumeResolution::default(),
            max_volume: default_max_volume(),
            source_names: BTreeMap::new(),
            listening_mode_names: BTreeMap::new(),
        }
    }
}

impl ClientConfig {
    /// Configuration for a manually entered host
    pub fn for_host(host: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            ..Self::default()
        }
    }

    /// Parse and validate a stored JSON configuration
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ClientConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(host) = &self.host {
            if host.trim().is_empty() {
                return Err(EiscpError::InvalidConfig("host is empty".to_string()));
            }
        }
        if let Some(secs) = self.poll_interval_secs {
            if !POLL_INTERVAL_RANGE.contains(&secs) {
                return Err(EiscpError::InvalidConfig(format!(
                    "poll interval must be within {}..={} seconds, got {secs}",
                    POLL_INTERVAL_RANGE.start(),
                    POLL_INTERVAL_RANGE.end()
                )));
            }
        }
        if !(self.max_volume > 0.0 && self.max_volume <= 100.0) {
            return Err(EiscpError::InvalidConfig(format!(
                "max volume must be within (0, 100], got {}",
                self.max_volume
            )));
        }
        if self.backoff_initial_ms == 0 || self.backoff_max_ms < self.backoff_initial_ms {
            return Err(EiscpError::InvalidConfig(
                "backoff must start above zero and not exceed its cap".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 || self.connect_timeout_ms == 0 {
            return Err(EiscpError::InvalidConfig("timeouts must be non-zero".to_string()));
        }
        validate_names("source", &self.source_names)?;
        validate_names("listening mode", &self.listening_mode_names)?;
        Ok(())
    }

    /// Name shown for an input source; the user's name if one is configured
    pub fn source_name(&self, source: &InputSource) -> String {
        configured_name(&self.source_names, source.code()).unwrap_or_else(|| source.meaning().to_string())
    }

    /// Input source by user name, falling back to the receiver's meaning
    pub fn source_by_name(&self, name: &str) -> Option<InputSource> {
        code_for_name(&self.source_names, name)
            .map(InputSource::from_code)
            .or_else(|| InputSource::from_meaning(name))
    }

    pub fn listening_mode_name(&self, mode: &ListeningMode) -> String {
        configured_name(&self.listening_mode_names, mode.code()).unwrap_or_else(|| mode.meaning().to_string())
    }

    pub fn listening_mode_by_name(&self, name: &str) -> Option<ListeningMode> {
        code_for_name(&self.listening_mode_names, name)
            .map(ListeningMode::from_code)
            .or_else(|| ListeningMode::from_meaning(name))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval_secs.map(Duration::from_secs)
    }

    /// Delay before reconnect attempt `attempt` (1-based)
    ///
    /// 1s, 2s, 4s, ... capped at `backoff_max_ms` with the defaults.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        let delay = self.backoff_initial_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay.min(self.backoff_max_ms)).max(MIN_BACKOFF)
    }

    /// Convert a 0.0..=1.0 level into raw receiver steps
    pub fn level_to_raw(&self, level: f64) -> u8 {
        let scale = f64::from(self.volume_resolution.steps()) * self.max_volume / 100.0;
        let raw = (level.clamp(0.0, 1.0) * scale).round();
        raw.min(f64::from(crate::command::MAX_RAW_VOLUME)) as u8
    }

    /// Convert raw receiver steps into a 0.0..=1.0 level
    pub fn raw_to_level(&self, raw: u8) -> f64 {
        let scale = f64::from(self.volume_resolution.steps()) * self.max_volume / 100.0;
        (f64::from(raw) / scale).min(1.0)
    }
}

fn validate_names(kind: &str, names: &BTreeMap<String, String>) -> Result<()> {
    let mut seen = HashSet::new();
    for (code, name) in names {
        if code.len() != 2 || !code.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(EiscpError::InvalidConfig(format!("{kind} code {code:?} is not two hex digits")));
        }
        if name.trim().is_empty() || !seen.insert(name.as_str()) {
            return Err(EiscpError::InvalidConfig(format!(
                "{kind} name {name:?} is empty or used twice"
            )));
        }
    }
    Ok(())
}

fn configured_name(names: &BTreeMap<String, String>, code: &str) -> Option<String> {
    names
        .iter()
        .find(|(c, _)| c.eq_ignore_ascii_case(code))
        .map(|(_, name)| name.clone())
}

fn code_for_name<'a>(names: &'a BTreeMap<String, String>, name: &str) -> Option<&'a str> {
    names
        .iter()
        .find(|(_, n)| n.as_str() == name)
        .map(|(code, _)| code.as_str())
}

/// Where discovery queries are sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Broadcast (or unicast) target for the query datagram
    pub target: SocketAddr,

    /// Also send the Pioneer-flavoured query
    #[serde(default = "default_true")]
    pub pioneer: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            target: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, EISCP_PORT)),
            pioneer: true,
        }
    }
}
