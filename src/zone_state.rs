//! In-memory model of every zone's state.
//!
//! The receiver is the single source of truth: confirmations and unsolicited
//! pushes both overwrite the field they carry, last write wins. Frames for a
//! zone arrive in TCP order, so no merge is needed.

use crate::command::{Command, Field};
use crate::dispatcher::Confirmation;
use crate::subscription::{StateReceiver, StateUpdate};
use crate::types::{AudioInfo, HdmiOutput, InputSource, ListeningMode, Power, VideoInfo, Zone};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::broadcast;

const UPDATE_CHANNEL_CAPACITY: usize = 100;

/// Snapshot of one zone; `None` means unknown
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneState {
    pub power: Option<Power>,
    /// Raw receiver volume steps
    pub volume: Option<u8>,
    pub muted: Option<bool>,
    pub input: Option<InputSource>,
    pub listening_mode: Option<ListeningMode>,
    /// Tuner preset number
    pub preset: Option<u8>,
    pub hdmi_output: Option<HdmiOutput>,
    pub audio_info: Option<AudioInfo>,
    pub video_info: Option<VideoInfo>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ZoneState {
    pub fn is_on(&self) -> bool {
        self.power == Some(Power::On)
    }

    /// No field has been reported since the last reset
    pub fn is_unknown(&self) -> bool {
        self.power.is_none()
            && self.volume.is_none()
            && self.muted.is_none()
            && self.input.is_none()
            && self.listening_mode.is_none()
            && self.preset.is_none()
            && self.hdmi_output.is_none()
            && self.audio_info.is_none()
            && self.video_info.is_none()
    }

    fn set(&mut self, field: &Field, at: DateTime<Utc>) -> bool {
        match field {
            Field::Power(p) => self.power = Some(*p),
            Field::Volume(v) => self.volume = Some(*v),
            Field::Mute(m) => self.muted = Some(*m),
            Field::Input(source) => self.input = Some(source.clone()),
            Field::ListeningMode(mode) => self.listening_mode = Some(mode.clone()),
            Field::Preset(n) => self.preset = Some(*n),
            Field::HdmiOutput(output) => self.hdmi_output = Some(output.clone()),
            Field::AudioInfo(info) => self.audio_info = Some(info.clone()),
            Field::VideoInfo(info) => self.video_info = Some(info.clone()),
            Field::NotAvailable(_) => return false,
        }
        self.updated_at = Some(at);
        true
    }
}

/// Per-zone state with change notification
pub struct ZoneStateModel {
    zones: Mutex<BTreeMap<Zone, ZoneState>>,
    update_tx: broadcast::Sender<StateUpdate>,
}

impl ZoneStateModel {
    pub fn new(zones: &[Zone]) -> Self {
        let (update_tx, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            zones: Mutex::new(zones.iter().map(|z| (*z, ZoneState::default())).collect()),
            update_tx,
        }
    }

    /// Snapshot of a zone
    pub fn read(&self, zone: Zone) -> ZoneState {
        self.zones.lock().get(&zone).cloned().unwrap_or_default()
    }

    /// Zones currently tracked
    pub fn zones(&self) -> Vec<Zone> {
        self.zones.lock().keys().copied().collect()
    }

    /// Subscribe to changes
    pub fn subscribe(&self) -> StateReceiver {
        StateReceiver::new(self.update_tx.subscribe())
    }

    /// Apply a value the receiver pushed without being asked
    ///
    /// Returns whether the model changed. `N/A` reports are ignored.
    pub fn apply_push(&self, zone: Zone, field: Field) -> bool {
        tracing::debug!("Push for {}: {:?}", zone, field);
        self.apply(zone, field)
    }

    /// Apply the value confirming an issued command
    pub fn apply_confirmation(&self, zone: Zone, command: &Command, confirmation: &Confirmation) -> bool {
        tracing::debug!("Confirmation of {} for {}: {:?}", command, zone, confirmation.field);
        self.apply(zone, confirmation.field.clone())
    }

    /// Forget everything; state from a dropped connection cannot be trusted
    pub fn reset(&self) {
        {
            let mut zones = self.zones.lock();
            for state in zones.values_mut() {
                *state = ZoneState::default();
            }
        }
        let _ = self.update_tx.send(StateUpdate::ZonesReset);
    }

    fn apply(&self, zone: Zone, field: Field) -> bool {
        let snapshot = {
            let mut zones = self.zones.lock();
            let state = zones.entry(zone).or_default();
            if !state.set(&field, Utc::now()) {
                return false;
            }
            state.clone()
        };

        // Sent after the lock is released so subscribers may read the model
        let _ = self.update_tx.send(StateUpdate::ZoneChanged {
            zone,
            field,
            state: snapshot,
        });
        true
    }
}
