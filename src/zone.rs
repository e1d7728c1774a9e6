use crate::command::{Action, Command, Field, MAX_PRESET, MAX_RAW_VOLUME};
use crate::config::ClientConfig;
use crate::dispatcher::{Confirmation, Dispatcher};
use crate::error::{EiscpError, Result};
use crate::types::{AudioInfo, HdmiOutput, InputSource, ListeningMode, Power, VideoInfo, Zone};
use crate::zone_state::{ZoneState, ZoneStateModel};
use std::sync::Arc;

/// Controls for a single zone of a receiver
///
/// Every method waits for the receiver to confirm the change. The zone state
/// is updated from that confirmation, never optimistically.
#[derive(Clone)]
pub struct ZoneControl {
    zone: Zone,
    dispatcher: Arc<Dispatcher>,
    zones: Arc<ZoneStateModel>,
    config: Arc<ClientConfig>,
}

impl ZoneControl {
    pub(crate) fn new(
        zone: Zone,
        dispatcher: Arc<Dispatcher>,
        zones: Arc<ZoneStateModel>,
        config: Arc<ClientConfig>,
    ) -> Self {
        Self {
            zone,
            dispatcher,
            zones,
            config,
        }
    }

    pub fn zone(&self) -> Zone {
        self.zone
    }

    async fn issue(&self, action: Action) -> Result<Confirmation> {
        self.dispatcher
            .issue(Command::new(self.zone, action), self.config.request_timeout())
            .await
    }

    // Power

    pub async fn power_on(&self) -> Result<Confirmation> {
        self.issue(Action::SetPower(Power::On)).await
    }

    pub async fn power_off(&self) -> Result<Confirmation> {
        self.issue(Action::SetPower(Power::Standby)).await
    }

    // Volume

    /// Set the volume in raw receiver steps (0 to 200)
    pub async fn set_volume(&self, raw: u8) -> Result<Confirmation> {
        if raw > MAX_RAW_VOLUME {
            return Err(EiscpError::InvalidArgument(format!(
                "volume {} exceeds {}",
                raw, MAX_RAW_VOLUME
            )));
        }
        self.issue(Action::SetVolume(raw)).await
    }

    /// Set the volume as a level between 0.0 and 1.0
    ///
    /// The level is scaled by the configured volume resolution and maximum
    /// volume.
    pub async fn set_volume_level(&self, level: f64) -> Result<Confirmation> {
        if !(0.0..=1.0).contains(&level) {
            return Err(EiscpError::InvalidArgument(format!("volume level {} outside 0.0..=1.0", level)));
        }
        self.issue(Action::SetVolume(self.config.level_to_raw(level))).await
    }

    pub async fn volume_up(&self) -> Result<Confirmation> {
        self.issue(Action::VolumeUp).await
    }

    pub async fn volume_down(&self) -> Result<Confirmation> {
        self.issue(Action::VolumeDown).await
    }

    /// Current volume as a level between 0.0 and 1.0, if known
    pub fn volume_level(&self) -> Option<f64> {
        self.state().volume.map(|raw| self.config.raw_to_level(raw))
    }

    // Mute

    pub async fn set_mute(&self, muted: bool) -> Result<Confirmation> {
        self.issue(Action::SetMute(muted)).await
    }

    pub async fn toggle_mute(&self) -> Result<Confirmation> {
        self.issue(Action::ToggleMute).await
    }

    // Input

    pub async fn select_input(&self, source: InputSource) -> Result<Confirmation> {
        self.issue(Action::SelectInput(source)).await
    }

    pub async fn input_up(&self) -> Result<Confirmation> {
        self.issue(Action::InputUp).await
    }

    pub async fn input_down(&self) -> Result<Confirmation> {
        self.issue(Action::InputDown).await
    }

    /// Select an input by its configured name or its receiver meaning
    pub async fn select_input_by_name(&self, name: &str) -> Result<Confirmation> {
        let source = self
            .config
            .source_by_name(name)
            .ok_or_else(|| EiscpError::InvalidArgument(format!("no input source named {name:?}")))?;
        self.select_input(source).await
    }

    /// Display name of the current input, if known
    pub fn input_name(&self) -> Option<String> {
        self.state().input.map(|source| self.config.source_name(&source))
    }

    // Listening mode

    /// Select a listening mode; only the main zone has one
    pub async fn select_listening_mode(&self, mode: ListeningMode) -> Result<Confirmation> {
        self.issue(Action::SetListeningMode(mode)).await
    }

    pub async fn select_listening_mode_by_name(&self, name: &str) -> Result<Confirmation> {
        let mode = self
            .config
            .listening_mode_by_name(name)
            .ok_or_else(|| EiscpError::InvalidArgument(format!("no listening mode named {name:?}")))?;
        self.select_listening_mode(mode).await
    }

    pub fn listening_mode_name(&self) -> Option<String> {
        self.state().listening_mode.map(|mode| self.config.listening_mode_name(&mode))
    }

    // Tuner

    /// Tune a stored radio preset (1 to 40)
    pub async fn select_preset(&self, preset: u8) -> Result<Confirmation> {
        if !(1..=MAX_PRESET).contains(&preset) {
            return Err(EiscpError::InvalidArgument(format!(
                "preset {} outside 1..={}",
                preset, MAX_PRESET
            )));
        }
        self.issue(Action::SelectPreset(preset)).await
    }

    pub async fn preset_up(&self) -> Result<Confirmation> {
        self.issue(Action::PresetUp).await
    }

    pub async fn preset_down(&self) -> Result<Confirmation> {
        self.issue(Action::PresetDown).await
    }

    // HDMI output and signal details, main zone only

    pub async fn select_hdmi_output(&self, output: HdmiOutput) -> Result<Confirmation> {
        self.issue(Action::SelectHdmiOutput(output)).await
    }

    /// Ask the receiver which audio signal it is currently processing
    pub async fn audio_info(&self) -> Result<AudioInfo> {
        match self.issue(Action::QueryAudioInfo).await?.field {
            Field::AudioInfo(info) => Ok(info),
            other => Err(EiscpError::InvalidResponse(format!("expected audio info, got {:?}", other))),
        }
    }

    /// Ask the receiver which video signal it is currently processing
    pub async fn video_info(&self) -> Result<VideoInfo> {
        match self.issue(Action::QueryVideoInfo).await?.field {
            Field::VideoInfo(info) => Ok(info),
            other => Err(EiscpError::InvalidResponse(format!("expected video info, got {:?}", other))),
        }
    }

    // State

    /// Query every field of this zone and return the updated snapshot
    pub async fn refresh(&self) -> Result<ZoneState> {
        self.dispatcher
            .query_zone(self.zone, self.config.request_timeout())
            .await?;
        Ok(self.state())
    }

    /// Last known state of this zone
    pub fn state(&self) -> ZoneState {
        self.zones.read(self.zone)
    }
}
